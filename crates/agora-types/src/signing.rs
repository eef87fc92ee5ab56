//! Ed25519 identity keys and canonical-form signing.
//!
//! Signing always goes through the canonicalizer, so any two
//! implementations that agree on the field/value pairs of an envelope agree
//! byte-for-byte on what was signed. Ed25519 signatures are deterministic:
//! signing identical canonical bytes with the same key yields identical
//! signatures, which the test suite relies on.
//!
//! Verification never panics and never errors: malformed keys or
//! signatures are simply "not valid". Callers that cannot even attempt
//! verification (sender key unknown) must track that state separately;
//! see the relay poller.

use crate::canonical::canonical_bytes;
use crate::error::{AgoraError, AgoraResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde_json::Value;

/// An Ed25519 keypair for one agent identity.
///
/// The private half never leaves the owning process; only the public half
/// is published via the agent card. The secret is wiped on drop.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    /// The secret key bytes, for the caller's own key storage.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The public key as a base64url (no padding) string, the encoding
    /// carried in the `public_key` field of an agent card.
    pub fn public_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing.verifying_key().to_bytes())
    }

    /// Canonicalize `value` and sign the resulting bytes.
    ///
    /// Any `signature` field already present on the value is excluded, so
    /// signing is idempotent with respect to that field.
    pub fn sign_value(&self, value: &Value) -> AgoraResult<String> {
        let bytes = canonical_bytes(value)?;
        let signature = self.signing.sign(&bytes);
        Ok(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Verify `signature` over the canonical form of `value` with `public_key`.
///
/// Returns `false`, never an error, for malformed signatures, malformed
/// keys, or failed verification. A present `signature` field on the value
/// is stripped before canonicalizing, so the check is immune to the field
/// being present or absent in the input.
pub fn verify_value(value: &Value, signature: &str, public_key: &str) -> bool {
    let Ok(bytes) = canonical_bytes(value) else {
        return false;
    };
    let Ok(pk_raw) = URL_SAFE_NO_PAD.decode(public_key) else {
        return false;
    };
    let Ok(pk_bytes) = <[u8; 32]>::try_from(pk_raw.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };
    let Ok(sig_raw) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_raw.as_slice()) else {
        return false;
    };
    verifying_key
        .verify(&bytes, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Decode and length-check a base64url public key string.
pub fn decode_public_key(public_key: &str) -> AgoraResult<[u8; 32]> {
    let raw = URL_SAFE_NO_PAD
        .decode(public_key)
        .map_err(|e| AgoraError::InvalidMessage(format!("public_key is not base64url: {e}")))?;
    <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| {
        AgoraError::InvalidMessage(format!(
            "public_key must decode to 32 bytes, got {}",
            raw.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = KeyPair::generate();
        let value = json!({"intent": "task.request", "payload": {"x": 1}});

        let signature = keypair.sign_value(&value).unwrap();
        assert!(verify_value(&value, &signature, &keypair.public_key()));
    }

    #[test]
    fn test_tamper_detection() {
        let keypair = KeyPair::generate();
        let value = json!({"intent": "task.request", "amount": 10});
        let signature = keypair.sign_value(&value).unwrap();

        let tampered = json!({"intent": "task.request", "amount": 10_000});
        assert!(!verify_value(&tampered, &signature, &keypair.public_key()));
    }

    #[test]
    fn test_cross_key_rejection() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let value = json!({"k": "v"});
        let signature = signer.sign_value(&value).unwrap();

        assert!(!verify_value(&value, &signature, &other.public_key()));
    }

    #[test]
    fn test_deterministic_signatures() {
        let keypair = KeyPair::generate();
        let value = json!({"b": 2, "a": 1});
        let reordered: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();

        let first = keypair.sign_value(&value).unwrap();
        let second = keypair.sign_value(&value).unwrap();
        let third = keypair.sign_value(&reordered).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_verify_ignores_embedded_signature_field() {
        let keypair = KeyPair::generate();
        let value = json!({"a": 1});
        let signature = keypair.sign_value(&value).unwrap();

        let with_sig = json!({"a": 1, "signature": signature.clone()});
        assert!(verify_value(&with_sig, &signature, &keypair.public_key()));
    }

    #[test]
    fn test_malformed_inputs_return_false() {
        let keypair = KeyPair::generate();
        let value = json!({"a": 1});
        let signature = keypair.sign_value(&value).unwrap();

        assert!(!verify_value(&value, "not base64 !!!", &keypair.public_key()));
        assert!(!verify_value(&value, &signature, "not a key"));
        assert!(!verify_value(&value, "", &keypair.public_key()));
        assert!(!verify_value(&value, &signature, ""));
    }

    #[test]
    fn test_secret_roundtrip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&keypair.secret_bytes());
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keypair = KeyPair::generate();
        let debug = format!("{keypair:?}");
        assert!(debug.contains(&keypair.public_key()));
        assert!(!debug.contains(&hex::encode(keypair.secret_bytes())));
    }

    #[test]
    fn test_decode_public_key_rejects_bad_length() {
        assert!(decode_public_key("AAAA").is_err());
        let keypair = KeyPair::generate();
        assert!(decode_public_key(&keypair.public_key()).is_ok());
    }
}
