//! Prefixed random identifiers.
//!
//! Every protocol entity carries a fixed string prefix so that identifiers
//! are self-describing and cannot be cross-assigned: an agent id can never
//! be mistaken for a relay id. The random part is 16 bytes from the OS
//! CSPRNG, hex-encoded, which makes collisions negligible for a single
//! directory instance.

use rand::RngCore;

/// Prefix for agent identifiers.
pub const AGENT_PREFIX: &str = "agt_";
/// Prefix for message identifiers.
pub const MESSAGE_PREFIX: &str = "msg_";
/// Prefix for conversation identifiers.
pub const CONVERSATION_PREFIX: &str = "conv_";
/// Prefix for relay-entry identifiers.
pub const RELAY_PREFIX: &str = "rly_";

/// Number of random bytes in an identifier (128 bits of entropy).
const ID_BYTES: usize = 16;

/// Generate a fresh identifier with the given prefix.
pub fn generate_id(prefix: &str) -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

/// Generate a fresh agent identifier.
pub fn agent_id() -> String {
    generate_id(AGENT_PREFIX)
}

/// Generate a fresh message identifier.
pub fn message_id() -> String {
    generate_id(MESSAGE_PREFIX)
}

/// Generate a fresh conversation identifier.
pub fn conversation_id() -> String {
    generate_id(CONVERSATION_PREFIX)
}

/// Generate a fresh relay-entry identifier.
pub fn relay_id() -> String {
    generate_id(RELAY_PREFIX)
}

/// Check that an identifier carries the expected prefix and a non-empty body.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.len() > prefix.len() && id.starts_with(prefix)
}
