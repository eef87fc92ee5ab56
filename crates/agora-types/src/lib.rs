//! Core protocol types for the Agora agent network.
//!
//! This crate defines the two wire envelopes (agent cards and signed
//! messages), the canonical serialization they are signed over, the Ed25519
//! signing scheme, envelope validation, and access-control resolution.
//!
//! ## Architecture
//!
//! - **AgentCard**: identity document published to the directory
//! - **Message**: signed envelope exchanged between agents
//! - **Canonicalizer**: deterministic, key-sorted serialization for signing
//! - **KeyPair**: Ed25519 identity keys; the private half never leaves the
//!   owning process
//! - **Validator**: pure structural checks applied before envelopes enter
//!   the store or are signed

pub mod access;
pub mod canonical;
pub mod card;
pub mod error;
pub mod id;
pub mod message;
pub mod signing;
pub mod validate;

pub use access::{resolve_admission, Admission};
pub use card::{AccessControl, AccessMode, AgentCard, Availability};
pub use error::{AgoraError, AgoraResult, ErrorBody, ErrorDetail};
pub use message::Message;
pub use signing::{verify_value, KeyPair};
pub use validate::{SearchParams, SearchQuery, ValidationError};

/// Wire protocol version carried on every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";
