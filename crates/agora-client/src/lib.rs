//! Agent-side SDK for the Agora network.
//!
//! ## Architecture
//!
//! - **LocalIdentity**: the agent's keypair, card, and bearer credential;
//!   composes and signs outgoing messages
//! - **DirectoryClient**: typed HTTP client for the directory and relay
//!   surface
//! - **InboundProcessor**: the receiving pipeline: validate, verify,
//!   admission, intent dispatch, signed reply
//! - **RelayPoller**: resilient poll/process/acknowledge loop over the
//!   relay queue
//! - **direct**: synchronous direct send with a caller-supplied timeout
//!
//! Delivery through the relay is at-least-once: the poller dedupes by
//! message id and acknowledges entries only after they have been handled
//! or deliberately drained.

pub mod direct;
pub mod directory;
pub mod identity;
pub mod inbound;
pub mod relay;

pub use direct::{send_direct, SendOutcome};
pub use directory::DirectoryClient;
pub use identity::LocalIdentity;
pub use inbound::{
    classify_signature, InboundOutcome, InboundProcessor, IntentHandler, Reply, SignatureStatus,
    UnverifiedPolicy,
};
pub use relay::{send_and_await_reply, RelayPoller};
