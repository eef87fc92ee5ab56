//! Access-control resolution.
//!
//! Admission is decided by the receiving party (or the relay acting on the
//! recipient's behalf), never by the sender.

use crate::card::{AccessMode, AgentCard};

/// Outcome of resolving a sender against a recipient's access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Deliver and process normally.
    Granted,
    /// Deliver, but the handler is expected to answer with a deferred
    /// `pending_approval` action rather than a substantive reply.
    GrantedPendingApproval,
    /// Do not deliver.
    Rejected,
}

/// Resolve whether `sender_id` may message the owner of `card`.
///
/// A card without an access-control block is open. Under `allowlist` a
/// sender must appear in `allow` and must not appear in `block`. Under
/// `approval`, senders already in `allow` are recognized; anyone else is
/// admitted pending approval.
pub fn resolve_admission(card: &AgentCard, sender_id: &str) -> Admission {
    let Some(policy) = card.access_control.as_ref() else {
        return Admission::Granted;
    };

    match policy.mode {
        AccessMode::Open => Admission::Granted,
        AccessMode::Allowlist => {
            let allowed = policy.allow.iter().any(|a| a == sender_id);
            let blocked = policy.block.iter().any(|b| b == sender_id);
            if allowed && !blocked {
                Admission::Granted
            } else {
                Admission::Rejected
            }
        }
        AccessMode::Approval => {
            if policy.allow.iter().any(|a| a == sender_id) {
                Admission::Granted
            } else {
                Admission::GrantedPendingApproval
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::AccessControl;

    fn card_with(policy: Option<AccessControl>) -> AgentCard {
        let mut card = AgentCard::new("recipient", "https://example.com", "pk");
        card.access_control = policy;
        card
    }

    #[test]
    fn test_no_policy_is_open() {
        let card = card_with(None);
        assert_eq!(resolve_admission(&card, "agt_anyone"), Admission::Granted);
    }

    #[test]
    fn test_open_admits_any_sender() {
        let card = card_with(Some(AccessControl {
            mode: AccessMode::Open,
            allow: vec![],
            block: vec![],
        }));
        assert_eq!(resolve_admission(&card, "agt_stranger"), Admission::Granted);
    }

    #[test]
    fn test_allowlist_admits_listed_only() {
        let card = card_with(Some(AccessControl {
            mode: AccessMode::Allowlist,
            allow: vec!["agt_friend".into()],
            block: vec![],
        }));
        assert_eq!(resolve_admission(&card, "agt_friend"), Admission::Granted);
        assert_eq!(resolve_admission(&card, "agt_stranger"), Admission::Rejected);
    }

    #[test]
    fn test_allowlist_block_overrides_allow() {
        let card = card_with(Some(AccessControl {
            mode: AccessMode::Allowlist,
            allow: vec!["agt_friend".into()],
            block: vec!["agt_friend".into()],
        }));
        assert_eq!(resolve_admission(&card, "agt_friend"), Admission::Rejected);
    }

    #[test]
    fn test_approval_defers_unrecognized_senders() {
        let card = card_with(Some(AccessControl {
            mode: AccessMode::Approval,
            allow: vec!["agt_known".into()],
            block: vec![],
        }));
        assert_eq!(resolve_admission(&card, "agt_known"), Admission::Granted);
        assert_eq!(
            resolve_admission(&card, "agt_new"),
            Admission::GrantedPendingApproval
        );
    }
}
