//! Audit trail entries for enrollment changes and attestation decisions.
//!
//! Events serialize to one JSON object each; the daemon appends them to
//! its audit log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_auth::identity::EkPubHash;
use uuid::Uuid;

/// Action being audited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Enrollment
    /// A record was added.
    Enrolled,
    /// A record was removed.
    Deleted,
    /// A record was selected for re-enrollment.
    Reenrolled,
    /// The store was swept and its index rebuilt.
    JanitorSwept,

    // Attestation
    /// A ticket was issued by Initiate.
    TicketIssued,
    /// A ticket failed to open, mismatched, or was stale.
    TicketRejected,
    /// A quote failed identity, attribute, signature or nonce checks.
    QuoteRejected,
    /// A quote verified but no enrollment record exists.
    UnenrolledAttempt,
    /// Assets were generated and returned.
    AssetsIssued,
    /// Asset generation failed.
    GenerationFailed,
}

/// Target of an audit action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum AuditTarget {
    /// A single host identity.
    Identity(EkPubHash),
    /// A set of records selected by hash prefix.
    Prefix(String),
    /// The store as a whole.
    Store,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub action: AuditAction,
    pub target: AuditTarget,
    /// Free-form details such as a rejection reason or a record count.
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, target: AuditTarget) -> Self {
        Self::at(Utc::now(), action, target)
    }

    pub fn at(ts: DateTime<Utc>, action: AuditAction, target: AuditTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts,
            action,
            target,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditAction::UnenrolledAttempt).unwrap(),
            r#""unenrolled_attempt""#
        );
        assert_eq!(
            serde_json::to_string(&AuditAction::JanitorSwept).unwrap(),
            r#""janitor_swept""#
        );
    }

    #[test]
    fn test_identity_target_carries_hash() {
        let hash = EkPubHash::parse(&"0f".repeat(32)).unwrap();
        let json = serde_json::to_string(&AuditTarget::Identity(hash)).unwrap();
        assert_eq!(json, format!(r#"{{"type":"identity","id":"{}"}}"#, "0f".repeat(32)));
    }

    #[test]
    fn test_store_target_has_no_id() {
        let json = serde_json::to_string(&AuditTarget::Store).unwrap();
        assert_eq!(json, r#"{"type":"store"}"#);
    }

    #[test]
    fn test_event_survives_json_with_sorted_metadata() {
        let event = AuditEvent::at(
            DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            AuditAction::QuoteRejected,
            AuditTarget::Prefix("ab".into()),
        )
        .with_metadata("reason", "nonce")
        .with_metadata("peer", "10.0.0.1");

        let json = serde_json::to_string_pretty(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);

        let peer = json.find("peer").unwrap();
        let reason = json.find("reason").unwrap();
        assert!(peer < reason);
    }
}
