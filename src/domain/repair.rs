//! Local writes owed to confirmed ledger writes
//!
//! When a projection cannot be written it is parked as a [`RepairEntry`]
//! until a sweep applies it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    hash_to_hex, ApplicationId, ApplicationRecord, Approval, CertificateRecord, Hash256,
    ProviderId,
};

/// A local write owed to a confirmed ledger write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingProjection {
    Application(ApplicationRecord),
    Approval {
        application_id: ApplicationId,
        approval: Approval,
    },
    Certificate(CertificateRecord),
}

impl PendingProjection {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingProjection::Application(_) => "application",
            PendingProjection::Approval { .. } => "approval",
            PendingProjection::Certificate(_) => "certificate",
        }
    }

    /// Deterministic key of the ledger write this projection mirrors
    pub fn key(&self) -> String {
        match self {
            PendingProjection::Application(record) => record.application_id.to_string(),
            PendingProjection::Approval { application_id, .. } => application_id.to_string(),
            PendingProjection::Certificate(record) => hash_to_hex(&record.certificate_hash),
        }
    }

    /// Identity held by a parked application
    pub fn identity_hash(&self) -> Option<Hash256> {
        match self {
            PendingProjection::Application(record) => Some(record.identity_hash),
            _ => None,
        }
    }

    pub fn provider_id(&self) -> Option<ProviderId> {
        match self {
            PendingProjection::Application(_) => None,
            PendingProjection::Approval { approval, .. } => Some(approval.provider_id),
            PendingProjection::Certificate(record) => Some(record.provider_id),
        }
    }
}

/// A projection that exhausted its local retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub id: Uuid,
    pub projection: PendingProjection,
    pub error_message: String,
    /// Sweep attempts so far
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RepairEntry {
    pub fn new(projection: PendingProjection, error_message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            projection,
            error_message,
            retry_count: 0,
            last_retry_at: None,
            created_at: now,
        }
    }

    /// Record a failed sweep attempt.
    pub fn failed(&mut self, error_message: String, at: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_at = Some(at);
        self.error_message = error_message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval_projection() -> PendingProjection {
        PendingProjection::Approval {
            application_id: ApplicationId(101),
            approval: Approval {
                provider_id: ProviderId(501),
                approved_at: Utc::now(),
                notes: "ok".to_string(),
                score: 90,
            },
        }
    }

    #[test]
    fn test_projection_keys() {
        let projection = approval_projection();
        assert_eq!(projection.kind(), "approval");
        assert_eq!(projection.key(), "101");
        assert_eq!(projection.provider_id(), Some(ProviderId(501)));
        assert_eq!(projection.identity_hash(), None);
    }

    #[test]
    fn test_failed_attempt_bumps_count() {
        let now = Utc::now();
        let mut entry = RepairEntry::new(approval_projection(), "pool timed out".into(), now);
        entry.failed("still down".into(), now);
        entry.failed("still down".into(), now);
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_retry_at, Some(now));
        assert_eq!(entry.error_message, "still down");
    }

    #[test]
    fn test_entry_serializes_with_kind_tag() {
        let entry = RepairEntry::new(approval_projection(), "x".into(), Utc::now());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["projection"]["kind"], "approval");
        let back: RepairEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
