//! Vendor application records and their state machine
//!
//! ```text
//!   pending ──approve──▶ approved   (terminal)
//!      │
//!      └────reject────▶ rejected   (terminal)
//! ```
//!
//! Transitions are monotone. `provider_id` and `verification_score` are set
//! if and only if the record is approved.
//!
//! A pending record carries `approval_started_at` while an approval is on its
//! way to the ledger. Rejection is refused until that claim is settled or has
//! gone stale, so a ledger approval can always be projected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{hash256_hex_0x, ApplicationFields, ApplicationId, Hash256, ProviderId, VendorId, VendorType};

/// Maximum verification score an approver may assign
pub const MAX_VERIFICATION_SCORE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApplicationStatus::Pending)
    }

    /// Whether the record blocks a new submission for the same identity.
    pub fn holds_identity(&self) -> bool {
        matches!(self, ApplicationStatus::Pending | ApplicationStatus::Approved)
    }

    pub fn can_transition_to(&self, next: ApplicationStatus) -> bool {
        matches!(
            (self, next),
            (ApplicationStatus::Pending, ApplicationStatus::Approved)
                | (ApplicationStatus::Pending, ApplicationStatus::Rejected)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(format!("unknown application status: {other}")),
        }
    }
}

/// Local projection of a ledger-registered application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub application_id: ApplicationId,
    #[serde(with = "hash256_hex_0x")]
    pub identity_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub application_data_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub documents_hash: Hash256,
    pub payment_reference: String,
    pub vendor_type: VendorType,
    pub vendor_id: VendorId,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Set while an approval is in flight to the ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_started_at: Option<DateTime<Utc>>,
    /// Submitted form, kept for the certificate display snapshot
    pub fields: ApplicationFields,
}

/// Data written when an application is approved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub provider_id: ProviderId,
    pub approved_at: DateTime<Utc>,
    pub notes: String,
    pub score: u8,
}

/// Data written when an application is rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
}

impl ApplicationRecord {
    /// Apply an approval, refusing any transition out of a terminal state.
    pub fn apply_approval(&mut self, approval: &Approval) -> Result<(), ApplicationStatus> {
        if !self.status.can_transition_to(ApplicationStatus::Approved) {
            return Err(self.status);
        }
        self.status = ApplicationStatus::Approved;
        self.provider_id = Some(approval.provider_id);
        self.approved_at = Some(approval.approved_at);
        self.verifier_notes = Some(approval.notes.clone());
        self.verification_score = Some(approval.score);
        self.approval_started_at = None;
        Ok(())
    }

    /// Whether an approval claimed at or after `cutoff` still holds the record.
    pub fn approval_in_flight(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == ApplicationStatus::Pending
            && self.approval_started_at.is_some_and(|started| started >= cutoff)
    }

    /// Apply a rejection, refusing any transition out of a terminal state.
    pub fn apply_rejection(&mut self, rejection: &Rejection) -> Result<(), ApplicationStatus> {
        if !self.status.can_transition_to(ApplicationStatus::Rejected) {
            return Err(self.status);
        }
        self.status = ApplicationStatus::Rejected;
        self.rejected_at = Some(rejection.rejected_at);
        self.rejection_reason = Some(rejection.reason.clone());
        Ok(())
    }

    /// Check the approval-field invariant.
    pub fn is_consistent(&self) -> bool {
        let approved = self.status == ApplicationStatus::Approved;
        approved == self.provider_id.is_some() && approved == self.verification_score.is_some()
    }
}

/// Counts of local application records per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatistics {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

impl ApplicationStatistics {
    pub fn total(&self) -> u64 {
        self.pending + self.approved + self.rejected
    }
}
