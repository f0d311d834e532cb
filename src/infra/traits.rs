//! Trait definitions for the registry's storage and collaborator seams

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatistics, ApplicationStatus, Approval,
    CertificateNumber, CertificateRecord, Hash256, PaymentReceipt, ProviderId, Rejection,
    RepairEntry,
};

use super::Result;

/// Local projection of ledger-registered applications.
///
/// Invariant: at most one pending-or-approved record per identity hash.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Insert a new pending record.
    ///
    /// Fails with `UniqueViolation` when the application id is taken or an
    /// active record already holds the identity hash.
    async fn insert(&self, record: &ApplicationRecord) -> Result<()>;

    async fn get(&self, application_id: ApplicationId) -> Result<Option<ApplicationRecord>>;

    /// Pending or approved record holding this identity, if any
    async fn find_active_by_identity(
        &self,
        identity_hash: &Hash256,
    ) -> Result<Option<ApplicationRecord>>;

    async fn find_by_provider(&self, provider_id: ProviderId) -> Result<Option<ApplicationRecord>>;

    /// Move a pending record to approved.
    ///
    /// Returns `false` without touching the record when it is not pending.
    async fn mark_approved(&self, application_id: ApplicationId, approval: &Approval)
        -> Result<bool>;

    /// Claim a pending record for an approval about to reach the ledger.
    ///
    /// Returns `false` when the record is no longer pending.
    async fn begin_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop the claim taken at `started_at`, if it is still the current one.
    async fn cancel_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Move a pending record to rejected.
    ///
    /// Returns `false` without touching the record when it is not pending or
    /// an approval claimed at or after `claim_cutoff` still holds it.
    async fn mark_rejected(
        &self,
        application_id: ApplicationId,
        rejection: &Rejection,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool>;

    /// Records in submission order, optionally filtered by status
    async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>>;

    async fn statistics(&self) -> Result<ApplicationStatistics>;
}

/// Local certificate records.
///
/// Provider id, certificate hash and certificate number are each unique.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Insert a freshly minted certificate, `UniqueViolation` on any clash
    async fn insert(&self, record: &CertificateRecord) -> Result<()>;

    async fn get_by_hash(&self, certificate_hash: &Hash256) -> Result<Option<CertificateRecord>>;

    async fn get_by_provider(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>>;

    async fn get_by_number(&self, number: &CertificateNumber)
        -> Result<Option<CertificateRecord>>;

    /// Flip the active flag. Returns `false` when no such certificate exists.
    async fn set_active(&self, certificate_hash: &Hash256, active: bool) -> Result<bool>;

    async fn set_artifact_location(&self, certificate_hash: &Hash256, location: &str)
        -> Result<()>;

    /// Certificates whose rendered artifact has not been stored yet
    async fn list_missing_artifacts(&self, limit: usize) -> Result<Vec<CertificateRecord>>;
}

/// Atomic counter behind certificate numbers.
///
/// Each call returns a value never returned before for the same scope.
/// Gaps are allowed, repeats are not.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateSequence: Send + Sync {
    async fn next(&self, region: &str, prefix: &str, year: i32) -> Result<u32>;
}

/// Durable log of projections owed to confirmed ledger writes.
///
/// One entry per projection key; recording a key twice keeps the first entry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RepairStore: Send + Sync {
    async fn record(&self, entry: &RepairEntry) -> Result<()>;

    /// Entries oldest first
    async fn list(&self) -> Result<Vec<RepairEntry>>;

    /// Persist the retry count and error of a failed sweep attempt.
    async fn update(&self, entry: &RepairEntry) -> Result<()>;

    async fn remove(&self, id: Uuid) -> Result<bool>;

    async fn count(&self) -> Result<u64>;

    /// Parked certificate projection for a provider
    async fn find_certificate(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>>;

    /// Parked application projection holding an identity
    async fn find_application(&self, identity_hash: &Hash256) -> Result<Option<ApplicationRecord>>;
}

/// Delegated payment gateway check.
///
/// Implementations return `PaymentInvalid` when the gateway refuses the receipt.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, receipt: &PaymentReceipt) -> Result<()>;
}

/// Health check for components
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub database: ComponentHealth,
    pub ledger: ComponentHealth,
}

impl HealthStatus {
    /// The service can take traffic when nothing is unhealthy.
    ///
    /// A degraded ledger still allows reads.
    pub fn is_ready(&self) -> bool {
        !self.database.is_unhealthy() && !self.ledger.is_unhealthy()
    }
}

/// Individual component health
#[derive(Debug, Clone)]
pub enum ComponentHealth {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentHealth::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, ComponentHealth::Unhealthy { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentHealth::Healthy => "healthy",
            ComponentHealth::Degraded { .. } => "degraded",
            ComponentHealth::Unhealthy { .. } => "unhealthy",
        }
    }
}
