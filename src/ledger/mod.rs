//! Ledger client boundary
//!
//! The ledger is the authoritative append-only registry of applications,
//! providers and certificates. Everything else in the crate is a projection
//! of what the ledger has confirmed.
//!
//! Two implementations:
//! - [`chain::ChainLedger`]: EVM registry contract over JSON-RPC
//! - [`memory::InMemoryLedger`]: in-process ledger for local runs and tests

pub mod chain;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{
    hash256_hex_0x, ApplicationId, Hash256, ProviderId, VendorType,
};

/// Failures reported by a ledger client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The call never reached the ledger
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// No answer within the call timeout; the write may or may not have landed
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was dispatched but its outcome could not be observed
    #[error("ledger outcome ambiguous: {0}")]
    Ambiguous(String),

    /// The ledger refused the write because of existing state
    #[error("ledger conflict: {0}")]
    Conflict(String),

    #[error("not found on ledger: {0}")]
    NotFound(String),

    /// The ledger refused the call outright (revert, bad input, bad credentials)
    #[error("ledger rejected call: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Safe to retry blindly: nothing was dispatched
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }

    /// A write may have landed; reconcile before retrying
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, LedgerError::Timeout(_) | LedgerError::Ambiguous(_))
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Application registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerApplication {
    #[serde(with = "hash256_hex_0x")]
    pub identity_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub content_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub documents_hash: Hash256,
    pub vendor_type: VendorType,
    pub payment_reference: String,
}

/// Application as recorded on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerApplication {
    pub application_id: ApplicationId,
    #[serde(with = "hash256_hex_0x")]
    pub identity_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub content_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub documents_hash: Hash256,
    pub vendor_type: VendorType,
    pub payment_reference: String,
    pub submitted_at: DateTime<Utc>,
    /// Approved on the ledger (rejection is local-only)
    pub processed: bool,
}

impl LedgerApplication {
    /// Whether this ledger entry is the given submission
    pub fn matches(&self, request: &NewLedgerApplication) -> bool {
        self.identity_hash == request.identity_hash
            && self.content_hash == request.content_hash
            && self.documents_hash == request.documents_hash
            && self.vendor_type == request.vendor_type
            && self.payment_reference == request.payment_reference
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCertificate {
    #[serde(with = "hash256_hex_0x")]
    pub certificate_hash: Hash256,
    #[serde(with = "hash256_hex_0x")]
    pub tx_hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDetails {
    pub provider_id: ProviderId,
    pub application_id: ApplicationId,
    pub vendor_type: VendorType,
    pub registration_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    pub verification_score: u8,
}

/// Answer to a certificate lookup by identity hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub is_valid: bool,
    pub provider_id: ProviderId,
    /// None until a certificate has been generated for the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_hash: Option<Hash256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_date: Option<DateTime<Utc>>,
    pub expiry_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_applications: u64,
    pub total_approvals: u64,
    pub total_providers: u64,
    pub total_certificates: u64,
}

/// Client for the authoritative registry.
///
/// Mutations are idempotent per key where the ledger allows it. Every
/// mutation has a reconciliation read by the same deterministic key, so a
/// caller that lost a response can find out whether the write landed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn register_application(
        &self,
        application: &NewLedgerApplication,
    ) -> LedgerResult<ApplicationId>;

    async fn approve_application(
        &self,
        application_id: ApplicationId,
        notes: &str,
        score: u8,
    ) -> LedgerResult<ProviderId>;

    async fn issue_certificate(&self, provider_id: ProviderId) -> LedgerResult<LedgerCertificate>;

    async fn get_provider_details(&self, provider_id: ProviderId) -> LedgerResult<ProviderDetails>;

    async fn verify_certificate(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerVerification>>;

    /// Latest application registered for an identity
    async fn find_application(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerApplication>>;

    async fn find_provider(&self, application_id: ApplicationId)
        -> LedgerResult<Option<ProviderId>>;

    async fn find_certificate(
        &self,
        provider_id: ProviderId,
    ) -> LedgerResult<Option<LedgerCertificate>>;

    async fn statistics(&self) -> LedgerResult<LedgerStatistics>;
}

/// Run a ledger call under a deadline, mapping expiry to [`LedgerError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout(limit)),
    }
}
