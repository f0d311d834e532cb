//! Request and response types for the REST API.

use serde::{Deserialize, Serialize};

use crate::domain::{
    ApplicationFields, ApplicationStatistics, PaymentReceipt, VendorType,
};
use crate::ledger::LedgerStatistics;

// ============================================================================
// Application types
// ============================================================================

/// Request body for submitting an application.
///
/// The raw identity number never leaves the service; it is salted and hashed
/// before anything is stored or sent to the ledger.
#[derive(Debug, Deserialize)]
pub struct SubmitApplicationRequest {
    pub vendor_type: VendorType,
    pub identity_number: String,
    pub fields: ApplicationFields,
    /// Hex-encoded SHA-256 digests, one per uploaded document.
    #[serde(default)]
    pub document_digests: Vec<String>,
    pub payment_receipt: PaymentReceipt,
}

/// Request body for approving an application.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub notes: String,
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// Request body for toggling a certificate's active flag.
#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

// ============================================================================
// Query types
// ============================================================================

/// Query parameters for listing applications.
#[derive(Debug, Deserialize)]
pub struct ListApplicationsQuery {
    pub status: Option<String>,
}

/// Query parameters for a repair sweep.
#[derive(Debug, Deserialize)]
pub struct RetryArtifactsQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub local: ApplicationStatistics,
    /// Absent when the ledger could not be reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerStatistics>,
}

pub fn default_artifact_retry_limit() -> usize {
    50
}
