//! Error types for the vendor registry

use thiserror::Error;

use crate::domain::{ApplicationId, ApplicationStatus, ProviderId};

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller supplied bad input; fix and resubmit
    Validation,
    /// Request conflicts with current state
    Conflict,
    NotFound,
    /// A collaborator (the ledger) did not answer; retry later
    CollaboratorUnavailable,
    Fatal,
}

/// Errors that can occur in the registry pipeline
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Submission failed schema or input checks
    #[error("validation error: {0}")]
    Validation(String),

    /// Verification score outside 0..=100
    #[error("invalid verification score: {0}")]
    InvalidScore(i64),

    /// Payment receipt refused
    #[error("payment invalid: {0}")]
    PaymentInvalid(String),

    /// An active (pending or approved) application already holds this identity
    #[error("an active application already exists for this identity")]
    DuplicateIdentity,

    /// Transition out of a terminal state
    #[error("invalid state transition for application {application_id}: {from} -> {to}")]
    InvalidTransition {
        application_id: ApplicationId,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    /// An approval holds the record and its ledger write has not settled
    #[error("approval in flight for application {0}")]
    ApprovalInFlight(ApplicationId),

    /// Ledger refused the write and its precondition is not satisfied
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database unique constraint rejected a write
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("application not found: {0}")]
    ApplicationNotFound(ApplicationId),

    #[error("no approved application for provider {0}")]
    ProviderNotFound(ProviderId),

    #[error("certificate not found: {0}")]
    CertificateNotFound(String),

    /// Every ledger attempt failed before reaching the ledger
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// At least one ledger attempt may have landed; state will converge
    #[error("ledger outcome unknown: {0}")]
    OutcomeUnknown(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Validation(_)
            | RegistryError::InvalidScore(_)
            | RegistryError::PaymentInvalid(_) => ErrorClass::Validation,
            RegistryError::DuplicateIdentity
            | RegistryError::InvalidTransition { .. }
            | RegistryError::ApprovalInFlight(_)
            | RegistryError::Conflict(_)
            | RegistryError::UniqueViolation(_) => ErrorClass::Conflict,
            RegistryError::ApplicationNotFound(_)
            | RegistryError::ProviderNotFound(_)
            | RegistryError::CertificateNotFound(_) => ErrorClass::NotFound,
            RegistryError::LedgerUnavailable(_) | RegistryError::OutcomeUnknown(_) => {
                ErrorClass::CollaboratorUnavailable
            }
            RegistryError::Database(_)
            | RegistryError::Configuration(_)
            | RegistryError::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Whether retrying the same local write may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Database(err) => super::is_retryable_db_error(err),
            _ => false,
        }
    }
}

/// Map sqlx errors, lifting SQLSTATE 23505 into [`RegistryError::UniqueViolation`].
pub fn map_db_error(err: sqlx::Error) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            return RegistryError::UniqueViolation(constraint);
        }
    }
    RegistryError::Database(err)
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(RegistryError::InvalidScore(101).class(), ErrorClass::Validation);
        assert_eq!(RegistryError::DuplicateIdentity.class(), ErrorClass::Conflict);
        assert_eq!(
            RegistryError::ApprovalInFlight(ApplicationId(101)).class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            RegistryError::ProviderNotFound(ProviderId(9)).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            RegistryError::OutcomeUnknown("timeout".into()).class(),
            ErrorClass::CollaboratorUnavailable
        );
        assert_eq!(
            RegistryError::Internal("boom".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_transition_message() {
        let err = RegistryError::InvalidTransition {
            application_id: ApplicationId(101),
            from: ApplicationStatus::Rejected,
            to: ApplicationStatus::Approved,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition for application 101: rejected -> approved"
        );
    }
}
