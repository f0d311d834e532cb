//! Infrastructure layer for the vendor registry
//!
//! Contains trait definitions and implementations for:
//! - Application and certificate storage (PostgreSQL, in-memory)
//! - Certificate number sequences (atomic counters)
//! - The repair log of parked projections (PostgreSQL, in-memory)
//! - Payment receipt verification
//! - Retry with backoff (ledger calls, local writes)

mod error;
mod memory;
mod payment;
pub mod postgres;
mod retry;
mod traits;

pub use error::*;
pub use memory::{
    InMemoryApplicationStore, InMemoryCertificateSequence, InMemoryCertificateStore,
    InMemoryRepairStore,
};
pub use payment::ReceiptShapeVerifier;
pub use postgres::{
    PgApplicationStore, PgCertificateSequence, PgCertificateStore, PgRepairStore,
};
pub use retry::{is_retryable_db_error, Retry, RetryConfig, RetryResult};
pub use traits::*;
