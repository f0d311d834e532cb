//! Vendor Registry Library
//!
//! Vendor registration, certificate issuance and public verification, with
//! an append-only ledger as the authority and a local store as its projection.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (applications, certificates, vendor forms)
//! - [`crypto`] - Canonical hashing of identities, forms and documents
//! - [`ledger`] - Ledger client trait, chain and in-memory implementations
//! - [`infra`] - Storage (PostgreSQL, in-memory), retries and error types
//! - [`registry`] - Application register, issuance, verification, reconciliation
//! - [`metrics`] - In-process metrics with Prometheus export
//! - [`telemetry`] - Logging setup
//! - [`api`] - REST API routes
//! - [`server`] - HTTP server bootstrap

pub mod api;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod ledger;
pub mod metrics;
pub mod migrations;
pub mod registry;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    ApplicationFields, ApplicationId, ApplicationRecord, ApplicationStatus, CertificateNumber,
    CertificateRecord, CertificateVerification, Hash256, IssuedCertificate, ProviderId,
    VendorId, VendorType,
};

pub use infra::{RegistryError, Result};
pub use registry::{Registry, RegistryConfig, RegistryDeps};
