//! Cryptographic utilities for the vendor registry
//!
//! Provides:
//! - Salted identity hashing (ledger lookup without raw PII)
//! - Canonical JSON content hashing (deterministic, cross-language compatible)
//! - Ordered document bundle hashing

mod hash;

pub use crate::domain::Hash256;
pub use hash::*;
