//! API layer for the vendor registry
//!
//! REST endpoints over the registry services, with structured error codes.

pub mod error;
pub mod handlers;
pub mod principal;
mod rest;
pub mod types;

pub use error::{ApiError, ErrorCode};
pub use principal::{Principal, PRINCIPAL_HEADER};
pub use rest::*;
