//! Domain models for the vendor registry
//!
//! Applications, certificates, vendor form schemas, payment receipts and
//! parked projections.

mod application;
mod certificate;
mod fields;
mod payment;
mod repair;
mod types;

pub use application::*;
pub use certificate::*;
pub use fields::*;
pub use payment::*;
pub use repair::*;
pub use types::*;
