//! PostgreSQL implementations of the registry stores

mod applications;
mod certificates;
mod repairs;

pub use applications::*;
pub use certificates::*;
pub use repairs::*;

use crate::domain::Hash256;
use crate::infra::{RegistryError, Result};

/// Decode a BYTEA column that must hold exactly 32 bytes.
pub(crate) fn hash_from_column(bytes: Vec<u8>, column: &str) -> Result<Hash256> {
    bytes
        .try_into()
        .map_err(|_| RegistryError::Internal(format!("Invalid {column} length")))
}
