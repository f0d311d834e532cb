//! Caller identity extraction.
//!
//! Authentication happens upstream; the identity provider forwards the
//! authenticated principal id in the `x-principal-id` header.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::{unauthorized, ApiError};
use crate::domain::VendorId;

pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub VendorId);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .ok_or_else(|| unauthorized("Missing x-principal-id header"))?;

        let id = value
            .to_str()
            .map_err(|_| unauthorized("x-principal-id is not valid ASCII"))?
            .trim();

        if id.is_empty() {
            return Err(unauthorized("x-principal-id is empty"));
        }

        Ok(Principal(VendorId::new(id)))
    }
}
