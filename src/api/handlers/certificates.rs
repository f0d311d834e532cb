//! Certificate handlers: issuance, lookup, verification and revocation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::instrument;

use crate::api::error::{validation_error, ApiError};
use crate::api::principal::Principal;
use crate::api::types::SetActiveRequest;
use crate::domain::{
    hash_from_hex, CertificateLookup, CertificateNumber, CertificateRecord,
    CertificateVerification, Hash256, IssuedCertificate, ProviderId,
};
use crate::server::AppState;

fn parse_certificate_hash(raw: &str) -> Result<Hash256, ApiError> {
    hash_from_hex(raw).ok_or_else(|| {
        validation_error(
            "certificate_hash",
            format!("certificate hash is not a 32-byte hex value: {raw}"),
        )
    })
}

/// POST /api/v1/providers/:provider_id/certificate - Issue (or return) the certificate.
///
/// Responds 201 for a fresh issuance and 200 when the certificate already existed.
#[instrument(skip(state), fields(issuer = %principal.0))]
pub async fn issue_certificate(
    State(state): State<AppState>,
    principal: Principal,
    Path(provider_id): Path<u64>,
) -> Result<(StatusCode, Json<IssuedCertificate>), ApiError> {
    let issued = state
        .registry
        .issuer
        .issue(ProviderId::new(provider_id))
        .await?;

    let status = if issued.newly_issued {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(issued)))
}

/// GET /api/v1/providers/:provider_id/certificate
pub async fn get_provider_certificate(
    State(state): State<AppState>,
    Path(provider_id): Path<u64>,
) -> Result<Json<CertificateRecord>, ApiError> {
    let record = state
        .registry
        .verifier
        .find(&CertificateLookup::Provider(ProviderId::new(provider_id)))
        .await?;
    Ok(Json(record))
}

/// GET /api/v1/certificates/:certificate_hash
pub async fn get_certificate(
    State(state): State<AppState>,
    Path(certificate_hash): Path<String>,
) -> Result<Json<CertificateRecord>, ApiError> {
    let hash = parse_certificate_hash(&certificate_hash)?;
    let record = state
        .registry
        .verifier
        .find(&CertificateLookup::Hash(hash))
        .await?;
    Ok(Json(record))
}

/// GET /api/v1/certificates/number/:certificate_number
pub async fn get_certificate_by_number(
    State(state): State<AppState>,
    Path(certificate_number): Path<String>,
) -> Result<Json<CertificateRecord>, ApiError> {
    let number: CertificateNumber = certificate_number
        .parse()
        .map_err(|e: String| validation_error("certificate_number", e))?;
    let record = state
        .registry
        .verifier
        .find(&CertificateLookup::Number(number))
        .await?;
    Ok(Json(record))
}

/// GET /api/v1/verify/:certificate_hash - Public verification, the QR target.
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(certificate_hash): Path<String>,
) -> Result<Json<CertificateVerification>, ApiError> {
    let hash = parse_certificate_hash(&certificate_hash)?;
    Ok(Json(state.registry.verifier.verify(&hash).await?))
}

/// PUT /api/v1/certificates/:certificate_hash/active - Revoke or reinstate.
#[instrument(skip(state, request), fields(operator = %principal.0, active = request.active))]
pub async fn set_certificate_active(
    State(state): State<AppState>,
    principal: Principal,
    Path(certificate_hash): Path<String>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hash = parse_certificate_hash(&certificate_hash)?;
    state
        .registry
        .verifier
        .set_active(&hash, request.active)
        .await?;
    Ok(Json(serde_json::json!({})))
}
