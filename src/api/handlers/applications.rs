//! Application handlers: submit, inspect, approve and reject.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::instrument;

use crate::api::error::{validation_error, ApiError};
use crate::api::principal::Principal;
use crate::api::types::{
    ApproveRequest, ListApplicationsQuery, RejectRequest, StatisticsResponse,
    SubmitApplicationRequest,
};
use crate::domain::{
    hash_from_hex, ApplicationId, ApplicationRecord, ApplicationStatus, Hash256,
};
use crate::ledger::with_timeout;
use crate::registry::{ApprovedApplication, SubmitApplication, SubmittedApplication};
use crate::server::AppState;

/// POST /api/v1/applications - Submit a vendor application.
#[instrument(skip(state, request), fields(vendor_id = %principal.0, vendor_type = %request.vendor_type))]
pub async fn submit_application(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<SubmitApplicationRequest>,
) -> Result<(StatusCode, Json<SubmittedApplication>), ApiError> {
    let identity_number = request.identity_number.trim();
    if identity_number.is_empty() {
        return Err(validation_error(
            "identity_number",
            "identity_number is required",
        ));
    }

    let document_digests = request
        .document_digests
        .iter()
        .map(|digest| {
            hash_from_hex(digest).ok_or_else(|| {
                validation_error(
                    "document_digests",
                    format!("document digest is not a 32-byte hex value: {digest}"),
                )
            })
        })
        .collect::<Result<Vec<Hash256>, ApiError>>()?;

    let submitted = state
        .registry
        .register
        .submit(SubmitApplication {
            vendor_id: principal.0,
            identity_hash: state.registry.config.identity_hash(identity_number),
            vendor_type: request.vendor_type,
            fields: request.fields,
            document_digests,
            payment_receipt: request.payment_receipt,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(submitted)))
}

/// GET /api/v1/applications - List applications, optionally by status.
pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ListApplicationsQuery>,
) -> Result<Json<Vec<ApplicationRecord>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ApplicationStatus>)
        .transpose()
        .map_err(|e| validation_error("status", e))?;

    Ok(Json(state.registry.register.list(status).await?))
}

/// GET /api/v1/applications/:application_id
pub async fn get_application(
    State(state): State<AppState>,
    Path(application_id): Path<u64>,
) -> Result<Json<ApplicationRecord>, ApiError> {
    let record = state
        .registry
        .register
        .get(ApplicationId::new(application_id))
        .await?;
    Ok(Json(record))
}

/// POST /api/v1/applications/:application_id/approve
#[instrument(skip(state, request), fields(approver = %principal.0))]
pub async fn approve_application(
    State(state): State<AppState>,
    principal: Principal,
    Path(application_id): Path<u64>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<ApprovedApplication>, ApiError> {
    let approved = state
        .registry
        .register
        .approve(
            ApplicationId::new(application_id),
            request.notes,
            request.score,
        )
        .await?;
    Ok(Json(approved))
}

/// POST /api/v1/applications/:application_id/reject
#[instrument(skip(state, request), fields(approver = %principal.0))]
pub async fn reject_application(
    State(state): State<AppState>,
    principal: Principal,
    Path(application_id): Path<u64>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .registry
        .register
        .reject(ApplicationId::new(application_id), &request.reason)
        .await?;
    Ok(Json(serde_json::json!({})))
}

/// GET /api/v1/statistics - Local counts plus the ledger's totals.
pub async fn get_statistics(
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let local = state.registry.register.statistics().await?;

    let ledger = match with_timeout(
        state.registry.config.ledger_call_timeout,
        state.registry.ledger().statistics(),
    )
    .await
    {
        Ok(stats) => Some(stats),
        Err(err) => {
            tracing::warn!(error = %err, "Ledger statistics unavailable");
            None
        }
    };

    Ok(Json(StatisticsResponse { local, ledger }))
}
