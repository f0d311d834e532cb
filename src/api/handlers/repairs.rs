//! Operator endpoints for deferred projections and missing artifacts.

use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;
use tracing::{info, instrument};

use crate::api::error::ApiError;
use crate::api::principal::Principal;
use crate::api::types::{default_artifact_retry_limit, RetryArtifactsQuery};
use crate::registry::{RepairEntry, SweepReport};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub projections: SweepReport,
    pub artifacts_stored: usize,
}

/// GET /api/v1/repairs - Projections still owed to the local store.
pub async fn list_repairs(
    State(state): State<AppState>,
) -> Result<Json<Vec<RepairEntry>>, ApiError> {
    Ok(Json(state.registry.coordinator.repairs().await?))
}

/// POST /api/v1/repairs/sweep - Re-apply deferred projections, then re-render missing artifacts.
#[instrument(skip(state, query), fields(operator = %principal.0))]
pub async fn sweep_repairs(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<RetryArtifactsQuery>,
) -> Result<Json<SweepResponse>, ApiError> {
    let projections = state.registry.coordinator.sweep().await;
    let artifacts_stored = state
        .registry
        .artifacts
        .retry_missing(query.limit.unwrap_or_else(default_artifact_retry_limit))
        .await?;

    info!(
        repaired = projections.repaired,
        remaining = projections.remaining,
        artifacts_stored,
        "Repair sweep finished"
    );

    Ok(Json(SweepResponse {
        projections,
        artifacts_stored,
    }))
}
