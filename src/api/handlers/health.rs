//! Health, readiness and metrics handlers
//!
//! - `/health` is a liveness probe and performs no checks
//! - `/ready` checks the database and the ledger
//! - `/metrics` exports the in-process registry in Prometheus text format

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::infra::{ComponentHealth, HealthStatus};
use crate::ledger::with_timeout;
use crate::server::AppState;

/// Upper bound on the ledger probe, regardless of the configured call timeout
const LEDGER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Individual component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub database: ComponentStatus,
    pub ledger: ComponentStatus,
    pub pending_repairs: usize,
}

fn component_status(health: &ComponentHealth, elapsed: Duration) -> ComponentStatus {
    let message = match health {
        ComponentHealth::Healthy => None,
        ComponentHealth::Degraded { reason } | ComponentHealth::Unhealthy { reason } => {
            Some(reason.clone())
        }
    };
    ComponentStatus {
        status: health.as_str(),
        message,
        response_time_ms: elapsed.as_millis() as u64,
    }
}

/// Basic health check endpoint.
///
/// Use this for liveness probes.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "vendor-registry",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness check endpoint.
///
/// An unreachable ledger only degrades readiness: verification keeps working
/// from the local store.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_start = Instant::now();
    let database = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => ComponentHealth::Healthy,
            Err(e) => ComponentHealth::Unhealthy {
                reason: format!("Connection failed: {e}"),
            },
        },
        None => ComponentHealth::Healthy,
    };
    let db_elapsed = db_start.elapsed();

    let ledger_start = Instant::now();
    let probe_timeout = state
        .registry
        .config
        .ledger_call_timeout
        .min(LEDGER_PROBE_TIMEOUT);
    let ledger = match with_timeout(probe_timeout, state.registry.ledger().statistics()).await {
        Ok(_) => ComponentHealth::Healthy,
        Err(e) => ComponentHealth::Degraded {
            reason: e.to_string(),
        },
    };
    let ledger_elapsed = ledger_start.elapsed();

    let health = HealthStatus { database, ledger };
    let status_code = if health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ReadinessResponse {
        status: if health.is_ready() { "ready" } else { "not_ready" },
        database: component_status(&health.database, db_elapsed),
        ledger: component_status(&health.ledger, ledger_elapsed),
        pending_repairs: state.registry.coordinator.repair_count().await,
    };

    (status_code, Json(response))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.registry.metrics.to_prometheus().await,
    )
}
