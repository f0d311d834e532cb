//! REST API endpoints for the vendor registry.

use axum::routing::{get, post, put};
use axum::Router;

use super::handlers::*;
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Applications
        .route(
            "/v1/applications",
            post(submit_application).get(list_applications),
        )
        .route("/v1/applications/:application_id", get(get_application))
        .route(
            "/v1/applications/:application_id/approve",
            post(approve_application),
        )
        .route(
            "/v1/applications/:application_id/reject",
            post(reject_application),
        )
        // Certificates
        .route(
            "/v1/providers/:provider_id/certificate",
            post(issue_certificate).get(get_provider_certificate),
        )
        .route(
            "/v1/certificates/number/:certificate_number",
            get(get_certificate_by_number),
        )
        .route("/v1/certificates/:certificate_hash", get(get_certificate))
        .route(
            "/v1/certificates/:certificate_hash/active",
            put(set_certificate_active),
        )
        .route("/v1/verify/:certificate_hash", get(verify_certificate))
        // Operations
        .route("/v1/statistics", get(get_statistics))
        .route("/v1/repairs", get(list_repairs))
        .route("/v1/repairs/sweep", post(sweep_repairs))
}
