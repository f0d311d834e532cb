//! REST API tests over the full router.
//!
//! The router runs against the in-memory ledger and stores, so no database
//! is needed.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use vendor_registry::api::PRINCIPAL_HEADER;
use vendor_registry::server::{build_router, AppState};

use common::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn create_test_router(t: &TestRegistry) -> axum::Router {
    build_router(
        AppState {
            registry: t.registry.clone(),
            pool: None,
        },
        None,
    )
}

/// Send a request to the test router.
async fn send_request(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    principal: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }

    if let Some(principal) = principal {
        builder = builder.header(PRINCIPAL_HEADER, principal);
    }

    let body = body
        .map(|v| Body::from(serde_json::to_vec(&v).unwrap()))
        .unwrap_or_else(Body::empty);

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec();

    let json = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&bytes) }))
    };

    (status, json)
}

fn submission_body(identity_number: &str, payment_id: &str) -> Value {
    json!({
        "vendor_type": "GUIDE",
        "identity_number": identity_number,
        "fields": {
            "vendor_type": "GUIDE",
            "full_name": "Asha Munda",
            "email": "asha@example.com",
            "phone": "+91 90000 00000",
            "address": "12 Main Road",
            "city": "Ranchi",
            "description": "Guided treks around the falls",
            "experience": "5 years",
            "specialization": "Trekking",
            "languages": ["Hindi", "English"],
            "emergency_contact": "+91 90000 00001"
        },
        "document_digests": [format!("0x{}", "07".repeat(32))],
        "payment_receipt": {
            "payment_id": payment_id,
            "order_id": format!("order_{payment_id}"),
            "signature": "sig",
            "amount": FEE
        }
    })
}

/// Submit, approve and issue through the API; returns the certificate hash.
async fn issue_through_api(app: &axum::Router, identity_number: &str) -> String {
    let (status, submitted) = send_request(
        app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body(identity_number, &format!("pay_{identity_number}"))),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{submitted}");
    let application_id = submitted["application_id"].as_u64().unwrap();

    let (status, approved) = send_request(
        app,
        Method::POST,
        &format!("/api/v1/applications/{application_id}/approve"),
        Some(json!({ "notes": "documents verified", "score": 90 })),
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{approved}");
    let provider_id = approved["provider_id"].as_u64().unwrap();

    let (status, issued) = send_request(
        app,
        Method::POST,
        &format!("/api/v1/providers/{provider_id}/certificate"),
        None,
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{issued}");
    issued["certificate_hash"].as_str().unwrap().to_string()
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_healthy() {
    let t = test_registry();
    let app = create_test_router(&t);

    let (status, body) = send_request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vendor-registry");
}

#[tokio::test]
async fn test_ready_reports_ledger_degradation() {
    let t = test_registry();
    let app = create_test_router(&t);

    let (status, body) = send_request(&app, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["database"]["status"], "healthy");
    assert_eq!(body["ledger"]["status"], "healthy");
    assert_eq!(body["pending_repairs"], 0);

    t.ledger.set_reachable(false);
    let (status, body) = send_request(&app, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ledger"]["status"], "degraded");
}

#[tokio::test]
async fn test_metrics_endpoint_exports_counters() {
    let t = test_registry();
    let app = create_test_router(&t);
    issue_through_api(&app, "ABCDE1234F").await;

    let (status, body) = send_request(&app, Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body["raw"].as_str().unwrap();
    assert!(text.contains("vendor_registry_uptime_seconds"));
    assert!(text.contains("vendor_registry_applications_submitted 1"));
    assert!(text.contains("vendor_registry_certificates_issued 1"));
}

// ============================================================================
// Applications
// ============================================================================

#[tokio::test]
async fn test_submit_requires_principal() {
    let t = test_registry();
    let app = create_test_router(&t);

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_anon")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
    assert!(t.registry.register.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_and_fetch_application() {
    let t = test_registry();
    let app = create_test_router(&t);

    let (status, submitted) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_fetch")),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["application_id"], 101);
    assert_eq!(submitted["projection"], "applied");

    let (status, record) =
        send_request(&app, Method::GET, "/api/v1/applications/101", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "pending");
    assert_eq!(record["vendor_id"], "vendor-1");
    // The raw identity number is never stored.
    assert!(!record.to_string().contains("ABCDE1234F"));

    let (status, list) = send_request(
        &app,
        Method::GET,
        "/api/v1/applications?status=pending",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_identity_is_conflict() {
    let t = test_registry();
    let app = create_test_router(&t);

    send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_one")),
        Some("vendor-1"),
    )
    .await;

    // Same identity in a different case and with padding.
    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body(" abcde1234f ", "pay_two")),
        Some("vendor-2"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_IDENTITY");
}

#[tokio::test]
async fn test_submit_validation_errors() {
    let t = test_registry();
    let app = create_test_router(&t);

    let mut missing_documents = submission_body("ABCDE1234F", "pay_docs");
    missing_documents["document_digests"] = json!([]);
    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(missing_documents),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

    let mut bad_digest = submission_body("ABCDE1234F", "pay_digest");
    bad_digest["document_digests"] = json!(["not-hex"]);
    let (status, _) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(bad_digest),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut underpaid = submission_body("ABCDE1234F", "pay_low");
    underpaid["payment_receipt"]["amount"] = json!(FEE - 1);
    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(underpaid),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "PAYMENT_INVALID");

    assert!(t.registry.register.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_application_is_not_found() {
    let t = test_registry();
    let app = create_test_router(&t);

    let (status, body) =
        send_request(&app, Method::GET, "/api/v1/applications/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "APPLICATION_NOT_FOUND");
    assert_eq!(body["error"]["numeric_code"], 4001);
}

#[tokio::test]
async fn test_invalid_score_and_transition() {
    let t = test_registry();
    let app = create_test_router(&t);

    send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_score")),
        Some("vendor-1"),
    )
    .await;

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications/101/approve",
        Some(json!({ "score": 101 })),
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_SCORE");

    let (status, _) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications/101/reject",
        Some(json!({ "reason": "blurred documents" })),
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications/101/approve",
        Some(json!({ "score": 80 })),
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_STATE_TRANSITION");
}

// ============================================================================
// Certificates
// ============================================================================

#[tokio::test]
async fn test_issue_then_reissue_returns_existing() {
    let t = test_registry();
    let app = create_test_router(&t);
    let certificate_hash = issue_through_api(&app, "ABCDE1234F").await;

    let (status, again) = send_request(
        &app,
        Method::POST,
        "/api/v1/providers/501/certificate",
        None,
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["certificate_hash"], certificate_hash.as_str());
    assert_eq!(again["newly_issued"], false);
    assert_eq!(again["certificate_number"], "JH-GUI-2025-001");

    let (status, by_provider) = send_request(
        &app,
        Method::GET,
        "/api/v1/providers/501/certificate",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_provider["certificate_hash"], certificate_hash.as_str());

    let (status, by_number) = send_request(
        &app,
        Method::GET,
        "/api/v1/certificates/number/JH-GUI-2025-001",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["certificate_hash"], certificate_hash.as_str());
    assert_eq!(by_number["snapshot"]["full_name"], "Asha Munda");
}

#[tokio::test]
async fn test_verify_and_revoke() {
    let t = test_registry();
    let app = create_test_router(&t);
    let certificate_hash = issue_through_api(&app, "ABCDE1234F").await;

    let (status, verification) = send_request(
        &app,
        Method::GET,
        &format!("/api/v1/verify/{certificate_hash}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["verified"], true);
    assert_eq!(verification["ledger_check"], "confirmed");

    let (status, _) = send_request(
        &app,
        Method::PUT,
        &format!("/api/v1/certificates/{certificate_hash}/active"),
        Some(json!({ "active": false })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_request(
        &app,
        Method::PUT,
        &format!("/api/v1/certificates/{certificate_hash}/active"),
        Some(json!({ "active": false })),
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, verification) = send_request(
        &app,
        Method::GET,
        &format!("/api/v1/verify/{certificate_hash}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["verified"], false);
    assert_eq!(verification["certificate"]["is_active"], false);
    assert_eq!(verification["ledger_check"], "skipped");
}

#[tokio::test]
async fn test_certificate_lookup_errors() {
    let t = test_registry();
    let app = create_test_router(&t);

    let unknown = format!("0x{}", "ee".repeat(32));
    let (status, body) = send_request(
        &app,
        Method::GET,
        &format!("/api/v1/verify/{unknown}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "CERTIFICATE_NOT_FOUND");

    let (status, _) =
        send_request(&app, Method::GET, "/api/v1/verify/zz", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_request(
        &app,
        Method::GET,
        "/api/v1/certificates/number/not-a-number",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/providers/999/certificate",
        None,
        Some("officer-1"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "PROVIDER_NOT_FOUND");
}

#[tokio::test]
async fn test_ledger_outage_surfaces_retry_hint() {
    let t = test_registry();
    let app = create_test_router(&t);
    t.ledger.set_reachable(false);

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_outage")),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "LEDGER_UNAVAILABLE");
    assert_eq!(body["error"]["retry_after"], 30);

    let (status, stats) = send_request(&app, Method::GET, "/api/v1/statistics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["local"]["pending"], 0);
    assert!(stats.get("ledger").is_none());
}

// ============================================================================
// Repairs
// ============================================================================

#[tokio::test]
async fn test_repair_sweep_endpoint() {
    let t = test_registry();
    let app = create_test_router(&t);
    t.applications.fail_next_writes(4);

    let (status, submitted) = send_request(
        &app,
        Method::POST,
        "/api/v1/applications",
        Some(submission_body("ABCDE1234F", "pay_repair")),
        Some("vendor-1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["projection"], "deferred");

    let (status, repairs) = send_request(&app, Method::GET, "/api/v1/repairs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repairs.as_array().unwrap().len(), 1);

    let (status, report) = send_request(
        &app,
        Method::POST,
        "/api/v1/repairs/sweep",
        None,
        Some("operator-1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["projections"]["repaired"], 1);

    let (status, _) =
        send_request(&app, Method::GET, "/api/v1/applications/101", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
