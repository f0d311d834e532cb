//! HTTP server bootstrap for the vendor registry.
//!
//! This module wires together:
//! - configuration
//! - the database pool (or in-memory stores when no database is configured)
//! - the ledger client (chain, or the in-memory ledger for local runs)
//! - the registry services and the background repair loop
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handlers::{health_check, metrics_handler, readiness_check};
use crate::api::PRINCIPAL_HEADER;
use crate::domain::SystemClock;
use crate::infra::{
    InMemoryApplicationStore, InMemoryCertificateSequence, InMemoryCertificateStore,
    InMemoryRepairStore, PgApplicationStore, PgCertificateSequence, PgCertificateStore,
    PgRepairStore, ReceiptShapeVerifier,
};
use crate::ledger::chain::{ChainLedger, ChainLedgerConfig};
use crate::ledger::memory::InMemoryLedger;
use crate::ledger::LedgerClient;
use crate::metrics::MetricsRegistry;
use crate::registry::{
    FsArtifactStore, HtmlTemplateRenderer, Registry, RegistryConfig, RegistryDeps,
};
use crate::telemetry::{init_telemetry, TelemetryConfig};

/// Certificates re-rendered per repair tick
const ARTIFACT_RETRY_BATCH: usize = 50;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL; in-memory stores when unset.
    pub database_url: Option<String>,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    pub migrate_on_startup: bool,
    /// Comma-separated origins, or `*`
    pub cors_allow_origins: Option<String>,
    /// Period of the repair sweep; zero disables the loop.
    pub repair_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let port: u16 = match std::env::var("PORT") {
            Ok(p) => p
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT {p:?}: {e}"))?,
            Err(_) => 8080,
        };

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        let cors_allow_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let repair_interval = std::env::var("REPAIR_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
            migrate_on_startup,
            cors_allow_origins,
            repair_interval,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    /// None when running on in-memory stores
    pub pool: Option<PgPool>,
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env())?;

    info!("Starting vendor registry v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);

    let registry_config = RegistryConfig::from_env()?;
    info!("  Certificate region: {}", registry_config.region);
    info!("  Verify base URL: {}", registry_config.verify_base_url);

    let state = build_state(&config, registry_config).await?;
    let repair_loop = spawn_repair_loop(state.registry.clone(), config.repair_interval);

    let cors = cors_layer(config.cors_allow_origins.as_deref())?;
    let app = build_router(state, cors);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("Vendor registry is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = repair_loop {
        handle.abort();
    }
    info!("Vendor registry stopped");
    Ok(())
}

/// Connect stores and the ledger, then wire the registry services.
pub async fn build_state(
    config: &Config,
    registry_config: RegistryConfig,
) -> anyhow::Result<AppState> {
    let metrics = Arc::new(MetricsRegistry::new());

    let ledger: Arc<dyn LedgerClient> = match ChainLedgerConfig::from_env() {
        Some(ledger_config) => {
            info!("Chain ledger configured:");
            info!("  RPC URL: {}", ledger_config.rpc_url);
            info!("  Registry: {:?}", ledger_config.registry_address);
            info!("  Chain ID: {}", ledger_config.chain_id);
            Arc::new(ChainLedger::new(ledger_config))
        }
        None => {
            warn!(
                "Chain ledger not configured (set LEDGER_RPC_URL, LEDGER_REGISTRY_ADDRESS, LEDGER_PRIVATE_KEY); using the in-memory ledger"
            );
            Arc::new(InMemoryLedger::new())
        }
    };

    let (deps, pool) = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to PostgreSQL...");
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(database_url)
                .await?;
            info!("Connected to PostgreSQL");

            if config.migrate_on_startup {
                info!("Running database migrations...");
                crate::migrations::run_postgres(&pool).await?;
                info!("Database migrations applied");
            } else {
                info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
            }

            let deps = RegistryDeps {
                applications: Arc::new(PgApplicationStore::new(pool.clone())),
                certificates: Arc::new(PgCertificateStore::new(pool.clone())),
                repairs: Arc::new(PgRepairStore::new(pool.clone())),
                sequence: Arc::new(PgCertificateSequence::new(pool.clone())),
                ledger,
                payments: Arc::new(ReceiptShapeVerifier),
                renderer: Arc::new(HtmlTemplateRenderer),
                artifact_store: Arc::new(FsArtifactStore::from_env()),
                clock: Arc::new(SystemClock),
                metrics,
            };
            (deps, Some(pool))
        }
        None => {
            warn!("DATABASE_URL not set; records are kept in memory and lost on restart");
            let deps = RegistryDeps {
                applications: Arc::new(InMemoryApplicationStore::new()),
                certificates: Arc::new(InMemoryCertificateStore::new()),
                repairs: Arc::new(InMemoryRepairStore::new()),
                sequence: Arc::new(InMemoryCertificateSequence::new()),
                ledger,
                payments: Arc::new(ReceiptShapeVerifier),
                renderer: Arc::new(HtmlTemplateRenderer),
                artifact_store: Arc::new(FsArtifactStore::from_env()),
                clock: Arc::new(SystemClock),
                metrics,
            };
            (deps, None)
        }
    };

    Ok(AppState {
        registry: Registry::new(registry_config, deps),
        pool,
    })
}

/// Build the full router: `/api` plus the root-level health endpoints.
pub fn build_router(state: AppState, cors: Option<CorsLayer>) -> Router {
    let mut router = Router::new()
        .nest("/api", crate::api::router())
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors {
        router = router.layer(cors_layer);
    }

    router.with_state(state)
}

fn cors_layer(origins: Option<&str>) -> anyhow::Result<Option<CorsLayer>> {
    let Some(origins) = origins.map(str::trim).filter(|o| !o.is_empty()) else {
        return Ok(None);
    };

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                HeaderName::from_static(PRINCIPAL_HEADER),
            ]),
    ))
}

/// Periodically re-apply deferred projections and re-render missing artifacts.
fn spawn_repair_loop(registry: Registry, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Repair loop disabled (REPAIR_INTERVAL_SECS=0)");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let report = registry.coordinator.sweep().await;
            if report.attempted > 0 {
                info!(
                    attempted = report.attempted,
                    repaired = report.repaired,
                    remaining = report.remaining,
                    "Repair sweep finished"
                );
            }

            if let Err(e) = registry.artifacts.retry_missing(ARTIFACT_RETRY_BATCH).await {
                warn!(error = %e, "Artifact retry failed");
            }
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
