//! Application startup and lifecycle management.

use crate::config::IngestionConfig;
use crate::handlers;
use crate::parsers::ParserRegistry;
use crate::services::{
    http_metrics_middleware, init_metrics, IngestionService, LedgerStore, MemoryStore, PgStore,
    ProjectionService,
};
use axum::{extract::DefaultBodyLimit, middleware, routing::get, routing::post, Router};
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IngestionConfig,
    pub store: Arc<dyn LedgerStore>,
    pub ingestion: IngestionService,
    pub projections: ProjectionService,
}

impl AppState {
    pub fn new(config: IngestionConfig, store: Arc<dyn LedgerStore>) -> Result<Self, AppError> {
        let registry = ParserRegistry::with_defaults()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        Ok(Self {
            ingestion: IngestionService::new(store.clone(), Arc::new(registry)),
            projections: ProjectionService::new(store.clone()),
            store,
            config,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route(
            "/api/transactions/upload",
            post(handlers::upload_statement).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/api/transactions/supported-formats",
            get(handlers::supported_formats),
        )
        .route("/api/accounts", get(handlers::list_accounts))
        .route("/api/accounts/:id", get(handlers::get_account))
        .route("/api/balances", get(handlers::list_balances))
        .route(
            "/api/balances/account/:account_id",
            get(handlers::list_account_balances),
        )
        .route(
            "/api/balances/account/:account_id/latest",
            get(handlers::latest_balance),
        )
        .route("/api/files", get(handlers::list_files))
        .route("/api/files/:id", get(handlers::get_file))
        .route(
            "/api/files/account/:account_id",
            get(handlers::list_account_files),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: IngestionConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = connect_store(&config).await?;
        let state = AppState::new(config.clone(), store)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Ingestion service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            port = self.port,
            "Service ready to accept connections"
        );

        let router = build_router(self.state);
        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

async fn connect_store(config: &IngestionConfig) -> Result<Arc<dyn LedgerStore>, AppError> {
    let Some(database) = &config.database else {
        tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store = PgStore::new(
        &database.url,
        database.max_connections,
        database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
        e
    })?;

    store.run_migrations().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run migrations");
        e
    })?;

    Ok(Arc::new(store))
}
