//! HTTP service
//!
//! Serves the completions proxy, the upload route, a canned chat route and
//! the uploaded files themselves. Every response carries permissive CORS
//! headers.

pub mod chat;
pub mod proxy;
pub mod upload;

use crate::config::{Config, ProviderConfig};
use crate::error::{HelpdeskError, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub provider: ProviderConfig,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Build route state from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the upstream HTTP client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider.timeout_seconds))
            .build()
            .map_err(|e| HelpdeskError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            provider: config.provider.clone(),
            public_dir: config.server.public_dir.clone(),
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }

    /// Directory uploads are written to and served from
    pub fn upload_dir(&self) -> PathBuf {
        self.public_dir.join("uploads")
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-openrouter-key"),
            header::AUTHORIZATION,
        ])
        .max_age(Duration::from_secs(86400))
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    // room for multipart framing so oversized files reach the size check
    let body_limit = state.max_upload_bytes.saturating_mul(2);
    let uploads = ServeDir::new(state.upload_dir());

    Router::new()
        .route("/api/openrouter", post(proxy::forward_completion))
        .route(
            "/api/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/chat", get(chat::greeting).post(chat::mock_reply))
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Run the service until interrupted
///
/// # Errors
///
/// Returns error if the bind address is invalid or cannot be bound
pub async fn serve(config: &Config) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| HelpdeskError::Config(format!("Invalid bind address: {}", e)))?;

    let state = AppState::new(config)?;
    tracing::info!(
        upstream = %state.provider.completions_url(),
        uploads = %state.upload_dir().display(),
        "Starting HTTP service"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
