//! HTTP surface (axum).
//!
//! | Route | Method | Returns |
//! |-------|--------|---------|
//! | `/` | GET | upload form |
//! | `/health` | GET | `OK` |
//! | `/convert_single/` | POST (multipart) | `text/plain` document |
//! | `/convert_multiple/` | POST (multipart) | `application/zip` |
//! | `/convert_directory/{input_dir}` | GET | `application/zip` |
//!
//! `input_dir` is resolved strictly inside [`ServerConfig::input_root`].

pub mod errors;
pub mod handlers;

use crate::config::ServerConfig;
use crate::convert::Converter;
use crate::error::Sheet2MdError;
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub converter: Converter,
    pub input_root: Arc<PathBuf>,
}

impl AppState {
    pub fn new(converter: Converter, input_root: impl Into<PathBuf>) -> Self {
        Self {
            converter,
            input_root: Arc::new(input_root.into()),
        }
    }
}

/// Build the router with every route and the request-tracing layer.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/convert_single/", post(handlers::convert_single))
        .route("/convert_multiple/", post(handlers::convert_multiple))
        .route(
            "/convert_directory/{input_dir}",
            get(handlers::convert_directory),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve_on(
    listener: TcpListener,
    converter: Converter,
    config: &ServerConfig,
) -> Result<(), Sheet2MdError> {
    let state = AppState::new(converter, config.input_root.clone());
    let app = create_router(state, config.max_upload_bytes);

    let addr = listener
        .local_addr()
        .map_err(|e| Sheet2MdError::Internal(format!("local_addr: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| Sheet2MdError::Internal(format!("server: {e}")))
}

/// Bind `config.host:config.port` and serve.
pub async fn serve(converter: Converter, config: &ServerConfig) -> Result<(), Sheet2MdError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            Sheet2MdError::Internal(format!(
                "cannot bind {}:{}: {e}",
                config.host, config.port
            ))
        })?;
    serve_on(listener, converter, config).await
}
