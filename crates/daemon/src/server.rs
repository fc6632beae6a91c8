//! HTTP server exposing the upload and download endpoints.
//!
//! Routes:
//! - `POST /upload`: one file under the `file` field
//! - `POST /upload-multiple`: every file under the `files` field
//! - `GET|HEAD /files/{name}`: inline display
//! - `GET|HEAD /download/{name}?as=<name>`: forced download

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use transfer::{
    save_many, save_one, serve, DownloadError, DownloadPolicy, SavedFile, ServingRoot,
    UploadError, UploadPolicy,
};

use crate::config::Config;

/// Multipart field read by `POST /upload`.
pub const SINGLE_FIELD: &str = "file";
/// Multipart field read by `POST /upload-multiple`.
pub const MULTIPLE_FIELD: &str = "files";
/// Name prefix for single uploads when none is configured.
pub const SINGLE_PREFIX: &str = "upload_";
/// Name prefix for batch uploads when none is configured.
pub const MULTIPLE_PREFIX: &str = "multi_";

/// Shared per-route policies, built once from the configuration.
#[derive(Debug, Clone)]
pub struct AppState {
    single: Arc<UploadPolicy>,
    multiple: Arc<UploadPolicy>,
    root: Arc<ServingRoot>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            single: Arc::new(config.upload_policy(SINGLE_PREFIX)),
            multiple: Arc::new(config.upload_policy(MULTIPLE_PREFIX)),
            root: Arc::new(config.serving_root()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(rename = "as")]
    suggested: Option<String>,
}

/// Build the application router.
pub fn router(config: &Config) -> Router {
    let body_limit = usize::try_from(config.server.max_request_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(upload))
        .route("/upload-multiple", post(upload_multiple))
        .route("/files/{name}", get(view_file))
        .route("/download/{name}", get(download_file))
        .with_state(AppState::from_config(config))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
}

async fn upload(
    State(state): State<AppState>,
    request: Request,
) -> Result<(StatusCode, Json<SavedFile>), UploadError> {
    let saved = save_one(request, SINGLE_FIELD, &state.single).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn upload_multiple(
    State(state): State<AppState>,
    request: Request,
) -> Result<(StatusCode, Json<Vec<SavedFile>>), UploadError> {
    let saved = save_many(request, MULTIPLE_FIELD, &state.multiple).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn view_file(
    State(state): State<AppState>,
    method: Method,
    Path(name): Path<String>,
) -> Result<Response, DownloadError> {
    serve(&method, &state.root, &name, &DownloadPolicy::inline()).await
}

async fn download_file(
    State(state): State<AppState>,
    method: Method,
    Path(name): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, DownloadError> {
    let mut policy = DownloadPolicy::attachment().with_header("X-Download-Type", "attachment");
    if let Some(suggested) = query.suggested {
        policy = policy.with_suggested_filename(suggested);
    }

    serve(&method, &state.root, &name, &policy).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, config: &Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!(
        "Listening on {} (uploads: {:?}, downloads: {:?})",
        addr,
        config.uploads.destination_dir,
        config.downloads.root
    );

    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve_on(listener, config, wait_for_shutdown_signal()).await
}

/// Wait for a shutdown signal (SIGTERM or Ctrl-C).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_state_prefixes() {
        let mut config = Config::default();
        config.uploads.destination_dir = PathBuf::from("/tmp/bindle");
        config.downloads.root = PathBuf::from("/tmp/bindle");
        let state = AppState::from_config(&config);

        assert_eq!(state.single.filename_prefix(), SINGLE_PREFIX);
        assert_eq!(state.multiple.filename_prefix(), MULTIPLE_PREFIX);
        assert_eq!(state.root.path(), std::path::Path::new("/tmp/bindle"));
    }

    #[test]
    fn test_state_shares_configured_limits() {
        let mut config = Config::default();
        config.uploads.max_size = 1234;
        let state = AppState::from_config(&config);

        assert_eq!(state.single.max_size_bytes(), 1234);
        assert_eq!(state.multiple.max_size_bytes(), 1234);
    }
}
