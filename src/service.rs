//! HTTP bridge service.
//!
//! Exposes a [`ModelManager`] over HTTP so other hosts can use it as their
//! remote STT endpoint:
//! - `GET /healthz`
//! - `GET /status`
//! - `GET /voices/{key}`
//! - `POST /transcribe` (multipart `audio` file, optional `language`)

use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::config::ServiceConfig;
use crate::error::VoxpoolError;
use crate::manager::{ManagerStatus, ModelManager};
use crate::transcribe::{TranscribeOptions, Transcription};
use crate::voice::VoiceProfile;

#[derive(Clone)]
struct AppState {
    manager: Arc<ModelManager>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Serialize)]
struct ApiErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    error_type: &'static str,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error_type: "invalid_request_error",
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            error_type: "not_found_error",
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            error_type: "server_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                message: self.message,
                error_type: self.error_type.to_string(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Running bridge service handle.
pub struct ServiceHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ServiceHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::warn!("Service task join error: {}", e);
        }
    }
}

/// Bind the listener and serve `manager` in the background
pub async fn start(
    manager: Arc<ModelManager>,
    service_cfg: &ServiceConfig,
) -> Result<ServiceHandle, VoxpoolError> {
    let bind_addr = format!("{}:{}", service_cfg.host, service_cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| {
            VoxpoolError::Config(format!(
                "Failed to bind service listener on {}: {}",
                bind_addr, e
            ))
        })?;
    let local_addr = listener.local_addr().map_err(|e| {
        VoxpoolError::Config(format!("Failed to read service local address: {}", e))
    })?;

    let app = build_router(AppState { manager }, service_cfg.max_upload_bytes);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            tracing::error!("Service HTTP server failed: {}", e);
        }
    });

    tracing::info!("Bridge service listening on http://{}", local_addr);
    Ok(ServiceHandle {
        addr: local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status_handler))
        .route("/voices/:key", get(voice_handler))
        .route("/transcribe", post(transcribe_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<ManagerStatus>, ApiError> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.status())
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Status task failed: {}", e)))
}

async fn voice_handler(
    State(state): State<AppState>,
    UrlPath(key): UrlPath<String>,
) -> Result<Json<VoiceProfile>, ApiError> {
    let manager = Arc::clone(&state.manager);
    let lookup = key.clone();
    tokio::task::spawn_blocking(move || manager.voices().get_config(&lookup))
        .await
        .map_err(|e| ApiError::internal(format!("Voice lookup task failed: {}", e)))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Unknown voice '{}'", key)))
}

async fn transcribe_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Transcription>, ApiError> {
    let _session = state.manager.connections().track();

    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut language: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart request: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "audio" => {
                let file_name = field.file_name().unwrap_or("audio.wav").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read audio field: {}", e))
                })?;
                audio = Some((file_name, bytes.to_vec()));
            }
            "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid language field: {}", e)))?;
                language = Some(value.trim().to_lowercase()).filter(|l| !l.is_empty());
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        audio.ok_or_else(|| ApiError::bad_request("Missing required multipart field: audio"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Audio payload is empty"));
    }

    let suffix = std::path::Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_else(|| ".wav".to_string());
    let upload = tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("voxpool-upload-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Upload task failed: {}", e)))?
    .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;

    let options = TranscribeOptions {
        language,
        prompt: None,
    };
    let transcription = state
        .manager
        .transcribe(upload.path().to_path_buf(), options)
        .await;

    Ok(Json(transcription))
}
