//! Error types for voxpool
//!
//! Uses thiserror for ergonomic error definitions. Load-time failures for
//! mandatory resources surface as `VoxpoolError`; per-request failures on the
//! transcription path are converted to neutral results by the router and
//! never reach callers.

use crate::registry::ResourceKind;
use thiserror::Error;

/// Top-level error type for the voxpool application
#[derive(Error, Debug)]
pub enum VoxpoolError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Transcription error: {0}")]
    Transcribe(#[from] TranscribeError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Profile store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the resource registry and loaders
///
/// Cloneable so that one failed load can be handed to every caller that was
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("{0} is not loaded")]
    NotReady(ResourceKind),

    #[error("{kind} failed to load: {reason}")]
    LoadFailed { kind: ResourceKind, reason: String },

    #[error("Transcription pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl ResourceError {
    pub fn load_failed(kind: ResourceKind, reason: impl Into<String>) -> Self {
        ResourceError::LoadFailed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors related to speech-to-text transcription
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Transcription failed: {0}")]
    InferenceFailed(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Remote server error: {0}")]
    RemoteError(String),
}

/// Errors from the HTTP-backed language and synthesis clients
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote server error: {0}")]
    Remote(String),

    #[error("Unexpected response: {0}")]
    Response(String),
}

impl From<ureq::Error> for ClientError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                ClientError::Remote(format!("Server returned {}: {}", code, body))
            }
            ureq::Error::Transport(t) => ClientError::Network(format!("Request failed: {}", t)),
        }
    }
}

/// Result type alias using VoxpoolError
pub type Result<T> = std::result::Result<T, VoxpoolError>;
