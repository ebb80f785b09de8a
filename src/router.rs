//! Remote/local routing for speech capabilities
//!
//! Speech-to-text goes to the remote bridge when remote mode is configured or
//! no local model is available, and to a local instance otherwise. Either way
//! the blocking work runs on tokio's blocking pool, and any failure turns into
//! the neutral [`Transcription::unknown`] result.

use crate::config::{Config, Mode};
use crate::device::Device;
use crate::error::TranscribeError;
use crate::pool::TranscriberPool;
use crate::registry::Handle;
use crate::transcribe::remote::RemoteTranscriber;
use crate::transcribe::{TranscribeOptions, Transcriber, Transcription};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a transcription request will be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttRoute {
    Remote,
    Local,
    /// Neither a local model nor a remote endpoint
    Unavailable,
}

/// The local model(s) a request may use
#[derive(Clone)]
pub enum LocalTarget {
    Pool(Arc<TranscriberPool>),
    /// The default instance, when pooling is disabled or never built
    Single(Handle<dyn Transcriber>),
}

pub struct SpeechRouter {
    stt_mode: Mode,
    remote: Option<Arc<RemoteTranscriber>>,
    synthesis_base_url: String,
}

impl SpeechRouter {
    pub fn new(config: &Config) -> Result<Self, TranscribeError> {
        let remote = match config.transcriber.remote_endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => Some(Arc::new(
                RemoteTranscriber::new(endpoint, config.transcriber.remote_timeout())?,
            )),
            _ => None,
        };

        Ok(Self {
            stt_mode: config.transcriber.mode,
            remote,
            synthesis_base_url: config.synthesis_base_url().to_string(),
        })
    }

    pub fn stt_mode(&self) -> Mode {
        self.stt_mode
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Base URL the synthesis client is pointed at
    pub fn synthesis_base_url(&self) -> &str {
        &self.synthesis_base_url
    }

    pub fn route(&self, local_available: bool) -> SttRoute {
        match (self.stt_mode, local_available, self.remote.is_some()) {
            (Mode::Remote, _, true) => SttRoute::Remote,
            (Mode::Remote, _, false) => SttRoute::Unavailable,
            (Mode::Local, true, _) => SttRoute::Local,
            (Mode::Local, false, true) => SttRoute::Remote,
            (Mode::Local, false, false) => SttRoute::Unavailable,
        }
    }

    /// Transcribe `audio`, never failing
    pub async fn transcribe(
        &self,
        local: Option<LocalTarget>,
        audio: PathBuf,
        options: TranscribeOptions,
    ) -> Transcription {
        let route = self.route(local.is_some());
        tracing::debug!("Routing transcription of {:?} to {:?}", audio, route);

        let joined = match (route, self.remote.as_ref(), local) {
            (SttRoute::Remote, Some(remote), _) => {
                let remote = Arc::clone(remote);
                tokio::task::spawn_blocking(move || remote.transcribe(&audio, &options)).await
            }
            (SttRoute::Local, _, Some(target)) => {
                tokio::task::spawn_blocking(move || run_local(target, &audio, &options)).await
            }
            _ => {
                tracing::warn!("No transcriber available (local STT not loaded, no remote endpoint)");
                return Transcription::unknown();
            }
        };

        match joined {
            Ok(Ok(transcription)) => transcription,
            Ok(Err(e)) => {
                tracing::error!("Transcription via {:?} failed: {}", route, e);
                Transcription::unknown()
            }
            Err(e) => {
                tracing::error!("Transcription task failed: {}", e);
                Transcription::unknown()
            }
        }
    }
}

/// Run one transcription on a local instance, holding its lock for the call
fn run_local(
    target: LocalTarget,
    audio: &Path,
    options: &TranscribeOptions,
) -> Result<Transcription, TranscribeError> {
    let (handle, device) = match target {
        LocalTarget::Pool(pool) => {
            let instance = pool.checkout();
            (Arc::clone(instance.handle()), instance.device())
        }
        LocalTarget::Single(handle) => (handle, Device::Auto),
    };

    let mut model = handle.lock().map_err(|e| {
        TranscribeError::InferenceFailed(format!("Transcriber on {} is poisoned: {}", device, e))
    })?;
    tracing::debug!("Transcribing {:?} on {}", audio, device);
    model.transcribe(audio, options)
}
