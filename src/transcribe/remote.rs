//! Remote speech-to-text via an STT bridge
//!
//! Sends the audio file to `POST {base}/transcribe` as multipart form data
//! (`audio` file field, optional `language` field). The bridge answers with
//! `{"text": ..., "language": ...}`.

use super::{preview, TranscribeOptions, Transcription, UNKNOWN_LANGUAGE};
use crate::error::TranscribeError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default request timeout for the bridge
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Client for a remote STT bridge
#[derive(Debug, Clone)]
pub struct RemoteTranscriber {
    /// Base endpoint URL (e.g., "http://192.168.1.100:8791")
    endpoint: String,
    /// Request timeout
    timeout: Duration,
}

impl RemoteTranscriber {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TranscribeError> {
        let endpoint = endpoint.trim();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TranscribeError::ConfigError(format!(
                "STT endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }

        if endpoint.starts_with("http://")
            && !endpoint.contains("localhost")
            && !endpoint.contains("127.0.0.1")
            && !endpoint.contains("[::1]")
        {
            tracing::warn!(
                "Remote STT endpoint uses HTTP without TLS. Audio will be transmitted unencrypted"
            );
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn url(&self) -> String {
        format!("{}/transcribe", self.endpoint)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the multipart form body for the bridge request
    fn build_multipart_body(
        &self,
        file_name: &str,
        audio: &[u8],
        language: Option<&str>,
    ) -> (String, Vec<u8>) {
        let boundary = format!(
            "----VoxpoolBoundary{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );

        let mut body = Vec::new();

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"audio\"; filename=\"{}\"\r\n",
                file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(audio);
        body.extend_from_slice(b"\r\n");

        if let Some(language) = language {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(b"Content-Disposition: form-data; name=\"language\"\r\n\r\n");
            body.extend_from_slice(language.as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        (boundary, body)
    }

    /// Send one audio file to the bridge
    ///
    /// Blocking; run it off the async scheduler.
    pub fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, TranscribeError> {
        let bytes = std::fs::read(audio).map_err(|e| {
            TranscribeError::AudioFormat(format!("Cannot read {}: {}", audio.display(), e))
        })?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav");

        let url = self.url();
        tracing::info!("Remote STT: POST {} file={}", url, audio.display());
        let start = std::time::Instant::now();

        let (boundary, body) = self.build_multipart_body(file_name, &bytes, options.language_hint());

        let response = ureq::post(&url)
            .timeout(self.timeout)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let body = resp.into_string().unwrap_or_default();
                    TranscribeError::RemoteError(format!("Server returned {}: {}", code, body))
                }
                ureq::Error::Transport(t) => {
                    TranscribeError::NetworkError(format!("Request failed: {}", t))
                }
            })?;

        let parsed: BridgeResponse = response.into_json().map_err(|e| {
            TranscribeError::RemoteError(format!("Failed to parse response: {}", e))
        })?;

        let text = parsed.text.unwrap_or_default().trim().to_string();
        let language = parsed
            .language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());

        tracing::info!(
            "Remote STT completed in {:.2}s: lang={} text={:?}",
            start.elapsed().as_secs_f32(),
            language,
            preview(&text)
        );

        Ok(Transcription { text, language })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = RemoteTranscriber::new("not-a-url", DEFAULT_TIMEOUT);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("http://"));
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let remote = RemoteTranscriber::new("http://localhost:8791/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(remote.url(), "http://localhost:8791/transcribe");
        assert_eq!(remote.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_multipart_body_with_language() {
        let remote = RemoteTranscriber::new("http://localhost:8791", DEFAULT_TIMEOUT).unwrap();
        let (boundary, body) = remote.build_multipart_body("clip.wav", &[0u8; 16], Some("ja"));
        let body_str = String::from_utf8_lossy(&body);

        assert!(body_str.contains(&boundary));
        assert!(body_str.contains("name=\"audio\"; filename=\"clip.wav\""));
        assert!(body_str.contains("name=\"language\""));
        assert!(body_str.contains("\r\n\r\nja\r\n"));
        assert!(body_str.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_multipart_body_without_language() {
        let remote = RemoteTranscriber::new("http://localhost:8791", DEFAULT_TIMEOUT).unwrap();
        let (_, body) = remote.build_multipart_body("clip.wav", b"RIFF", None);
        let body_str = String::from_utf8_lossy(&body);

        assert!(body_str.contains("name=\"audio\""));
        assert!(!body_str.contains("name=\"language\""));
    }

    #[test]
    fn test_missing_file_is_an_audio_error() {
        let remote = RemoteTranscriber::new("http://localhost:1", DEFAULT_TIMEOUT).unwrap();
        let err = remote
            .transcribe(Path::new("/nonexistent/clip.wav"), &TranscribeOptions::default())
            .unwrap_err();
        assert!(matches!(err, TranscribeError::AudioFormat(_)));
    }
}
