//! Speech-to-text transcription module
//!
//! Provides transcription via:
//! - Local whisper.cpp inference (whisper-rs crate, `whisper` feature)
//! - A remote STT bridge speaking `POST {base}/transcribe`

pub mod remote;
#[cfg(feature = "whisper")]
pub mod whisper;

use crate::error::TranscribeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Language marker reported when detection failed or never ran
pub const UNKNOWN_LANGUAGE: &str = "auto";

/// Trait for speech-to-text model instances
///
/// Instances are not assumed to be thread-safe: they are always used through
/// a [`crate::registry::Handle`] whose mutex serializes access.
pub trait Transcriber: Send {
    /// Transcribe an audio file (WAV) to text
    fn transcribe(
        &mut self,
        audio: &Path,
        options: &TranscribeOptions,
    ) -> Result<Transcription, TranscribeError>;
}

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// Language hint; `None` or "auto" lets the model detect it
    #[serde(default)]
    pub language: Option<String>,
    /// Initial prompt (local backends only)
    #[serde(default)]
    pub prompt: Option<String>,
}

impl TranscribeOptions {
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            prompt: None,
        }
    }

    /// The language hint, if it names a concrete language
    pub fn language_hint(&self) -> Option<&str> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case(UNKNOWN_LANGUAGE))
    }
}

/// Transcribed text and the detected (or requested) language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

impl Transcription {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }

    /// Neutral result used whenever a transcription attempt fails
    pub fn unknown() -> Self {
        Self::new("", UNKNOWN_LANGUAGE)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Shorten text for log lines
pub(crate) fn preview(text: &str) -> String {
    if text.chars().count() > 80 {
        format!("{}...", text.chars().take(80).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_transcription() {
        let t = Transcription::unknown();
        assert_eq!(t.text, "");
        assert_eq!(t.language, "auto");
        assert!(t.is_empty());
    }

    #[test]
    fn test_language_hint() {
        assert_eq!(TranscribeOptions::default().language_hint(), None);
        assert_eq!(TranscribeOptions::with_language("auto").language_hint(), None);
        assert_eq!(TranscribeOptions::with_language(" ").language_hint(), None);
        assert_eq!(TranscribeOptions::with_language("ja").language_hint(), Some("ja"));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "a".repeat(100);
        assert_eq!(preview(&long).len(), 83);
        assert_eq!(preview("short"), "short");
    }
}
