//! Speech synthesis client
//!
//! Talks to a GPT-SoVITS `api_v2` server. The server holds one pair of model
//! weights at a time, so the client remembers which registered model is active
//! and switches weights before synthesizing with a voice bound to another one.

use crate::error::ClientError;
use crate::voice::VoiceProfile;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

/// Upper bound on a synthesized clip, to protect against runaway responses
const MAX_AUDIO_BYTES: u64 = 64 * 1024 * 1024;

/// Voice synthesis client shared through the manager
pub trait SynthesisClient: Send {
    /// Server this client talks to
    fn base_url(&self) -> &str;

    /// Register model weights under `name` so voices can refer to it
    fn add_model(
        &mut self,
        name: &str,
        gpt_weights: &str,
        sovits_weights: &str,
    ) -> Result<(), ClientError>;

    /// Synthesize `text` in the given voice, returning WAV bytes
    fn synthesize(&mut self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelWeights {
    gpt: String,
    sovits: String,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    text_lang: &'a str,
    ref_audio_path: String,
    prompt_text: &'a str,
    prompt_lang: &'a str,
    media_type: &'static str,
}

/// GPT-SoVITS HTTP client
pub struct SovitsClient {
    base_url: String,
    agent: ureq::Agent,
    models: HashMap<String, ModelWeights>,
    active_model: Option<String>,
}

impl SovitsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "synthesis URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            models: HashMap::new(),
            active_model: None,
        })
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    fn activate(&mut self, name: &str) -> Result<(), ClientError> {
        if self.active_model.as_deref() == Some(name) {
            return Ok(());
        }
        let Some(weights) = self.models.get(name).cloned() else {
            // Unregistered models are whatever the server currently has loaded.
            return Ok(());
        };

        tracing::info!("Switching synthesis weights to {}", name);
        self.agent
            .get(&format!("{}/set_gpt_weights", self.base_url))
            .query("weights_path", &weights.gpt)
            .call()?;
        self.agent
            .get(&format!("{}/set_sovits_weights", self.base_url))
            .query("weights_path", &weights.sovits)
            .call()?;
        self.active_model = Some(name.to_string());
        Ok(())
    }
}

impl SynthesisClient for SovitsClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn add_model(
        &mut self,
        name: &str,
        gpt_weights: &str,
        sovits_weights: &str,
    ) -> Result<(), ClientError> {
        if name.trim().is_empty() || gpt_weights.trim().is_empty() || sovits_weights.trim().is_empty()
        {
            return Err(ClientError::Config(format!(
                "model '{}' needs a name and both weight paths",
                name
            )));
        }

        let weights = ModelWeights {
            gpt: gpt_weights.to_string(),
            sovits: sovits_weights.to_string(),
        };
        if self.models.insert(name.to_string(), weights).is_some()
            && self.active_model.as_deref() == Some(name)
        {
            self.active_model = None;
        }
        tracing::debug!("Registered synthesis model {}", name);
        Ok(())
    }

    fn synthesize(&mut self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, ClientError> {
        self.activate(&voice.model_name)?;

        let start = std::time::Instant::now();
        let response = self
            .agent
            .post(&format!("{}/tts", self.base_url))
            .send_json(TtsRequest {
                text,
                text_lang: &voice.ref_lang,
                ref_audio_path: voice.ref_audio.to_string_lossy().into_owned(),
                prompt_text: &voice.ref_text,
                prompt_lang: &voice.ref_lang,
                media_type: "wav",
            })?;

        let mut audio = Vec::new();
        response
            .into_reader()
            .take(MAX_AUDIO_BYTES)
            .read_to_end(&mut audio)
            .map_err(|e| ClientError::Response(format!("Failed to read audio: {}", e)))?;
        if audio.is_empty() {
            return Err(ClientError::Response("Server returned no audio".to_string()));
        }

        tracing::info!(
            "Synthesized {} bytes with voice {} in {:.2}s",
            audio.len(),
            voice.key,
            start.elapsed().as_secs_f32()
        );
        Ok(audio)
    }
}
