//! Language-model clients
//!
//! The shared language client and the two language enhancers all talk to an
//! OpenAI-compatible `chat/completions` endpoint. Which provider backs them is
//! decided by the loader's fallback chain (see [`crate::loader`]).

use crate::config::ProviderConfig;
use crate::error::ClientError;
use crate::registry::ResourceKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat message in OpenAI wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Shared language-model client
pub trait LanguageClient: Send {
    /// Provider this client was built for, e.g. "openai"
    fn provider(&self) -> &str;

    /// Run a chat completion and return the assistant text
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ClientError>;
}

/// OpenAI-compatible chat client over ureq
#[derive(Clone)]
pub struct ChatClient {
    provider: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    agent: ureq::Agent,
}

impl ChatClient {
    /// Build a client for `provider`
    ///
    /// Fails when the provider declares an API key variable that is not set.
    pub fn new(
        provider: &str,
        config: &ProviderConfig,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "{} base_url must start with http:// or https://, got: {}",
                provider, config.base_url
            )));
        }

        let api_key = match config.api_key_env.as_deref() {
            Some(var) => {
                let key = std::env::var(var)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        ClientError::Config(format!("{} requires ${} to be set", provider, var))
                    })?;
                Some(key)
            }
            None => None,
        };

        Ok(Self {
            provider: provider.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_retries,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn send_once(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        #[derive(Serialize)]
        struct CompletionRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
        }

        #[derive(Deserialize)]
        struct CompletionResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessage,
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.agent.post(&url);
        if let Some(ref key) = self.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response: CompletionResponse = request
            .send_json(CompletionRequest {
                model: &self.model,
                messages,
            })?
            .into_json()
            .map_err(|e| ClientError::Response(format!("Failed to parse completion: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClientError::Response("Completion has no choices".to_string()))
    }
}

impl LanguageClient for ChatClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let mut attempt = 0;
        loop {
            match self.send_once(messages) {
                Ok(text) => return Ok(text),
                Err(e @ (ClientError::Network(_) | ClientError::Remote(_)))
                    if attempt < self.max_retries =>
                {
                    attempt += 1;
                    tracing::warn!(
                        "{} request failed ({}), retry {}/{}",
                        self.provider,
                        e,
                        attempt,
                        self.max_retries
                    );
                    std::thread::sleep(Duration::from_millis(250 * attempt as u64));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Target language of an enhancer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancerLanguage {
    Japanese,
    English,
}

impl EnhancerLanguage {
    pub fn kind(&self) -> ResourceKind {
        match self {
            EnhancerLanguage::Japanese => ResourceKind::JapaneseEnhancer,
            EnhancerLanguage::English => ResourceKind::EnglishEnhancer,
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            EnhancerLanguage::Japanese => {
                "You polish Japanese text produced by speech recognition. Fix misrecognised \
                 words, kanji and punctuation while keeping the speaker's meaning and tone. \
                 Reply with the corrected text only."
            }
            EnhancerLanguage::English => {
                "You polish English text produced by speech recognition. Fix misrecognised \
                 words, grammar and punctuation while keeping the speaker's meaning and tone. \
                 Reply with the corrected text only."
            }
        }
    }
}

/// Language-specific text enhancer
pub trait Enhancer: Send {
    fn language(&self) -> EnhancerLanguage;

    /// Return an improved version of `text`
    fn enhance(&self, text: &str) -> Result<String, ClientError>;
}

/// Enhancer backed by a chat model
pub struct LanguageEnhancer {
    language: EnhancerLanguage,
    client: ChatClient,
}

impl LanguageEnhancer {
    pub fn new(language: EnhancerLanguage, client: ChatClient) -> Self {
        Self { language, client }
    }
}

impl Enhancer for LanguageEnhancer {
    fn language(&self) -> EnhancerLanguage {
        self.language
    }

    fn enhance(&self, text: &str) -> Result<String, ClientError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let messages = [
            ChatMessage::system(self.language.system_prompt()),
            ChatMessage::user(text),
        ];
        let enhanced = self.client.chat(&messages)?.trim().to_string();
        if enhanced.is_empty() {
            tracing::warn!("{:?} enhancer returned empty text, keeping original", self.language);
            return Ok(text.to_string());
        }
        Ok(enhanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base_url: &str, api_key_env: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: api_key_env.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_api_key_fails() {
        let cfg = provider(
            "https://api.example.com/v1",
            Some("VOXPOOL_TEST_KEY_THAT_IS_NEVER_SET"),
        );
        let err = ChatClient::new("openai", &cfg, 3, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(err.to_string().contains("VOXPOOL_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_keyless_provider_builds() {
        let cfg = provider("http://127.0.0.1:11434/v1/", None);
        let client = ChatClient::new("ollama", &cfg, 0, Duration::from_secs(5)).unwrap();
        assert_eq!(client.provider(), "ollama");
        assert_eq!(client.base_url, "http://127.0.0.1:11434/v1");
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_invalid_base_url() {
        let cfg = provider("api.example.com", None);
        assert!(ChatClient::new("custom", &cfg, 0, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_enhancer_skips_blank_text() {
        let cfg = provider("http://127.0.0.1:1", None);
        let client = ChatClient::new("ollama", &cfg, 0, Duration::from_millis(100)).unwrap();
        let enhancer = LanguageEnhancer::new(EnhancerLanguage::Japanese, client);
        assert_eq!(enhancer.enhance("  ").unwrap(), "  ");
        assert_eq!(enhancer.language().kind(), ResourceKind::JapaneseEnhancer);
    }

    #[test]
    fn test_chat_message_wire_format() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "user", "content": "hi" }));
    }
}
