//! Resource construction and fallback chains
//!
//! [`ResourceFactory`] is the seam between the manager and the concrete
//! backends: it builds exactly one instance per call and knows nothing about
//! slots or retries. The functions in this module wrap it with the fallback
//! policy for each resource kind.

use crate::config::{AiConfig, ProviderConfig, SynthesisConfig, TranscriberConfig};
use crate::device::{self, Device};
use crate::error::{ClientError, ResourceError, TranscribeError};
use crate::llm::{ChatClient, Enhancer, EnhancerLanguage, LanguageClient, LanguageEnhancer};
use crate::registry::ResourceKind;
use crate::synthesis::{SovitsClient, SynthesisClient};
use crate::transcribe::Transcriber;
use std::time::Instant;

/// Builds one instance of each resource kind
pub trait ResourceFactory: Send + Sync {
    /// Load a transcription model on `device`
    fn load_transcriber(
        &self,
        model: &str,
        device: &Device,
        config: &TranscriberConfig,
    ) -> Result<Box<dyn Transcriber>, TranscribeError>;

    fn build_language_client(
        &self,
        provider: &str,
        config: &ProviderConfig,
        ai: &AiConfig,
    ) -> Result<Box<dyn LanguageClient>, ClientError>;

    fn build_synthesis_client(
        &self,
        base_url: &str,
        config: &SynthesisConfig,
    ) -> Result<Box<dyn SynthesisClient>, ClientError>;

    fn build_enhancer(
        &self,
        language: EnhancerLanguage,
        provider: &str,
        config: &ProviderConfig,
        ai: &AiConfig,
    ) -> Result<Box<dyn Enhancer>, ClientError>;

    /// Number of accelerators on this host
    fn accelerator_count(&self) -> usize {
        device::accelerator_count()
    }
}

/// Factory for the bundled backends: whisper.cpp, OpenAI-compatible chat, GPT-SoVITS
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpResourceFactory;

impl ResourceFactory for HttpResourceFactory {
    #[cfg(feature = "whisper")]
    fn load_transcriber(
        &self,
        model: &str,
        device: &Device,
        config: &TranscriberConfig,
    ) -> Result<Box<dyn Transcriber>, TranscribeError> {
        let transcriber = crate::transcribe::whisper::WhisperTranscriber::load(
            model,
            device,
            &config.resolve_models_dir(),
            config.threads,
        )?;
        Ok(Box::new(transcriber))
    }

    #[cfg(not(feature = "whisper"))]
    fn load_transcriber(
        &self,
        model: &str,
        _device: &Device,
        _config: &TranscriberConfig,
    ) -> Result<Box<dyn Transcriber>, TranscribeError> {
        Err(TranscribeError::InitFailed(format!(
            "cannot load {}: voxpool was built without the `whisper` feature",
            model
        )))
    }

    fn build_language_client(
        &self,
        provider: &str,
        config: &ProviderConfig,
        ai: &AiConfig,
    ) -> Result<Box<dyn LanguageClient>, ClientError> {
        let client = ChatClient::new(provider, config, ai.max_retries, ai.timeout())?;
        Ok(Box::new(client))
    }

    fn build_synthesis_client(
        &self,
        base_url: &str,
        config: &SynthesisConfig,
    ) -> Result<Box<dyn SynthesisClient>, ClientError> {
        Ok(Box::new(SovitsClient::new(base_url, config.timeout())?))
    }

    fn build_enhancer(
        &self,
        language: EnhancerLanguage,
        provider: &str,
        config: &ProviderConfig,
        ai: &AiConfig,
    ) -> Result<Box<dyn Enhancer>, ClientError> {
        let client = ChatClient::new(provider, config, ai.max_retries, ai.timeout())?;
        Ok(Box::new(LanguageEnhancer::new(language, client)))
    }
}

/// Load the primary model, falling back once to the smaller model
pub fn load_transcriber(
    factory: &dyn ResourceFactory,
    config: &TranscriberConfig,
) -> Result<Box<dyn Transcriber>, ResourceError> {
    tracing::info!("Loading transcription model {}...", config.model);
    let start = Instant::now();

    let primary_err = match factory.load_transcriber(&config.model, &Device::Auto, config) {
        Ok(model) => {
            tracing::info!(
                "Transcription model {} loaded in {:.2}s",
                config.model,
                start.elapsed().as_secs_f32()
            );
            return Ok(model);
        }
        Err(e) => e,
    };

    let fallback = config
        .fallback_model
        .as_deref()
        .filter(|m| !m.is_empty() && *m != config.model);
    let Some(fallback) = fallback else {
        return Err(ResourceError::load_failed(
            ResourceKind::Transcriber,
            format!("{}: {}", config.model, primary_err),
        ));
    };

    tracing::warn!(
        "Failed to load {} ({}), trying fallback model {}",
        config.model,
        primary_err,
        fallback
    );
    match factory.load_transcriber(fallback, &Device::Auto, config) {
        Ok(model) => {
            tracing::info!(
                "Fallback model {} loaded in {:.2}s",
                fallback,
                start.elapsed().as_secs_f32()
            );
            Ok(model)
        }
        Err(fallback_err) => Err(ResourceError::load_failed(
            ResourceKind::Transcriber,
            format!(
                "{}: {}; fallback {}: {}",
                config.model, primary_err, fallback, fallback_err
            ),
        )),
    }
}

/// Providers to try, in order: the preferred `mode`, then `priority`
pub fn candidate_providers(ai: &AiConfig) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for name in std::iter::once(&ai.mode).chain(ai.priority.iter()) {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !candidates.contains(&name) {
            candidates.push(name);
        }
    }
    candidates
}

/// Build with the first provider that succeeds
///
/// Returns the provider name that was used with the instance. When every
/// candidate fails, the error lists each provider's failure.
pub fn build_with_fallback<T, F>(
    ai: &AiConfig,
    kind: ResourceKind,
    mut build: F,
) -> Result<(String, Box<T>), ResourceError>
where
    T: ?Sized,
    F: FnMut(&str, &ProviderConfig) -> Result<Box<T>, ClientError>,
{
    let mut failures = Vec::new();
    for name in candidate_providers(ai) {
        let Some(provider) = ai.providers.get(&name) else {
            tracing::warn!("{}: provider {} is not configured", kind, name);
            failures.push(format!("{}: not configured", name));
            continue;
        };

        match build(&name, provider) {
            Ok(instance) => return Ok((name, instance)),
            Err(e) => {
                tracing::warn!("{}: provider {} unavailable: {}", kind, name, e);
                failures.push(format!("{}: {}", name, e));
            }
        }
    }

    if failures.is_empty() {
        failures.push("no providers configured".to_string());
    }
    Err(ResourceError::load_failed(kind, failures.join("; ")))
}

/// Build the language client, returning the provider it settled on
pub fn load_language_client(
    factory: &dyn ResourceFactory,
    ai: &AiConfig,
) -> Result<(String, Box<dyn LanguageClient>), ResourceError> {
    tracing::info!("Loading language client...");
    let (used_mode, client) =
        build_with_fallback(ai, ResourceKind::LanguageClient, |name, provider| {
            factory.build_language_client(name, provider, ai)
        })?;
    tracing::info!("Language client loaded ({})", used_mode);
    Ok((used_mode, client))
}

/// Build one enhancer
///
/// On the preferred provider the enhancer runs `enhancement_model`; fallback
/// providers use their own model.
pub fn load_enhancer(
    factory: &dyn ResourceFactory,
    ai: &AiConfig,
    language: EnhancerLanguage,
) -> Result<Box<dyn Enhancer>, ResourceError> {
    tracing::info!("Loading {:?} language enhancer...", language);
    let preferred = ai.mode.trim().to_lowercase();
    let (used_mode, enhancer) = build_with_fallback(ai, language.kind(), |name, provider| {
        if name == preferred && !ai.enhancement_model.is_empty() {
            let provider = ProviderConfig {
                model: ai.enhancement_model.clone(),
                ..provider.clone()
            };
            factory.build_enhancer(language, name, &provider, ai)
        } else {
            factory.build_enhancer(language, name, provider, ai)
        }
    })?;
    tracing::info!("{:?} language enhancer loaded ({})", language, used_mode);
    Ok(enhancer)
}

/// Build the synthesis client for `base_url` and register model weights
///
/// Weight registration failures are logged; the client is still returned.
pub fn load_synthesis_client(
    factory: &dyn ResourceFactory,
    base_url: &str,
    config: &SynthesisConfig,
) -> Result<Box<dyn SynthesisClient>, ResourceError> {
    tracing::info!("Loading synthesis client for {}...", base_url);

    let mut client = factory
        .build_synthesis_client(base_url, config)
        .map_err(|e| ResourceError::load_failed(ResourceKind::SynthesisClient, e.to_string()))?;

    for model in &config.models {
        if let Err(e) = client.add_model(&model.name, &model.gpt_weights, &model.sovits_weights) {
            tracing::error!("Voice model setup error for {}: {}", model.name, e);
        }
    }
    tracing::info!("Synthesis client loaded");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::ChatMessage;
    use crate::transcribe::{TranscribeOptions, Transcription};
    use crate::voice::VoiceProfile;
    use std::path::Path;
    use std::sync::Mutex;

    struct Named(String);

    impl Transcriber for Named {
        fn transcribe(
            &mut self,
            _audio: &Path,
            _options: &TranscribeOptions,
        ) -> Result<Transcription, TranscribeError> {
            Ok(Transcription::new(self.0.clone(), "en"))
        }
    }

    impl LanguageClient for Named {
        fn provider(&self) -> &str {
            &self.0
        }

        fn chat(&self, _messages: &[ChatMessage]) -> Result<String, ClientError> {
            Ok(String::new())
        }
    }

    struct FakeEnhancer {
        language: EnhancerLanguage,
        model: String,
    }

    impl Enhancer for FakeEnhancer {
        fn language(&self) -> EnhancerLanguage {
            self.language
        }

        fn enhance(&self, text: &str) -> Result<String, ClientError> {
            Ok(format!("{}:{}", self.model, text))
        }
    }

    struct FakeSynthesis {
        models: Vec<String>,
    }

    impl SynthesisClient for FakeSynthesis {
        fn base_url(&self) -> &str {
            "http://fake"
        }

        fn add_model(&mut self, name: &str, _gpt: &str, _sovits: &str) -> Result<(), ClientError> {
            if name == "broken" {
                return Err(ClientError::Config("bad weights".into()));
            }
            self.models.push(name.to_string());
            Ok(())
        }

        fn synthesize(&mut self, _text: &str, _voice: &VoiceProfile) -> Result<Vec<u8>, ClientError> {
            Ok(Vec::new())
        }
    }

    /// Fails for every model or provider listed in `broken`
    #[derive(Default)]
    struct FakeFactory {
        broken: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFactory {
        fn failing(broken: &[&'static str]) -> Self {
            Self {
                broken: broken.to_vec(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, name: &str) -> bool {
            self.calls.lock().unwrap().push(name.to_string());
            !self.broken.contains(&name)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ResourceFactory for FakeFactory {
        fn load_transcriber(
            &self,
            model: &str,
            _device: &Device,
            _config: &TranscriberConfig,
        ) -> Result<Box<dyn Transcriber>, TranscribeError> {
            if self.record(model) {
                Ok(Box::new(Named(model.to_string())))
            } else {
                Err(TranscribeError::InitFailed(format!("{} out of memory", model)))
            }
        }

        fn build_language_client(
            &self,
            provider: &str,
            _config: &ProviderConfig,
            _ai: &AiConfig,
        ) -> Result<Box<dyn LanguageClient>, ClientError> {
            if self.record(provider) {
                Ok(Box::new(Named(provider.to_string())))
            } else {
                Err(ClientError::Config(format!("{} has no key", provider)))
            }
        }

        fn build_synthesis_client(
            &self,
            base_url: &str,
            _config: &SynthesisConfig,
        ) -> Result<Box<dyn SynthesisClient>, ClientError> {
            if self.record(base_url) {
                Ok(Box::new(FakeSynthesis { models: Vec::new() }))
            } else {
                Err(ClientError::Network("refused".into()))
            }
        }

        fn build_enhancer(
            &self,
            language: EnhancerLanguage,
            provider: &str,
            config: &ProviderConfig,
            _ai: &AiConfig,
        ) -> Result<Box<dyn Enhancer>, ClientError> {
            if self.record(provider) {
                Ok(Box::new(FakeEnhancer {
                    language,
                    model: config.model.clone(),
                }))
            } else {
                Err(ClientError::Config(format!("{} has no key", provider)))
            }
        }

        fn accelerator_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_transcriber_primary() {
        let factory = FakeFactory::default();
        let mut model = load_transcriber(&factory, &TranscriberConfig::default()).unwrap();
        let text = model
            .transcribe(Path::new("a.wav"), &TranscribeOptions::default())
            .unwrap()
            .text;
        assert_eq!(text, "large-v3");
        assert_eq!(factory.calls(), vec!["large-v3"]);
    }

    #[test]
    fn test_transcriber_falls_back_once() {
        let factory = FakeFactory::failing(&["large-v3"]);
        let mut model = load_transcriber(&factory, &TranscriberConfig::default()).unwrap();
        let text = model
            .transcribe(Path::new("a.wav"), &TranscribeOptions::default())
            .unwrap()
            .text;
        assert_eq!(text, "base");
        assert_eq!(factory.calls(), vec!["large-v3", "base"]);
    }

    #[test]
    fn test_transcriber_both_fail() {
        let factory = FakeFactory::failing(&["large-v3", "base"]);
        let err = load_transcriber(&factory, &TranscriberConfig::default())
            .map(|_| ())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("large-v3 out of memory"));
        assert!(message.contains("base out of memory"));
    }

    #[test]
    fn test_transcriber_without_fallback_model() {
        let factory = FakeFactory::failing(&["large-v3"]);
        let config = TranscriberConfig {
            fallback_model: None,
            ..Default::default()
        };
        assert!(load_transcriber(&factory, &config).is_err());
        assert_eq!(factory.calls(), vec!["large-v3"]);
    }

    #[test]
    fn test_candidate_providers_dedup() {
        let ai = AiConfig {
            mode: "DeepSeek".to_string(),
            priority: vec!["openai".into(), "deepseek".into(), " ollama ".into()],
            ..Default::default()
        };
        assert_eq!(candidate_providers(&ai), vec!["deepseek", "openai", "ollama"]);
    }

    #[test]
    fn test_language_client_uses_first_viable_provider() {
        let factory = FakeFactory::failing(&["openai"]);
        let (used_mode, client) = load_language_client(&factory, &AiConfig::default()).unwrap();
        assert_eq!(used_mode, "deepseek");
        assert_eq!(client.provider(), "deepseek");
        assert_eq!(factory.calls(), vec!["openai", "deepseek"]);
    }

    #[test]
    fn test_language_client_all_providers_fail() {
        let factory = FakeFactory::failing(&["openai", "deepseek", "ollama"]);
        let err = load_language_client(&factory, &AiConfig::default())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::LoadFailed {
                kind: ResourceKind::LanguageClient,
                ..
            }
        ));
        assert!(err.to_string().contains("ollama has no key"));
    }

    #[test]
    fn test_unconfigured_provider_is_skipped() {
        let factory = FakeFactory::default();
        let ai = AiConfig {
            mode: "mistral".to_string(),
            ..Default::default()
        };
        let (used_mode, _client) = load_language_client(&factory, &ai).unwrap();
        assert_eq!(used_mode, "openai");
    }

    #[test]
    fn test_enhancer_model_on_preferred_provider_only() {
        let factory = FakeFactory::default();
        let ai = AiConfig::default();
        let enhancer = load_enhancer(&factory, &ai, EnhancerLanguage::English).unwrap();
        assert_eq!(enhancer.enhance("hi").unwrap(), "gpt-4o-mini:hi");

        let factory = FakeFactory::failing(&["openai"]);
        let enhancer = load_enhancer(&factory, &ai, EnhancerLanguage::Japanese).unwrap();
        assert_eq!(enhancer.enhance("hi").unwrap(), "deepseek-chat:hi");
        assert_eq!(enhancer.language(), EnhancerLanguage::Japanese);
    }

    #[test]
    fn test_synthesis_registration_errors_are_not_fatal() {
        let factory = FakeFactory::default();
        let mut config = Config::default();
        config.synthesis.models.push(crate::config::SynthesisModelConfig {
            name: "broken".into(),
            gpt_weights: "a".into(),
            sovits_weights: "b".into(),
        });
        let client =
            load_synthesis_client(&factory, config.synthesis_base_url(), &config.synthesis).unwrap();
        assert_eq!(client.base_url(), "http://fake");
        assert_eq!(factory.calls(), vec!["http://127.0.0.1:9880"]);
    }

    #[test]
    fn test_synthesis_client_failure() {
        let factory = FakeFactory::failing(&["http://127.0.0.1:9880"]);
        let config = Config::default();
        let result =
            load_synthesis_client(&factory, config.synthesis_base_url(), &config.synthesis);
        assert!(matches!(
            result.map(|_| ()),
            Err(ResourceError::LoadFailed {
                kind: ResourceKind::SynthesisClient,
                ..
            })
        ));
    }
}
