//! Configuration loading and types for voxpool
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxpool/config.toml)
//! 3. Environment variables (VOXPOOL_*)
//! 4. CLI arguments (highest priority)

use crate::error::VoxpoolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a routable capability runs
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// In-process models (default)
    #[default]
    Local,
    /// HTTP bridge on another host
    Remote,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transcriber: TranscriberConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub voices: VoicesConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// "local" runs whisper in-process, "remote" sends audio to `remote_endpoint`
    pub mode: Mode,

    /// Primary model name (e.g. "large-v3") or path to a .bin file
    pub model: String,

    /// Smaller model tried once if the primary fails to load
    pub fallback_model: Option<String>,

    /// STT bridge base URL, e.g. "http://192.168.1.100:8791"
    pub remote_endpoint: Option<String>,

    pub remote_timeout_secs: u64,

    /// Build a pool of instances across `devices`
    pub enable_pool: bool,

    /// Explicit device list (["0", "1"], ["cpu"]); empty = every detected accelerator
    pub devices: Vec<String>,

    pub replicas_per_device: usize,

    /// Never load a local model, even with an accelerator present
    pub disabled: bool,

    /// Only load a local model when an accelerator is present
    pub require_accelerator: bool,

    /// Inference threads per instance (None = auto-detect)
    pub threads: Option<usize>,

    /// Where ggml model files live (None = data dir)
    pub models_dir: Option<PathBuf>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            model: "large-v3".to_string(),
            fallback_model: Some("base".to_string()),
            remote_endpoint: None,
            remote_timeout_secs: 60,
            enable_pool: true,
            devices: Vec::new(),
            replicas_per_device: 1,
            disabled: false,
            require_accelerator: true,
            threads: None,
            models_dir: None,
        }
    }
}

impl TranscriberConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    pub fn replicas(&self) -> usize {
        self.replicas_per_device.max(1)
    }

    pub fn resolve_models_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(Config::models_dir)
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub mode: Mode,

    /// GPT-SoVITS server used in local mode
    pub local_url: String,

    /// TTS bridge used in remote mode
    pub remote_url: Option<String>,

    pub timeout_secs: u64,

    /// Model weights registered on the client after it loads
    pub models: Vec<SynthesisModelConfig>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            local_url: "http://127.0.0.1:9880".to_string(),
            remote_url: None,
            timeout_secs: 120,
            models: vec![SynthesisModelConfig {
                name: "ayano".to_string(),
                gpt_weights: "GPT_weights_v2ProPlus/ayano-e15.ckpt".to_string(),
                sovits_weights: "SoVITS_weights_v2ProPlus/ayano_e8_s40.pth".to_string(),
            }],
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SynthesisModelConfig {
    pub name: String,
    pub gpt_weights: String,
    pub sovits_weights: String,
}

/// Language-model provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiConfig {
    /// Preferred provider, tried first
    pub mode: String,

    /// Providers tried in order after `mode` fails
    pub priority: Vec<String>,

    /// Retries per request on network errors and 5xx responses
    pub max_retries: u32,

    pub timeout_secs: u64,

    /// Model the enhancers use on the preferred provider (`mode`)
    pub enhancement_model: String,

    /// Known providers by name. A table here replaces the built-in set.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
            },
        );
        providers.insert(
            "deepseek".to_string(),
            ProviderConfig {
                base_url: "https://api.deepseek.com/v1".to_string(),
                model: "deepseek-chat".to_string(),
                api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
            },
        );
        providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                base_url: "http://127.0.0.1:11434/v1".to_string(),
                model: "llama3.1".to_string(),
                api_key_env: None,
            },
        );

        Self {
            mode: "openai".to_string(),
            priority: vec![
                "openai".to_string(),
                "deepseek".to_string(),
                "ollama".to_string(),
            ],
            max_retries: 3,
            timeout_secs: 60,
            enhancement_model: "gpt-4o-mini".to_string(),
            providers,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// One OpenAI-compatible endpoint
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key (None = no auth)
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Voice profile configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Base directory for relative reference-audio paths (None = data dir)
    pub root: Option<PathBuf>,

    /// SQLite database with user voices.
    /// "auto" uses the data dir, "disabled" turns persistence off.
    pub database: String,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            root: None,
            database: "auto".to_string(),
        }
    }
}

impl VoicesConfig {
    pub fn resolve_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("voices"))
    }

    /// Returns None if persistence is disabled
    pub fn resolve_database(&self) -> Option<PathBuf> {
        match self.database.to_lowercase().as_str() {
            "disabled" | "none" | "off" | "false" => None,
            "auto" | "" => Some(crate::store::SqliteProfileStore::default_path()),
            _ => Some(PathBuf::from(&self.database)),
        }
    }
}

/// Bridge service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted audio upload
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8791,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxpool")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path (models, voices, database)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxpool")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn models_dir() -> PathBuf {
        Self::data_dir().join("models")
    }

    /// Synthesis server the client should talk to
    pub fn synthesis_base_url(&self) -> &str {
        match (self.synthesis.mode, self.synthesis.remote_url.as_deref()) {
            (Mode::Remote, Some(url)) => url,
            _ => &self.synthesis.local_url,
        }
    }

    /// Check settings that would otherwise fail deep inside a request
    pub fn validate(&self) -> Result<(), VoxpoolError> {
        if self.transcriber.mode == Mode::Remote {
            let endpoint = self.transcriber.remote_endpoint.as_deref().unwrap_or("");
            if !is_http_url(endpoint) {
                return Err(VoxpoolError::Config(format!(
                    "transcriber.mode = \"remote\" requires an http(s) remote_endpoint, got: {:?}",
                    endpoint
                )));
            }
        }

        if self.synthesis.mode == Mode::Remote {
            let url = self.synthesis.remote_url.as_deref().unwrap_or("");
            if !is_http_url(url) {
                return Err(VoxpoolError::Config(format!(
                    "synthesis.mode = \"remote\" requires an http(s) remote_url, got: {:?}",
                    url
                )));
            }
        }

        if self.ai.mode.trim().is_empty() && self.ai.priority.is_empty() {
            return Err(VoxpoolError::Config(
                "ai.mode or ai.priority must name at least one provider".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn parse_bool(name: &str, value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            tracing::warn!("Ignoring {}={:?}: expected a boolean", name, value);
            None
        }
    }
}

fn mode_from_flag(remote: bool) -> Mode {
    if remote {
        Mode::Remote
    } else {
        Mode::Local
    }
}

/// Apply VOXPOOL_* overrides, reading variables through `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("VOXPOOL_USE_REMOTE_STT") {
        if let Some(remote) = parse_bool("VOXPOOL_USE_REMOTE_STT", &v) {
            config.transcriber.mode = mode_from_flag(remote);
        }
    }
    if let Some(url) = lookup("VOXPOOL_STT_BASE_URL") {
        config.transcriber.remote_endpoint = Some(url.trim().to_string());
    }
    if let Some(v) = lookup("VOXPOOL_USE_REMOTE_TTS") {
        if let Some(remote) = parse_bool("VOXPOOL_USE_REMOTE_TTS", &v) {
            config.synthesis.mode = mode_from_flag(remote);
        }
    }
    if let Some(url) = lookup("VOXPOOL_TTS_BASE_URL") {
        config.synthesis.remote_url = Some(url.trim().to_string());
    }
    if let Some(v) = lookup("VOXPOOL_ENABLE_POOL") {
        if let Some(enabled) = parse_bool("VOXPOOL_ENABLE_POOL", &v) {
            config.transcriber.enable_pool = enabled;
        }
    }
    if let Some(v) = lookup("VOXPOOL_DEVICES") {
        config.transcriber.devices = v
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = lookup("VOXPOOL_REPLICAS_PER_DEVICE") {
        match v.trim().parse::<usize>() {
            Ok(n) => config.transcriber.replicas_per_device = n.max(1),
            Err(_) => tracing::warn!("Ignoring VOXPOOL_REPLICAS_PER_DEVICE={:?}", v),
        }
    }
    if let Some(v) = lookup("VOXPOOL_DISABLE_LOCAL_STT") {
        if let Some(disabled) = parse_bool("VOXPOOL_DISABLE_LOCAL_STT", &v) {
            config.transcriber.disabled = disabled;
        }
    }
    if let Some(mode) = lookup("VOXPOOL_AI_MODE") {
        let mode = mode.trim();
        if !mode.is_empty() {
            config.ai.mode = mode.to_lowercase();
        }
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxpoolError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VoxpoolError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| VoxpoolError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transcriber.mode, Mode::Local);
        assert_eq!(config.transcriber.model, "large-v3");
        assert_eq!(config.transcriber.fallback_model.as_deref(), Some("base"));
        assert!(config.transcriber.enable_pool);
        assert_eq!(config.ai.mode, "openai");
        assert_eq!(config.ai.max_retries, 3);
        assert_eq!(config.ai.providers.len(), 3);
        assert_eq!(config.service.port, 8791);
        assert_eq!(config.synthesis_base_url(), "http://127.0.0.1:9880");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
            [transcriber]
            mode = "remote"
            remote_endpoint = "http://stt.lan:8791"
            devices = ["0", "1"]
            replicas_per_device = 2

            [synthesis]
            mode = "remote"
            remote_url = "http://tts.lan:9880"

            [[synthesis.models]]
            name = "narrator"
            gpt_weights = "gpt/narrator.ckpt"
            sovits_weights = "sovits/narrator.pth"

            [ai]
            mode = "local"
            priority = ["local"]

            [ai.providers.local]
            base_url = "http://127.0.0.1:8000/v1"
            model = "qwen2.5"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transcriber.mode, Mode::Remote);
        assert_eq!(config.transcriber.devices, vec!["0", "1"]);
        assert_eq!(config.transcriber.replicas(), 2);
        assert_eq!(config.transcriber.model, "large-v3"); // default
        assert_eq!(config.synthesis_base_url(), "http://tts.lan:9880");
        assert_eq!(config.synthesis.models[0].name, "narrator");
        assert_eq!(config.ai.providers.len(), 1);
        assert_eq!(config.ai.providers["local"].api_key_env, None);
        assert_eq!(config.ai.max_retries, 3); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.transcriber.model, "large-v3");
        assert_eq!(config.voices.database, "auto");
    }

    #[test]
    fn test_remote_stt_requires_endpoint() {
        let mut config = Config::default();
        config.transcriber.mode = Mode::Remote;
        assert!(config.validate().is_err());

        config.transcriber.remote_endpoint = Some("stt.lan:8791".to_string());
        assert!(config.validate().is_err());

        config.transcriber.remote_endpoint = Some("https://stt.lan".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("VOXPOOL_USE_REMOTE_STT", "1"),
                ("VOXPOOL_STT_BASE_URL", " http://stt.lan:8791 "),
                ("VOXPOOL_USE_REMOTE_TTS", "true"),
                ("VOXPOOL_TTS_BASE_URL", "http://tts.lan:9880"),
                ("VOXPOOL_ENABLE_POOL", "0"),
                ("VOXPOOL_DEVICES", "0, 1,,cpu"),
                ("VOXPOOL_REPLICAS_PER_DEVICE", "0"),
                ("VOXPOOL_DISABLE_LOCAL_STT", "yes"),
                ("VOXPOOL_AI_MODE", "DeepSeek"),
            ]),
        );

        assert_eq!(config.transcriber.mode, Mode::Remote);
        assert_eq!(
            config.transcriber.remote_endpoint.as_deref(),
            Some("http://stt.lan:8791")
        );
        assert_eq!(config.synthesis_base_url(), "http://tts.lan:9880");
        assert!(!config.transcriber.enable_pool);
        assert_eq!(config.transcriber.devices, vec!["0", "1", "cpu"]);
        assert_eq!(config.transcriber.replicas_per_device, 1);
        assert!(config.transcriber.disabled);
        assert_eq!(config.ai.mode, "deepseek");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("VOXPOOL_ENABLE_POOL", "maybe"),
                ("VOXPOOL_REPLICAS_PER_DEVICE", "many"),
            ]),
        );
        assert!(config.transcriber.enable_pool);
        assert_eq!(config.transcriber.replicas_per_device, 1);
    }

    #[test]
    fn test_resolve_database() {
        let mut voices = VoicesConfig::default();
        assert!(voices.resolve_database().is_some());
        voices.database = "disabled".to_string();
        assert!(voices.resolve_database().is_none());
        voices.database = "/var/lib/voxpool/voices.db".to_string();
        assert_eq!(
            voices.resolve_database(),
            Some(PathBuf::from("/var/lib/voxpool/voices.db"))
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nport = 9000\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.service.port, 9000);

        std::fs::write(&path, "[service\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
