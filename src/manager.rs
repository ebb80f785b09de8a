//! Shared model manager
//!
//! One [`ModelManager`] is constructed at startup, wrapped in an `Arc`, and
//! handed to everything that needs a model. Each resource kind has its own
//! [`Slot`]; the transcription pool, voice catalog and connection counter each
//! have their own locks, so unrelated resources never serialize on each other.

use crate::config::{Config, Mode};
use crate::connections::ConnectionCounter;
use crate::device::{self, Device, MemoryInfo};
use crate::error::{ResourceError, VoxpoolError};
use crate::llm::{Enhancer, EnhancerLanguage, LanguageClient};
use crate::loader::{self, ResourceFactory};
use crate::pool::TranscriberPool;
use crate::registry::{Handle, ResourceHandle, ResourceKind, Slot};
use crate::router::{LocalTarget, SpeechRouter, SttRoute};
use crate::store::{ProfileStore, SqliteProfileStore};
use crate::synthesis::SynthesisClient;
use crate::transcribe::{TranscribeOptions, Transcriber, Transcription};
use crate::voice::VoiceCatalog;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Operator-facing snapshot of the manager
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub models_loaded: BTreeMap<ResourceKind, bool>,
    pub active_connections: usize,
    pub transcriber_pool: PoolStatus,
    pub stt_route: String,
    /// Provider the language client settled on
    pub ai_mode: Option<String>,
    pub memory: MemoryInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub instances: usize,
    pub devices: Vec<Device>,
}

pub struct ModelManager {
    config: Config,
    factory: Arc<dyn ResourceFactory>,
    router: SpeechRouter,
    transcriber: Slot<dyn Transcriber>,
    /// Held across transcriber load, pool build and pool swap
    transcriber_setup: Mutex<()>,
    language_client: Slot<dyn LanguageClient>,
    synthesis_client: Slot<dyn SynthesisClient>,
    japanese_enhancer: Slot<dyn Enhancer>,
    english_enhancer: Slot<dyn Enhancer>,
    pool: RwLock<Option<Arc<TranscriberPool>>>,
    ai_mode: RwLock<Option<String>>,
    voices: VoiceCatalog,
    connections: Arc<ConnectionCounter>,
}

impl ModelManager {
    /// Create a manager with nothing loaded yet
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        config: Config,
        factory: Arc<dyn ResourceFactory>,
        store: Option<Arc<dyn ProfileStore>>,
    ) -> Result<Self, VoxpoolError> {
        config.validate()?;
        let router = SpeechRouter::new(&config)?;
        let voices = VoiceCatalog::new(&config.voices.resolve_root(), store);

        Ok(Self {
            config,
            factory,
            router,
            transcriber: Slot::new(ResourceKind::Transcriber),
            transcriber_setup: Mutex::new(()),
            language_client: Slot::new(ResourceKind::LanguageClient),
            synthesis_client: Slot::new(ResourceKind::SynthesisClient),
            japanese_enhancer: Slot::new(ResourceKind::JapaneseEnhancer),
            english_enhancer: Slot::new(ResourceKind::EnglishEnhancer),
            pool: RwLock::new(None),
            ai_mode: RwLock::new(None),
            voices,
            connections: Arc::new(ConnectionCounter::new()),
        })
    }

    /// Create a manager with the bundled backends and the configured profile store
    ///
    /// A profile database that cannot be opened disables persistence instead
    /// of failing startup.
    pub fn from_config(config: Config) -> Result<Self, VoxpoolError> {
        let store: Option<Arc<dyn ProfileStore>> = match config.voices.resolve_database() {
            Some(path) => match SqliteProfileStore::open(&path) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::warn!("Voice profile store unavailable at {:?}: {}", path, e);
                    None
                }
            },
            None => None,
        };
        Self::new(config, Arc::new(loader::HttpResourceFactory), store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load everything needed at startup
    ///
    /// Fails when the language client cannot be built, or when local STT
    /// was expected but cannot load and there is no remote endpoint to fall
    /// back on. Synthesis and enhancer failures are logged and recorded.
    pub fn load_models(&self) -> Result<(), VoxpoolError> {
        tracing::info!("Loading shared models...");
        let start = std::time::Instant::now();

        let tc = &self.config.transcriber;
        if self.router.stt_mode() == Mode::Remote {
            tracing::info!("Skipping local transcriber: remote STT enabled");
        } else if tc.disabled {
            tracing::info!("Local transcriber disabled by configuration");
        } else if tc.require_accelerator && self.factory.accelerator_count() == 0 {
            tracing::info!("Local transcriber disabled: no accelerator detected");
        } else if let Err(e) = self.load_local_transcriber(false) {
            if !self.router.has_remote() {
                return Err(e.into());
            }
            tracing::warn!("Local transcriber unavailable, using remote STT: {}", e);
        }

        self.language_client()?;

        if let Err(e) = self.load_synthesis_client(false) {
            tracing::warn!("Continuing without speech synthesis: {}", e);
        }

        self.load_enhancers(false);

        tracing::info!(
            "Shared models loaded in {:.2}s",
            start.elapsed().as_secs_f32()
        );
        device::log_memory_usage();
        Ok(())
    }

    /// Load the default transcriber and (re)build the pool around it
    ///
    /// Slot load, pool build and pool swap all happen under
    /// `transcriber_setup`. Until the swap, requests keep using the previous
    /// instance and pool.
    fn load_local_transcriber(&self, force: bool) -> Result<Handle<dyn Transcriber>, ResourceError> {
        let _setup = self
            .transcriber_setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let tc = &self.config.transcriber;
        let load = || loader::load_transcriber(self.factory.as_ref(), tc);
        let loaded = if force {
            self.transcriber.reload(load)
        } else {
            self.transcriber.get_or_load(load)
        };
        let handle = match loaded {
            Ok(handle) => handle,
            Err(e) => {
                self.set_pool(None);
                return Err(e);
            }
        };

        if !tc.enable_pool {
            return Ok(handle);
        }
        if !force && self.pool().is_some() {
            tracing::debug!("Transcriber pool already built, skipping");
            return Ok(handle);
        }

        let devices = device::resolve_devices(&tc.devices, self.factory.accelerator_count());
        let built = TranscriberPool::build(
            Some(Arc::clone(&handle)),
            &devices,
            tc.replicas(),
            |device| self.factory.load_transcriber(&tc.model, device, tc),
        );
        match built {
            Ok(pool) => self.set_pool(Some(Arc::new(pool))),
            Err(e) => {
                tracing::warn!("Transcriber pool init skipped: {}", e);
                // A pool wrapping the replaced instance must not outlive it.
                self.set_pool(None);
            }
        }
        Ok(handle)
    }

    fn load_synthesis_client(&self, force: bool) -> Result<Handle<dyn SynthesisClient>, ResourceError> {
        let load = || {
            loader::load_synthesis_client(
                self.factory.as_ref(),
                self.router.synthesis_base_url(),
                &self.config.synthesis,
            )
        };
        if force {
            self.synthesis_client.reload(load)
        } else {
            self.synthesis_client.get_or_load(load)
        }
    }

    /// Load both enhancers; one failing does not stop the other
    fn load_enhancers(&self, force: bool) {
        for language in [EnhancerLanguage::Japanese, EnhancerLanguage::English] {
            if let Err(e) = self.load_enhancer(language, force) {
                tracing::warn!("Continuing without {:?} enhancer: {}", language, e);
            }
        }
    }

    fn load_enhancer(
        &self,
        language: EnhancerLanguage,
        force: bool,
    ) -> Result<Handle<dyn Enhancer>, ResourceError> {
        let slot = self.enhancer_slot(language);
        let load = || loader::load_enhancer(self.factory.as_ref(), &self.config.ai, language);
        if force {
            slot.reload(load)
        } else {
            slot.get_or_load(load)
        }
    }

    fn enhancer_slot(&self, language: EnhancerLanguage) -> &Slot<dyn Enhancer> {
        match language {
            EnhancerLanguage::Japanese => &self.japanese_enhancer,
            EnhancerLanguage::English => &self.english_enhancer,
        }
    }

    fn build_language_client(&self) -> Result<Box<dyn LanguageClient>, ResourceError> {
        match loader::load_language_client(self.factory.as_ref(), &self.config.ai) {
            Ok((used_mode, client)) => {
                self.set_ai_mode(Some(used_mode));
                Ok(client)
            }
            Err(e) => {
                self.set_ai_mode(None);
                Err(e)
            }
        }
    }

    /// Look up a resource by kind
    ///
    /// The language client is loaded on first access. Every other kind
    /// returns [`ResourceError::NotReady`] when it is not loaded, so callers
    /// can take their fallback path.
    pub fn get(&self, kind: ResourceKind) -> Result<ResourceHandle, ResourceError> {
        match kind {
            ResourceKind::Transcriber => self
                .transcriber()
                .map(ResourceHandle::Transcriber)
                .ok_or(ResourceError::NotReady(kind)),
            ResourceKind::LanguageClient => {
                self.language_client().map(ResourceHandle::LanguageClient)
            }
            ResourceKind::SynthesisClient => {
                self.synthesis_client().map(ResourceHandle::SynthesisClient)
            }
            ResourceKind::JapaneseEnhancer => self
                .enhancer(EnhancerLanguage::Japanese)
                .map(ResourceHandle::JapaneseEnhancer),
            ResourceKind::EnglishEnhancer => self
                .enhancer(EnhancerLanguage::English)
                .map(ResourceHandle::EnglishEnhancer),
        }
    }

    /// The default transcriber instance, if local STT is loaded
    pub fn transcriber(&self) -> Option<Handle<dyn Transcriber>> {
        self.transcriber.get()
    }

    /// The shared language client, loading it on first use
    ///
    /// Concurrent first callers share a single load and its outcome.
    pub fn language_client(&self) -> Result<Handle<dyn LanguageClient>, ResourceError> {
        self.language_client
            .get_or_load(|| self.build_language_client())
    }

    pub fn synthesis_client(&self) -> Result<Handle<dyn SynthesisClient>, ResourceError> {
        self.synthesis_client
            .get()
            .ok_or(ResourceError::NotReady(ResourceKind::SynthesisClient))
    }

    pub fn enhancer(&self, language: EnhancerLanguage) -> Result<Handle<dyn Enhancer>, ResourceError> {
        self.enhancer_slot(language)
            .get()
            .ok_or(ResourceError::NotReady(language.kind()))
    }

    /// Replace a resource with a freshly loaded instance
    ///
    /// Lookups keep returning the previous instance until the new one is
    /// swapped in, and holders of the previous handle keep a valid instance.
    /// On failure the kind is left unloaded. Reloading the
    /// language client also reloads both enhancers; reloading the
    /// transcriber rebuilds the pool.
    pub fn reload(&self, kind: ResourceKind) -> Result<ResourceHandle, ResourceError> {
        tracing::info!("Reloading {}", kind);
        match kind {
            ResourceKind::Transcriber => self
                .load_local_transcriber(true)
                .map(ResourceHandle::Transcriber),
            ResourceKind::LanguageClient => {
                let client = self
                    .language_client
                    .reload(|| self.build_language_client())?;
                self.load_enhancers(true);
                Ok(ResourceHandle::LanguageClient(client))
            }
            ResourceKind::SynthesisClient => self
                .load_synthesis_client(true)
                .map(ResourceHandle::SynthesisClient),
            ResourceKind::JapaneseEnhancer => self
                .load_enhancer(EnhancerLanguage::Japanese, true)
                .map(ResourceHandle::JapaneseEnhancer),
            ResourceKind::EnglishEnhancer => self
                .load_enhancer(EnhancerLanguage::English, true)
                .map(ResourceHandle::EnglishEnhancer),
        }
    }

    pub fn pool(&self) -> Option<Arc<TranscriberPool>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_pool(&self, pool: Option<Arc<TranscriberPool>>) {
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = pool;
    }

    pub fn ai_mode(&self) -> Option<String> {
        self.ai_mode
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_ai_mode(&self, mode: Option<String>) {
        *self.ai_mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    fn local_target(&self) -> Option<LocalTarget> {
        if let Some(pool) = self.pool() {
            return Some(LocalTarget::Pool(pool));
        }
        self.transcriber().map(LocalTarget::Single)
    }

    pub fn stt_route(&self) -> SttRoute {
        self.router.route(self.transcriber.is_loaded())
    }

    /// Transcribe an audio file on the routed backend
    ///
    /// Never fails: any error yields `{text: "", language: "auto"}`.
    pub async fn transcribe(&self, audio: PathBuf, options: TranscribeOptions) -> Transcription {
        self.router
            .transcribe(self.local_target(), audio, options)
            .await
    }

    pub fn voices(&self) -> &VoiceCatalog {
        &self.voices
    }

    pub fn connections(&self) -> &Arc<ConnectionCounter> {
        &self.connections
    }

    pub fn register_connection(&self) -> usize {
        self.connections.register()
    }

    pub fn unregister_connection(&self) -> usize {
        self.connections.unregister()
    }

    pub fn is_loaded(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Transcriber => self.transcriber.is_loaded(),
            ResourceKind::LanguageClient => self.language_client.is_loaded(),
            ResourceKind::SynthesisClient => self.synthesis_client.is_loaded(),
            ResourceKind::JapaneseEnhancer => self.japanese_enhancer.is_loaded(),
            ResourceKind::EnglishEnhancer => self.english_enhancer.is_loaded(),
        }
    }

    /// Snapshot for operators
    ///
    /// Blocking: probes accelerator memory.
    pub fn status(&self) -> ManagerStatus {
        let pool = self.pool();
        ManagerStatus {
            models_loaded: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, self.is_loaded(*kind)))
                .collect(),
            active_connections: self.connections.active(),
            transcriber_pool: PoolStatus {
                instances: pool.as_ref().map_or(0, |p| p.len()),
                devices: pool.map(|p| p.devices()).unwrap_or_default(),
            },
            stt_route: format!("{:?}", self.stt_route()).to_lowercase(),
            ai_mode: self.ai_mode(),
            memory: device::memory_info(),
        }
    }

    /// Drop every loaded resource
    ///
    /// In-flight requests holding a handle finish on their instance; it is
    /// released when the last handle goes away.
    pub fn shutdown(&self) {
        tracing::info!("Cleaning up shared models...");
        self.set_pool(None);
        self.transcriber.take();
        self.language_client.take();
        self.synthesis_client.take();
        self.japanese_enhancer.take();
        self.english_enhancer.take();
        self.set_ai_mode(None);
        tracing::info!("Model cleanup completed");
    }
}
