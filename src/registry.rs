//! Typed slots for the shared resources
//!
//! Every managed resource lives in a [`Slot`]: the current instance (if any),
//! a setup lock that serializes loads of that kind, and a memo of the last
//! failed load. The instance itself is handed out as a [`Handle`], which is the
//! model together with the mutex callers must hold while using it.
//!
//! A slot's "loaded" flag is derived from the instance itself, so a caller can
//! never observe `loaded = true` with no instance or the reverse.

use crate::error::ResourceError;
use crate::llm::{Enhancer, LanguageClient};
use crate::synthesis::SynthesisClient;
use crate::transcribe::Transcriber;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A shared, non-thread-safe resource: hold the lock while using it.
pub type Handle<T> = Arc<Mutex<Box<T>>>;

/// The finite set of resources managed by [`crate::ModelManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Transcriber,
    LanguageClient,
    SynthesisClient,
    JapaneseEnhancer,
    EnglishEnhancer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Transcriber,
        ResourceKind::LanguageClient,
        ResourceKind::SynthesisClient,
        ResourceKind::JapaneseEnhancer,
        ResourceKind::EnglishEnhancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Transcriber => "transcriber",
            ResourceKind::LanguageClient => "language_client",
            ResourceKind::SynthesisClient => "synthesis_client",
            ResourceKind::JapaneseEnhancer => "japanese_enhancer",
            ResourceKind::EnglishEnhancer => "english_enhancer",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a generic `get(kind)` lookup
#[derive(Clone)]
pub enum ResourceHandle {
    Transcriber(Handle<dyn Transcriber>),
    LanguageClient(Handle<dyn LanguageClient>),
    SynthesisClient(Handle<dyn SynthesisClient>),
    JapaneseEnhancer(Handle<dyn Enhancer>),
    EnglishEnhancer(Handle<dyn Enhancer>),
}

impl ResourceHandle {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceHandle::Transcriber(_) => ResourceKind::Transcriber,
            ResourceHandle::LanguageClient(_) => ResourceKind::LanguageClient,
            ResourceHandle::SynthesisClient(_) => ResourceKind::SynthesisClient,
            ResourceHandle::JapaneseEnhancer(_) => ResourceKind::JapaneseEnhancer,
            ResourceHandle::EnglishEnhancer(_) => ResourceKind::EnglishEnhancer,
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.kind()).finish()
    }
}

/// Slot holding at most one live instance of a resource kind
pub struct Slot<T: ?Sized> {
    kind: ResourceKind,
    current: RwLock<Option<Handle<T>>>,
    /// Serializes load and reload for this kind
    setup: Mutex<()>,
    /// Number of completed load attempts (successful or not)
    attempts: AtomicU64,
    last_failure: Mutex<Option<ResourceError>>,
}

impl<T: ?Sized> Slot<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            current: RwLock::new(None),
            setup: Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Current instance, if loaded
    pub fn get(&self) -> Option<Handle<T>> {
        // Writers only swap the Option, so a poisoned lock still holds a valid value.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Remove the current instance. Holders of the old handle keep using it.
    pub fn take(&self) -> Option<Handle<T>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Return the loaded instance, loading it first if needed.
    ///
    /// At most one load runs at a time per slot. Callers that queued behind a
    /// load which then failed receive that same failure instead of starting
    /// another attempt; a caller arriving after the failure retries.
    pub fn get_or_load<F>(&self, load: F) -> Result<Handle<T>, ResourceError>
    where
        F: FnOnce() -> Result<Box<T>, ResourceError>,
    {
        if let Some(handle) = self.get() {
            return Ok(handle);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _setup = self.setup.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = self.get() {
            return Ok(handle);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = self.last_failure() {
                tracing::debug!("{} load already failed while waiting: {}", self.kind, err);
                return Err(err);
            }
        }

        self.run_load(load)
    }

    /// Load a new instance under the setup lock and swap it in.
    ///
    /// Until the swap, `get` keeps returning the previous instance. On failure
    /// the slot is left empty.
    pub fn reload<F>(&self, load: F) -> Result<Handle<T>, ResourceError>
    where
        F: FnOnce() -> Result<Box<T>, ResourceError>,
    {
        let _setup = self.setup.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_loaded() {
            tracing::info!("Reloading {}; current instance stays live until replaced", self.kind);
        }
        self.run_load(load)
    }

    /// Must be called with the setup lock held. The instance is replaced in a
    /// single write, and cleared only when the load fails.
    fn run_load<F>(&self, load: F) -> Result<Handle<T>, ResourceError>
    where
        F: FnOnce() -> Result<Box<T>, ResourceError>,
    {
        let result = load();
        let outcome = match result {
            Ok(instance) => {
                let handle: Handle<T> = Arc::new(Mutex::new(instance));
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&handle));
                self.set_last_failure(None);
                tracing::info!("{} loaded", self.kind);
                Ok(handle)
            }
            Err(e) => {
                if self.take().is_some() {
                    tracing::warn!("Dropped previous {} after failed reload", self.kind);
                }
                self.set_last_failure(Some(e.clone()));
                tracing::error!("{} loading failed: {}", self.kind, e);
                Err(e)
            }
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    fn last_failure(&self) -> Option<ResourceError> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_failure(&self, failure: Option<ResourceError>) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }
}
