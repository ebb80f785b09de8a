//! Voice profile cache
//!
//! Resolves a voice key to the synthesis configuration for that voice.
//! Lookup order is built-in presets, then the in-memory cache of user voices,
//! then the profile store (queried only on a cache miss). All user-cache reads
//! and writes go through one mutex; lookups are a per-session cold path.

use crate::store::{ProfileRecord, ProfileStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_PROMPT_TEXT: &str = "Hello, this is my personal voice sample.";
pub const DEFAULT_LANGUAGE: &str = "auto";
pub const DEFAULT_MODEL: &str = "v2proplus";

/// Where a voice profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Builtin,
    User,
}

/// Synthesis configuration for one voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceProfile {
    pub key: String,
    pub display_name: String,
    /// Absolute, normalized path of the reference clip
    pub ref_audio: PathBuf,
    pub ref_text: String,
    pub ref_lang: String,
    pub model_name: String,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
}

struct BuiltinVoice {
    key: &'static str,
    display_name: &'static str,
    ref_audio: &'static str,
    ref_text: &'static str,
    ref_lang: &'static str,
}

// Reference clips ship under the voice root.
const BUILTIN_VOICES: &[BuiltinVoice] = &[
    BuiltinVoice {
        key: "ayano",
        display_name: "Ayano",
        ref_audio: "builtin/ayano.wav",
        ref_text: "Thank you for today.今日はありがとう。Let's have more days like this together.",
        ref_lang: "ja",
    },
    BuiltinVoice {
        key: "lazyingart",
        display_name: "Lazyingart",
        ref_audio: "builtin/lazyingart.wav",
        ref_text: "我准备好了，let's start，始めましょう。おはようございます，早上好，good morning. umm, okay, see you.",
        ref_lang: "auto",
    },
];

/// Built-in presets plus a cache of user voices backed by a [`ProfileStore`]
pub struct VoiceCatalog {
    root: PathBuf,
    builtins: BTreeMap<String, VoiceProfile>,
    cache: Mutex<HashMap<String, VoiceProfile>>,
    store: Option<Arc<dyn ProfileStore>>,
}

impl VoiceCatalog {
    /// Create a catalog resolving relative audio paths against `root`
    pub fn new(root: &Path, store: Option<Arc<dyn ProfileStore>>) -> Self {
        let root = normalize(&absolute(root));
        let builtins = BUILTIN_VOICES
            .iter()
            .map(|b| {
                let profile = VoiceProfile {
                    key: b.key.to_string(),
                    display_name: b.display_name.to_string(),
                    ref_audio: root.join(b.ref_audio),
                    ref_text: b.ref_text.to_string(),
                    ref_lang: b.ref_lang.to_string(),
                    model_name: b.key.to_string(),
                    provenance: Provenance::Builtin,
                    owner_id: None,
                };
                (profile.key.clone(), profile)
            })
            .collect();

        Self {
            root,
            builtins,
            cache: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, VoiceProfile>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a voice by key
    ///
    /// Store errors are logged and treated as "unknown voice".
    pub fn get_config(&self, key: &str) -> Option<VoiceProfile> {
        if key.is_empty() {
            return None;
        }
        if let Some(profile) = self.builtins.get(key) {
            return Some(profile.clone());
        }
        if let Some(profile) = self.cache().get(key) {
            tracing::debug!("Voice cache hit for {}", key);
            return Some(profile.clone());
        }

        let store = self.store.as_ref()?;
        match store.fetch_by_key(key) {
            Ok(Some(record)) => self.register(&record),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Voice profile lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    /// Validate a stored record and cache it (last write wins)
    ///
    /// Returns `None` if the record has no key or no reference audio path.
    pub fn register(&self, record: &ProfileRecord) -> Option<VoiceProfile> {
        let profile = self.to_profile(record)?;
        self.cache().insert(profile.key.clone(), profile.clone());
        tracing::debug!("Registered user voice {}", profile.key);
        Some(profile)
    }

    /// Drop a user voice from the cache
    pub fn remove(&self, key: &str) -> Option<VoiceProfile> {
        self.cache().remove(key)
    }

    pub fn builtin_profiles(&self) -> Vec<VoiceProfile> {
        self.builtins.values().cloned().collect()
    }

    /// All stored voices of `owner_id`, registering each valid one
    pub fn user_profiles(&self, owner_id: i64) -> Vec<VoiceProfile> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        match store.list_by_owner(owner_id) {
            Ok(records) => records.iter().filter_map(|r| self.register(r)).collect(),
            Err(e) => {
                tracing::warn!("Listing voices for user {} failed: {}", owner_id, e);
                Vec::new()
            }
        }
    }

    fn to_profile(&self, record: &ProfileRecord) -> Option<VoiceProfile> {
        let key = record.key.trim();
        if key.is_empty() {
            return None;
        }
        let ref_audio = resolve_audio_path(&self.root, record.ref_audio_path.as_deref()?)?;

        Some(VoiceProfile {
            key: key.to_string(),
            display_name: non_empty(record.display_name.as_deref()).unwrap_or(key).to_string(),
            ref_audio,
            ref_text: non_empty(record.ref_text.as_deref())
                .unwrap_or(DEFAULT_PROMPT_TEXT)
                .to_string(),
            ref_lang: non_empty(record.ref_lang.as_deref())
                .unwrap_or(DEFAULT_LANGUAGE)
                .to_string(),
            model_name: non_empty(record.model_name.as_deref())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            provenance: Provenance::User,
            owner_id: record.owner_id,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a reference audio path against `root` and canonicalize it
///
/// Files that do not exist (yet) are normalized lexically instead.
fn resolve_audio_path(root: &Path, raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = Path::new(raw);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    Some(joined.canonicalize().unwrap_or_else(|_| normalize(&joined)))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
