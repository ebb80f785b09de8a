//! Persistence for user voice profiles
//!
//! The voice catalog only needs two queries from its store: fetch one record
//! by key and list the records owned by a user. [`SqliteProfileStore`] is the
//! bundled implementation; anything else can implement [`ProfileStore`].

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A voice profile as persisted, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRecord {
    pub key: String,
    pub display_name: Option<String>,
    /// Reference audio, absolute or relative to the voice root
    pub ref_audio_path: Option<String>,
    pub ref_text: Option<String>,
    pub ref_lang: Option<String>,
    pub model_name: Option<String>,
    pub owner_id: Option<i64>,
}

/// Read access to persisted voice profiles
pub trait ProfileStore: Send + Sync {
    fn fetch_by_key(&self, key: &str) -> Result<Option<ProfileRecord>, StoreError>;

    fn list_by_owner(&self, owner_id: i64) -> Result<Vec<ProfileRecord>, StoreError>;
}

/// SQLite-backed profile store
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    /// Default database location
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxpool")
            .map(|dirs| dirs.data_dir().join("voices.db"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/voxpool/voices.db"))
    }

    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        tracing::debug!("Opened voice profile store at {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS voice_profiles (
                key TEXT PRIMARY KEY,
                display_name TEXT,
                ref_audio_path TEXT,
                ref_text TEXT,
                ref_lang TEXT,
                model_name TEXT,
                owner_id INTEGER,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_voice_profiles_owner ON voice_profiles(owner_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO voice_profiles
                (key, display_name, ref_audio_path, ref_text, ref_lang, model_name, owner_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.key,
                record.display_name,
                record.ref_audio_path,
                record.ref_text,
                record.ref_lang,
                record.model_name,
                record.owner_id,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM voice_profiles WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}

const SELECT_COLUMNS: &str =
    "SELECT key, display_name, ref_audio_path, ref_text, ref_lang, model_name, owner_id FROM voice_profiles";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRecord> {
    Ok(ProfileRecord {
        key: row.get(0)?,
        display_name: row.get(1)?,
        ref_audio_path: row.get(2)?,
        ref_text: row.get(3)?,
        ref_lang: row.get(4)?,
        model_name: row.get(5)?,
        owner_id: row.get(6)?,
    })
}

impl ProfileStore for SqliteProfileStore {
    fn fetch_by_key(&self, key: &str) -> Result<Option<ProfileRecord>, StoreError> {
        let record = self
            .conn()
            .query_row(
                &format!("{} WHERE key = ?1", SELECT_COLUMNS),
                params![key],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_by_owner(&self, owner_id: i64) -> Result<Vec<ProfileRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE owner_id = ?1 ORDER BY created_at, key",
            SELECT_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![owner_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, owner: i64) -> ProfileRecord {
        ProfileRecord {
            key: key.to_string(),
            display_name: Some(format!("Voice {}", key)),
            ref_audio_path: Some(format!("{}.wav", key)),
            owner_id: Some(owner),
            ..Default::default()
        }
    }

    #[test]
    fn test_fetch_missing_key() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        assert!(store.fetch_by_key("nobody").unwrap().is_none());
    }

    #[test]
    fn test_upsert_and_fetch() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        store.upsert(&record("alice", 1)).unwrap();

        let fetched = store.fetch_by_key("alice").unwrap().unwrap();
        assert_eq!(fetched, record("alice", 1));
        assert_eq!(fetched.ref_text, None);
    }

    #[test]
    fn test_upsert_replaces() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        store.upsert(&record("alice", 1)).unwrap();
        let mut updated = record("alice", 1);
        updated.ref_lang = Some("ja".to_string());
        store.upsert(&updated).unwrap();

        assert_eq!(store.fetch_by_key("alice").unwrap().unwrap(), updated);
        assert_eq!(store.list_by_owner(1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_by_owner() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        store.upsert(&record("a", 1)).unwrap();
        store.upsert(&record("b", 2)).unwrap();
        store.upsert(&record("c", 1)).unwrap();

        let keys: Vec<String> = store
            .list_by_owner(1)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert!(store.list_by_owner(3).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        store.upsert(&record("a", 1)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("voices.db");
        {
            let store = SqliteProfileStore::open(&path).unwrap();
            store.upsert(&record("persisted", 5)).unwrap();
        }
        let reopened = SqliteProfileStore::open(&path).unwrap();
        assert!(reopened.fetch_by_key("persisted").unwrap().is_some());
    }
}
