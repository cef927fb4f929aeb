//! Auth token storage.
//!
//! The client never caches the token: it calls `AuthStore::token` before every
//! send, so a token set or cleared elsewhere is picked up on the next attempt.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::AuthStoreError;

/// Key under which the token lives in persisted storage.
pub const AUTH_TOKEN_KEY: &str = "authToken";

pub trait AuthStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: &str) -> Result<(), AuthStoreError>;
    fn clear_token(&self) -> Result<(), AuthStoreError>;
}

/// Process-local store. Used by default and in tests.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    token: RwLock<Option<String>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl AuthStore for MemoryAuthStore {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: &str) -> Result<(), AuthStoreError> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear_token(&self) -> Result<(), AuthStoreError> {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keyed JSON file on disk, e.g. `{"authToken": "..."}`.
///
/// Other keys in the file are preserved on write. A missing file reads as
/// "no token"; an unreadable or corrupt one also reads as "no token" so a bad
/// file never blocks requests. Writes replace the file atomically, and a
/// corrupt file is logged and replaced by a fresh object.
#[derive(Debug)]
pub struct FileAuthStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    lock: RwLock<()>,
}

impl FileAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, AuthStoreError> {
        match std::fs::read(&self.path) {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Ok(Map::new()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Entries to rewrite. I/O errors abort the write; a corrupt file is
    /// discarded with a warning.
    fn load_for_write(&self) -> Result<Map<String, Value>, AuthStoreError> {
        match self.load() {
            Err(AuthStoreError::Corrupt(e)) => {
                warn!(
                    "Discarding corrupt auth store {}: {e}",
                    self.path.display()
                );
                Ok(Map::new())
            }
            other => other,
        }
    }

    fn save(&self, entries: &Map<String, Value>) -> Result<(), AuthStoreError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let raw = serde_json::to_vec_pretty(entries)?;
        // Same directory as the target so the rename stays on one filesystem.
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&raw)?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|e| AuthStoreError::Io(e.error))?;
        Ok(())
    }
}

impl AuthStore for FileAuthStore {
    fn token(&self) -> Option<String> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        match self.load() {
            Ok(entries) => entries
                .get(AUTH_TOKEN_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                debug!("Ignoring unreadable auth store {}: {e}", self.path.display());
                None
            }
        }
    }

    fn set_token(&self, token: &str) -> Result<(), AuthStoreError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load_for_write()?;
        entries.insert(AUTH_TOKEN_KEY.to_string(), Value::String(token.to_string()));
        self.save(&entries)
    }

    fn clear_token(&self) -> Result<(), AuthStoreError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load_for_write()?;
        if entries.remove(AUTH_TOKEN_KEY).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.save(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_and_clear() {
        let store = MemoryAuthStore::new();
        assert_eq!(store.token(), None);
        store.set_token("abc").unwrap();
        assert_eq!(store.token().as_deref(), Some("abc"));
        store.clear_token().unwrap();
        assert_eq!(store.token(), None);
    }

    #[test]
    fn test_file_store_missing_file_has_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::new(dir.path().join("session.json"));
        assert_eq!(store.token(), None);
        // Clearing a store that was never written does not create the file.
        store.clear_token().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileAuthStore::new(&path).set_token("persisted").unwrap();
        let reopened = FileAuthStore::new(&path);
        assert_eq!(reopened.token().as_deref(), Some("persisted"));

        reopened.clear_token().unwrap();
        assert_eq!(FileAuthStore::new(&path).token(), None);
    }

    #[test]
    fn test_file_store_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, r#"{"theme":"dark","authToken":"t1"}"#).unwrap();

        let store = FileAuthStore::new(&path);
        store.clear_token().unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert!(raw.get(AUTH_TOKEN_KEY).is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileAuthStore::new(&path);
        assert_eq!(store.token(), None);
        store.set_token("fresh").unwrap();
        assert_eq!(store.token().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_file_store_unreadable_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be: reads fail with an I/O error.
        let path = dir.path().join("storage.json");
        std::fs::create_dir(&path).unwrap();

        let store = FileAuthStore::new(&path);
        assert_eq!(store.token(), None);
        assert!(matches!(store.set_token("t"), Err(AuthStoreError::Io(_))));
        assert!(path.is_dir());
    }

    #[test]
    fn test_file_store_write_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileAuthStore::new(&path);
        store.set_token("one").unwrap();
        store.set_token("two").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("storage.json")]);
        assert_eq!(store.token().as_deref(), Some("two"));
    }
}
