use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::recover;

const SOURCE: &str = "auth::session";

/// Key the session token is stored under, in every backend.
pub const TOKEN_KEY: &str = "token";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Durable home of the session token.
///
/// Implementations must be cheap to read: the transport asks for the token
/// on every request.
pub trait SessionStore: Send + Sync {
    /// Current token, if one is stored.
    fn token(&self) -> Option<String>;

    /// Replace the stored token.
    fn set_token(&self, token: &str) -> Result<()>;

    /// Remove the stored token. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;

    fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    token: RwLock<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn token(&self) -> Option<String> {
        recover(self.token.read(), SOURCE, "memory.token").clone()
    }

    fn set_token(&self, token: &str) -> Result<()> {
        *recover(self.token.write(), SOURCE, "memory.set_token") = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *recover(self.token.write(), SOURCE, "memory.clear") = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            created_at: Utc::now(),
        }
    }
}

/// Token persisted as `session.json` in a directory, with an in-memory copy
/// so reads do not touch the disk.
pub struct FileSessionStore {
    cache_dir: PathBuf,
    data: RwLock<Option<SessionData>>,
}

impl FileSessionStore {
    /// Open the store, loading an existing session file if present.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            cache_dir: cache_dir.into(),
            data: RwLock::new(None),
        };
        let loaded = store.load()?;
        *recover(store.data.write(), SOURCE, "file.open") = loaded;
        Ok(store)
    }

    fn load(&self) -> Result<Option<SessionData>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        Ok(())
    }

    /// When the stored token was written, if there is one.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        recover(self.data.read(), SOURCE, "file.created_at")
            .as_ref()
            .map(|d| d.created_at)
    }

    pub fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl SessionStore for FileSessionStore {
    fn token(&self) -> Option<String> {
        recover(self.data.read(), SOURCE, "file.token")
            .as_ref()
            .map(|d| d.token.clone())
    }

    fn set_token(&self, token: &str) -> Result<()> {
        let data = SessionData::new(token);
        self.save(&data)?;
        *recover(self.data.write(), SOURCE, "file.set_token") = Some(data);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *recover(self.data.write(), SOURCE, "file.clear") = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert!(!store.has_token());

        store.set_token("abc").unwrap();
        assert_eq!(store.token().as_deref(), Some("abc"));

        store.set_token("def").unwrap();
        assert_eq!(store.token().as_deref(), Some("def"));

        store.clear().unwrap();
        assert_eq!(store.token(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileSessionStore::open(dir.path()).unwrap();
        assert_eq!(store.token(), None);
        store.set_token("persisted").unwrap();
        assert!(store.session_path().exists());
        assert!(store.created_at().is_some());

        let reopened = FileSessionStore::open(dir.path()).unwrap();
        assert_eq!(reopened.token().as_deref(), Some("persisted"));

        reopened.clear().unwrap();
        assert!(!reopened.session_path().exists());
        assert_eq!(FileSessionStore::open(dir.path()).unwrap().token(), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "not json").unwrap();
        assert!(FileSessionStore::open(dir.path()).is_err());
    }
}
