//! Key-value store adapters.
//!
//! [`FileKeyValueStore`] keeps one file per key in a directory, written
//! atomically via tmp file + rename. [`MemoryKeyValueStore`] is the
//! session-scoped fallback used when no durable surface is available.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use draftpane_core::error::Result;
use draftpane_core::storage::KeyValueStore;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const VALUE_EXTENSION: &str = "json";

/// In-memory store. Values live as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Directory-backed store. Keys are base64url-encoded into file names, so
/// any key string is safe on any platform.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    base_dir: PathBuf,
}

impl FileKeyValueStore {
    /// Opens (creating if needed) a store rooted at `base_dir`.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.base_dir.join(format!("{encoded}.{VALUE_EXTENSION}"))
    }

    /// Writes a throwaway file to confirm the directory is usable.
    async fn probe(&self) -> Result<()> {
        let probe_key = ".draftpane-probe";
        self.set_item(probe_key, "ok").await?;
        self.remove_item(probe_key).await
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension(format!("{VALUE_EXTENSION}.tmp"));

        tokio::fs::write(&tmp_path, value.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Opens the best available storage surface.
///
/// Falls back to an in-memory store (logging a warning) when `dir` is absent
/// or unusable, so callers always get a working store.
pub async fn open_storage(dir: Option<PathBuf>) -> Arc<dyn KeyValueStore> {
    let Some(dir) = dir else {
        tracing::warn!("[Storage] No data directory available, snapshots will not persist");
        return Arc::new(MemoryKeyValueStore::new());
    };

    let opened = match FileKeyValueStore::open(&dir).await {
        Ok(store) => store.probe().await.map(|_| store),
        Err(e) => Err(e),
    };

    match opened {
        Ok(store) => {
            tracing::debug!("[Storage] Using file store at {}", dir.display());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "[Storage] {} is unusable ({}), snapshots will not persist",
                dir.display(),
                e
            );
            Arc::new(MemoryKeyValueStore::new())
        }
    }
}
