//! Persisted provider manifest
//!
//! One JSON file holding `registry_id -> PersistedProvider`. A record is
//! written only after a successful registration and removed only on
//! explicit unregister; transient unreachability never touches the file.
//! Writes go to a temp file in the same directory and are renamed into
//! place, so readers never observe a half-written manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use toolgate_core::PersistedProvider;

use crate::error::Result;

/// File-backed store of providers to restore on boot
pub struct ManifestStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, PersistedProvider>>,
}

impl ManifestStore {
    /// Open the manifest at `path`, loading existing entries.
    ///
    /// A missing file is not an error; the store starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let map: HashMap<String, PersistedProvider> = serde_json::from_str(&contents)?;
                info!(path = %path.display(), count = map.len(), "Loaded provider manifest");
                map
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No provider manifest, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Record a provider. Flushes to disk before returning.
    pub async fn put(&self, record: PersistedProvider) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(record.registry_id.clone(), record);
        self.flush_locked(&entries).await
    }

    /// Remove a provider record. Returns whether it was present.
    pub async fn remove(&self, registry_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let removed = entries.remove(registry_id).is_some();
        if removed {
            self.flush_locked(&entries).await?;
        }
        Ok(removed)
    }

    pub async fn get(&self, registry_id: &str) -> Option<PersistedProvider> {
        self.entries.lock().await.get(registry_id).cloned()
    }

    /// All persisted providers, in no particular order.
    pub async fn all(&self) -> Vec<PersistedProvider> {
        self.entries.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Write the current state to disk, even if nothing changed.
    pub async fn flush(&self) -> Result<()> {
        let entries = self.entries.lock().await;
        self.flush_locked(&entries).await
    }

    async fn flush_locked(&self, entries: &HashMap<String, PersistedProvider>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            warn!(path = %self.path.display(), error = %e, "Manifest rename failed");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), count = entries.len(), "Flushed provider manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_core::{Provenance, ToolDescriptor};

    fn external_record(id: &str) -> PersistedProvider {
        let descriptor = ToolDescriptor::mcp_server(
            id,
            format!("{id} server"),
            "test provider",
            format!("ws://127.0.0.1:9000/{id}"),
        );
        PersistedProvider::external(&descriptor)
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("providers.json"))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("providers.json"))
            .await
            .unwrap();

        store.put(external_record("browser")).await.unwrap();
        assert_eq!(store.len().await, 1);
        let record = store.get("browser").await.unwrap();
        assert_eq!(record.provenance, Provenance::External);

        assert!(store.remove("browser").await.unwrap());
        assert!(!store.remove("browser").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");

        {
            let store = ManifestStore::open(&path).await.unwrap();
            store.put(external_record("sandbox")).await.unwrap();
            store.put(external_record("browser")).await.unwrap();
        }

        let reopened = ManifestStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.get("sandbox").await.is_some());
        assert!(reopened.get("browser").await.is_some());
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        let store = ManifestStore::open(&path).await.unwrap();
        store.put(external_record("search")).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/providers.json");
        let store = ManifestStore::open(&path).await.unwrap();
        store.put(external_record("search")).await.unwrap();
        assert!(path.exists());
    }
}
