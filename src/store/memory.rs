//! DashMap-backed store with a write-through JSON snapshot.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::store::{KeyValueStore, StoreResult};

/// Concurrent in-process store.
///
/// With a snapshot path every mutation rewrites the file through a temp
/// file and an atomic rename, so a crash leaves either the old or the new
/// snapshot on disk.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, String>>,
    persistence_path: Option<PathBuf>,
    /// Serialises snapshot writers.
    write_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Store without a snapshot file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the snapshot at `path`, creating an empty store if it is absent.
    pub fn load_from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let store = Self {
            persistence_path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: BTreeMap<String, String> = serde_json::from_reader(reader)?;
            for (k, v) in map {
                store.inner.insert(k, v);
            }
            tracing::info!(path = %path.display(), entries = store.inner.len(), "Loaded store snapshot");
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn save_to_file(&self) -> StoreResult<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        // A poisoned lock only means another writer panicked mid-snapshot;
        // the next full rewrite repairs the file.
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let map: BTreeMap<String, String> = self
            .inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &map)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), entries = map.len(), "Saved store snapshot");
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.contains_key(key))
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.insert(key.to_string(), value.to_string());
        self.save_to_file()
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        if self.inner.remove(key).is_some() {
            self.save_to_file()?;
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let mut entries: Vec<(String, String)> = self
            .inner
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort();
        Ok(entries)
    }
}
