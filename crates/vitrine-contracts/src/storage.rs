use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::StudioError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("quota exceeded: {requested} bytes requested, {quota} bytes available")]
    QuotaExceeded { requested: usize, quota: usize },
    #[error("storage i/o failed: {0}")]
    Io(String),
}

impl From<StorageError> for StudioError {
    fn from(err: StorageError) -> Self {
        StudioError::StorageFull(err.to_string())
    }
}

/// Serialized-blob store backing the character library and projects.
pub trait KeyValueStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, blob: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-process store with an optional byte quota, sized like a browser's
/// local storage when one is given.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota_bytes {
            let existing = self
                .entries
                .get(key)
                .map(|value| key.len() + value.len())
                .unwrap_or(0);
            let requested = self.used_bytes() - existing + key.len() + blob.len();
            if requested > quota {
                return Err(StorageError::QuotaExceeded { requested, quota });
            }
        }
        self.entries.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// JSON-object file store. Writes merge only the keys this instance touched
/// into whatever is on disk, so two handles on one file do not clobber each
/// other.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
    quota_bytes: Option<usize>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.dirty_keys.is_empty() && self.removed_keys.is_empty() {
            return Ok(());
        }
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) -> &mut Map<String, Value> {
        self.payload
            .insert(read_json_object(&self.path).unwrap_or_default())
    }
}

impl KeyValueStore for FileStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .refresh()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<(), StorageError> {
        let quota = self.quota_bytes;
        let payload = self.refresh();
        if let Some(quota) = quota {
            let requested: usize = payload
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, value)| existing.len() + value.as_str().map(str::len).unwrap_or(0))
                .sum::<usize>()
                + key.len()
                + blob.len();
            if requested > quota {
                return Err(StorageError::QuotaExceeded { requested, quota });
            }
        }
        let snapshot = Value::String(blob.to_string());
        if payload.get(key) == Some(&snapshot) {
            return Ok(());
        }
        payload.insert(key.to_string(), snapshot);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let payload = self.refresh();
        payload.remove(key);
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()
    }

    fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .refresh()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StorageError> {
    let io = |err: std::io::Error| StorageError::Io(format!("{}: {err}", path.display()));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let rendered = serde_json::to_string_pretty(&Value::Object(payload.clone()))
        .map_err(|err| StorageError::Io(err.to_string()))?;
    std::fs::write(path, rendered).map_err(io)
}

#[cfg(test)]
mod tests {
    use super::{FileStore, KeyValueStore, MemoryStore, StorageError};

    #[test]
    fn memory_store_enforces_quota_and_keeps_old_value() {
        let mut store = MemoryStore::with_quota(16);
        store.set("k", "small").unwrap();
        let err = store.set("k", "this blob is far too large").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn memory_store_filters_keys_by_prefix() {
        let mut store = MemoryStore::new();
        store.set("project_1", "a").unwrap();
        store.set("project_2", "b").unwrap();
        store.set("characters", "c").unwrap();
        assert_eq!(store.keys("project_").unwrap(), vec!["project_1", "project_2"]);
    }

    #[test]
    fn file_store_persists_between_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store = FileStore::new(&path);
        store.set("key", "value")?;

        let mut reloaded = FileStore::new(&path);
        assert_eq!(reloaded.get("key")?.as_deref(), Some("value"));
        Ok(())
    }

    #[test]
    fn file_store_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("store.json");
        let mut store_a = FileStore::new(&path);
        let mut store_b = FileStore::new(&path);

        store_a.set("a", "1")?;
        store_b.set("b", "2")?;
        store_a.set("c", "3")?;
        store_b.remove("a")?;

        let mut reloaded = FileStore::new(&path);
        assert_eq!(reloaded.get("a")?, None);
        assert_eq!(reloaded.get("b")?.as_deref(), Some("2"));
        assert_eq!(reloaded.get("c")?.as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn file_store_quota_rejects_oversized_write() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = FileStore::new(temp.path().join("store.json")).with_quota(10);
        assert!(store.set("key", "way too long for the quota").is_err());
        assert_eq!(store.get("key")?, None);
        Ok(())
    }
}
