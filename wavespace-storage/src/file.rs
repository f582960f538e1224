//! JSON file backend.
//!
//! The whole store is one JSON object on disk. Reads are served from memory;
//! every mutation rewrites the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use wavespace_core::{DurableStorage, StorageError, StorageResult};

#[derive(Debug, thiserror::Error)]
pub enum FileStorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<FileStorageError> for StorageError {
    fn from(e: FileStorageError) -> Self {
        StorageError::Unavailable { reason: e.to_string() }
    }
}

/// Durable storage backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Open `path`, loading existing contents. A missing file is an empty
    /// store; it is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileStorageError> {
        let path = path.into();
        let items = load(&path)?.unwrap_or_default();
        tracing::debug!(path = %path.display(), entries = items.len(), "Opened file storage");
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, key: &str, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> StorageResult<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = items.clone();
        apply(&mut next);
        save(&self.path, &next).map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        *items = next;
        Ok(())
    }
}

impl DurableStorage for JsonFileStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(key, |items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        if self.get_item(key)?.is_none() {
            return Ok(());
        }
        self.mutate(key, |items| {
            items.remove(key);
        })
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

fn load(path: &Path) -> Result<Option<BTreeMap<String, String>>, FileStorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let items = serde_json::from_str::<BTreeMap<String, String>>(&contents)?;
    Ok(Some(items))
}

fn save(path: &Path, items: &BTreeMap<String, String>) -> Result<(), FileStorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(items)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::open(dir.path().join("state.json")).unwrap();
        assert!(storage.keys().unwrap().is_empty());
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        {
            let storage = JsonFileStorage::open(&path).unwrap();
            storage.set_item("b", "2").unwrap();
            storage.set_item("a", "1").unwrap();
            storage.remove_item("b").unwrap();
            storage.remove_item("never-set").unwrap();
        }
        let storage = JsonFileStorage::open(&path).unwrap();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.get_item("b").unwrap(), None);
        assert_eq!(storage.keys().unwrap(), vec!["a"]);
        assert_eq!(storage.used_bytes().unwrap(), 2);
    }

    #[test]
    fn test_corrupt_file_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonFileStorage::open(&path), Err(FileStorageError::Serde(_))));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes every write fail.
        let path = dir.path().join("state.json");
        std::fs::create_dir_all(&path).unwrap();
        let storage = JsonFileStorage {
            path,
            items: RwLock::new(BTreeMap::new()),
        };
        let err = storage.set_item("k", "v").unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed { .. }));
        assert_eq!(storage.get_item("k").unwrap(), None);
    }
}
