//! Durable key/value storage contract.
//!
//! Stands in for browser local storage: string keys, string values,
//! synchronous access. Backends live in `wavespace-storage`; the in-memory
//! backend lives here so the reporter can be used without them.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{StorageError, StorageResult};

/// Synchronous string key/value store.
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// All stored keys, in ascending order.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Sum of key and value lengths in bytes.
    fn used_bytes(&self) -> StorageResult<usize> {
        let mut total = 0;
        for key in self.keys()? {
            if let Some(value) = self.get_item(&key)? {
                total += key.len() + value.len();
            }
        }
        Ok(total)
    }
}

/// Shared durable storage handle.
pub type SharedStorage = Arc<dyn DurableStorage>;

/// In-memory backend with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push total usage above `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: RwLock::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(quota) = self.quota_bytes {
            let current: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let bytes = key.len() + value.len();
            if current + bytes > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes,
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.keys().cloned().collect())
    }

    fn used_bytes(&self) -> StorageResult<usize> {
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.iter().map(|(k, v)| k.len() + v.len()).sum())
    }
}
