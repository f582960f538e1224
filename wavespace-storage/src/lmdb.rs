//! LMDB durable backend.
//!
//! Uses the heed crate (Rust bindings for LMDB). Keys and values are stored
//! as UTF-8 strings in the single unnamed database of the environment. Each
//! operation runs in its own transaction.

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, MdbError};

use wavespace_core::{DurableStorage, StorageError, StorageResult};

/// Error type for opening an LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStorageError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStorageError> for StorageError {
    fn from(e: LmdbStorageError) -> Self {
        StorageError::Unavailable { reason: e.to_string() }
    }
}

/// Durable storage in an LMDB environment.
pub struct LmdbStorage {
    env: Env,
    db: Database<Str, Str>,
}

impl std::fmt::Debug for LmdbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStorage")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStorage {
    /// Open (or create) an environment at `path`.
    ///
    /// `max_size_mb` bounds the memory map; writes past it fail with
    /// [`StorageError::QuotaExceeded`].
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStorageError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStorageError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStorageError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStorageError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStorageError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB storage");
        Ok(Self { env, db })
    }
}

fn read_failed(key: &str, e: heed::Error) -> StorageError {
    StorageError::ReadFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn write_failed(key: &str, bytes: usize, e: heed::Error) -> StorageError {
    match e {
        heed::Error::Mdb(MdbError::MapFull) => StorageError::QuotaExceeded {
            key: key.to_string(),
            bytes,
        },
        other => StorageError::WriteFailed {
            key: key.to_string(),
            reason: other.to_string(),
        },
    }
}

impl DurableStorage for LmdbStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(|e| read_failed(key, e))?;
        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| read_failed(key, e))?
            .map(str::to_string);
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let bytes = key.len() + value.len();
        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(key, bytes, e))?;
        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| write_failed(key, bytes, e))?;
        wtxn.commit().map_err(|e| write_failed(key, bytes, e))
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(key, 0, e))?;
        self.db
            .delete(&mut wtxn, key)
            .map_err(|e| write_failed(key, 0, e))?;
        wtxn.commit().map_err(|e| write_failed(key, 0, e))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(|e| read_failed("*", e))?;
        let iter = self.db.iter(&rtxn).map_err(|e| read_failed("*", e))?;

        let mut keys = Vec::new();
        for result in iter {
            match result {
                Ok((key, _)) => keys.push(key.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable LMDB entry");
                    continue;
                }
            }
        }
        Ok(keys)
    }
}
