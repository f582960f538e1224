//! WAVE SPACE Storage
//!
//! The TTL cache, the persisted state store, and durable backends for
//! anything that needs to outlive the process.

pub mod cache;
pub mod file;
pub mod lmdb;
pub mod state;

pub use cache::{CacheConfig, CacheStats, TtlCache, DEFAULT_MAX_SIZE, DEFAULT_TTL};
pub use file::{FileStorageError, JsonFileStorage};
pub use lmdb::{LmdbStorage, LmdbStorageError};
pub use state::{
    DisallowedKey, PersistedStateStore, SetOptions, StateCallback, StateChange, StateKey, StateStats,
    StateStoreBuilder, StateStoreConfig, DEFAULT_PREFIX, DEFAULT_RETENTION, ENVELOPE_VERSION, STATE_CHANGE_EVENT,
};
