//! Persisted State Store.
//!
//! A whitelisted key/value store of JSON values, mirrored to durable storage
//! as versioned envelopes. Memory is authoritative: durable storage failures
//! are reported and never fail a mutation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use wavespace_core::{
    sanitize_value, ErrorLevel, RaisedError, SharedClock, SharedReporter, SharedStorage, StateSection, SystemClock,
};
use wavespace_events::{PubSubBus, Subscription};

/// Envelope format version written by this store.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Default durable key prefix.
pub const DEFAULT_PREFIX: &str = "wave-space-";

/// Default retention for durable copies.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Event published on the shared bus for every change.
pub const STATE_CHANGE_EVENT: &str = "state:change";

// ============================================================================
// KEYS
// ============================================================================

/// The closed set of keys the store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKey {
    UserPreferences,
    SidebarState,
    FormData,
    UiSettings,
    SearchHistory,
    FilterSettings,
    ThemeMode,
    NotificationSettings,
}

impl StateKey {
    pub const ALL: [StateKey; 8] = [
        Self::UserPreferences,
        Self::SidebarState,
        Self::FormData,
        Self::UiSettings,
        Self::SearchHistory,
        Self::FilterSettings,
        Self::ThemeMode,
        Self::NotificationSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPreferences => "user-preferences",
            Self::SidebarState => "sidebar-state",
            Self::FormData => "form-data",
            Self::UiSettings => "ui-settings",
            Self::SearchHistory => "search-history",
            Self::FilterSettings => "filter-settings",
            Self::ThemeMode => "theme-mode",
            Self::NotificationSettings => "notification-settings",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned for keys outside the whitelist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("state key not allowed: {0}")]
pub struct DisallowedKey(pub String);

impl FromStr for StateKey {
    type Err = DisallowedKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DisallowedKey(s.to_string()))
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// A change delivered to key subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub key: StateKey,
    /// `None` when the key was removed.
    pub value: Option<Value>,
    pub old: Option<Value>,
}

/// Key subscriber: `(new, old, key)`.
pub type StateCallback = Arc<dyn Fn(Option<&Value>, Option<&Value>, StateKey) -> Result<(), RaisedError> + Send + Sync>;

/// Options for [`PersistedStateStore::set_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Mirror the value to durable storage.
    pub persist: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl SetOptions {
    /// Keep the value in memory only.
    pub fn memory_only() -> Self {
        Self { persist: false }
    }
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStoreConfig {
    pub prefix: String,
    pub retention: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl From<&StateSection> for StateStoreConfig {
    fn from(section: &StateSection) -> Self {
        Self {
            prefix: section.prefix.clone(),
            retention: section.retention(),
        }
    }
}

/// Store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateStats {
    pub state_count: usize,
    pub subscriber_count: usize,
    /// Bytes of durable envelopes currently stored for whitelisted keys.
    pub storage_bytes: usize,
}

/// Durable form of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    value: Value,
    /// Epoch milliseconds.
    timestamp: i64,
    version: String,
}

impl Envelope {
    /// Parse a stored envelope. `None` for anything malformed.
    fn parse(raw: &str) -> Option<Self> {
        let parsed: Value = serde_json::from_str(raw).ok()?;
        let fields = parsed.as_object()?;
        let value = fields.get("value")?.clone();
        let timestamp = fields.get("timestamp")?.as_i64().filter(|t| *t != 0)?;
        let version = fields
            .get("version")?
            .as_str()
            .filter(|v| !v.is_empty())?
            .to_string();
        Some(Self {
            value,
            timestamp,
            version,
        })
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Builder for [`PersistedStateStore`]. Loading happens in [`build`](Self::build).
pub struct StateStoreBuilder {
    storage: SharedStorage,
    config: StateStoreConfig,
    reporter: Option<SharedReporter>,
    bus: Option<PubSubBus<Value>>,
    clock: SharedClock,
}

impl StateStoreBuilder {
    pub fn config(mut self, config: StateStoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Also publish every change on `bus`.
    pub fn bus(mut self, bus: PubSubBus<Value>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the store and load durable state.
    pub fn build(self) -> PersistedStateStore {
        let store = PersistedStateStore {
            subscribers: PubSubBus::silent(self.reporter.clone()),
            state: RwLock::new(HashMap::new()),
            storage: self.storage,
            config: self.config,
            reporter: self.reporter,
            bus: self.bus,
            clock: self.clock,
        };
        store.load();
        store
    }
}

/// Whitelisted, persisted, observable state.
pub struct PersistedStateStore {
    config: StateStoreConfig,
    state: RwLock<HashMap<StateKey, Value>>,
    subscribers: PubSubBus<StateChange>,
    storage: SharedStorage,
    reporter: Option<SharedReporter>,
    bus: Option<PubSubBus<Value>>,
    clock: SharedClock,
}

impl fmt::Debug for PersistedStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedStateStore")
            .field("config", &self.config)
            .field("keys", &self.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PersistedStateStore {
    pub fn builder(storage: SharedStorage) -> StateStoreBuilder {
        StateStoreBuilder {
            storage,
            config: StateStoreConfig::default(),
            reporter: None,
            bus: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Store with default settings, loaded from `storage`.
    pub fn new(storage: SharedStorage) -> Self {
        Self::builder(storage).build()
    }

    /// Set `key` to a sanitized copy of `value`.
    ///
    /// Returns `false` for keys outside the whitelist. Subscribers are
    /// notified on every accepted write, persisted or not.
    pub fn set_state(&self, key: &str, value: Value, options: SetOptions) -> bool {
        let Some(key) = self.allowed(key, true) else {
            return false;
        };

        let sanitized = sanitize_value(&value);
        let old = self.write().insert(key, sanitized.clone());

        if options.persist {
            self.save(key, &sanitized);
        }

        self.notify(StateChange {
            key,
            value: Some(sanitized),
            old,
        });
        true
    }

    /// Current value of `key`. `None` for absent or disallowed keys.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        let key = self.allowed(key, false)?;
        self.read().get(&key).cloned()
    }

    pub fn get_state_or(&self, key: &str, default: Value) -> Value {
        self.get_state(key).unwrap_or(default)
    }

    /// Subscribe to changes of `key`. `None` for disallowed keys.
    pub fn subscribe(&self, key: &str, callback: StateCallback) -> Option<Subscription> {
        let key = self.allowed(key, true)?;
        Some(self.subscribers.subscribe_fn(key.as_str(), move |change: &StateChange, _| {
            callback(change.value.as_ref(), change.old.as_ref(), change.key)
        }))
    }

    /// Subscribe a plain closure.
    pub fn subscribe_fn<F>(&self, key: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(Option<&Value>, Option<&Value>, StateKey) -> Result<(), RaisedError> + Send + Sync + 'static,
    {
        self.subscribe(key, Arc::new(callback))
    }

    /// Remove `key` from memory and durable storage, notifying subscribers
    /// with `(None, old)`.
    pub fn remove_state(&self, key: &str) -> bool {
        let Some(key) = self.allowed(key, false) else {
            return false;
        };
        let old = self.write().remove(&key);
        self.remove_durable(key);
        self.notify(StateChange {
            key,
            value: None,
            old,
        });
        true
    }

    /// Drop every key from memory and durable storage. Subscribers are not
    /// notified.
    pub fn clear_all(&self) {
        self.write().clear();
        for key in StateKey::ALL {
            self.remove_durable(key);
        }
        tracing::info!("All state cleared");
    }

    pub fn stats(&self) -> StateStats {
        let storage_bytes = StateKey::ALL
            .iter()
            .filter_map(|key| self.storage.get_item(&self.storage_key(*key)).ok().flatten())
            .map(|raw| raw.len())
            .sum();
        StateStats {
            state_count: self.read().len(),
            subscriber_count: self.subscribers.subscriber_count(),
            storage_bytes,
        }
    }

    /// Keys currently holding a value, in whitelist order.
    pub fn keys(&self) -> Vec<StateKey> {
        let state = self.read();
        StateKey::ALL.into_iter().filter(|k| state.contains_key(k)).collect()
    }

    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StateKey, Value>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StateKey, Value>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn storage_key(&self, key: StateKey) -> String {
        format!("{}{}", self.config.prefix, key.as_str())
    }

    fn allowed(&self, key: &str, warn: bool) -> Option<StateKey> {
        match key.parse::<StateKey>() {
            Ok(key) => Some(key),
            Err(err) => {
                if warn {
                    tracing::warn!(key, "Rejected disallowed state key");
                    self.log(ErrorLevel::Warning, err.to_string(), json!({ "key": key }));
                }
                None
            }
        }
    }

    fn log(&self, level: ErrorLevel, error: impl Into<RaisedError>, context: Value) {
        if let Some(reporter) = &self.reporter {
            reporter.log(level, error, context);
        }
    }

    fn notify(&self, change: StateChange) {
        self.subscribers.publish(change.key.as_str(), &change);

        if let Some(bus) = &self.bus {
            let payload = json!({
                "key": change.key.as_str(),
                "value": change.value,
                "old": change.old,
            });
            bus.publish(STATE_CHANGE_EVENT, &payload);
            bus.publish(&format!("{}:{}", STATE_CHANGE_EVENT, change.key), &payload);
        }
    }

    fn save(&self, key: StateKey, value: &Value) {
        let envelope = Envelope {
            value: value.clone(),
            timestamp: self.clock.now().timestamp_millis(),
            version: ENVELOPE_VERSION.to_string(),
        };
        let result = serde_json::to_string(&envelope)
            .map_err(|e| RaisedError::native(&e))
            .and_then(|raw| {
                self.storage
                    .set_item(&self.storage_key(key), &raw)
                    .map_err(RaisedError::from)
            });
        if let Err(err) = result {
            tracing::error!(key = %key, error = %err, "Failed to persist state");
            self.log(ErrorLevel::Error, err, json!({ "key": key.as_str(), "op": "save" }));
        }
    }

    fn remove_durable(&self, key: StateKey) {
        if let Err(err) = self.storage.remove_item(&self.storage_key(key)) {
            tracing::error!(key = %key, error = %err, "Failed to remove persisted state");
            self.log(ErrorLevel::Error, err, json!({ "key": key.as_str(), "op": "remove" }));
        }
    }

    fn load(&self) {
        let now_ms = self.clock.now().timestamp_millis();
        let retention_ms = i64::try_from(self.config.retention.as_millis()).unwrap_or(i64::MAX);
        let mut loaded = 0usize;

        for key in StateKey::ALL {
            let raw = match self.storage.get_item(&self.storage_key(key)) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Failed to load persisted state");
                    self.log(ErrorLevel::Warning, err, json!({ "key": key.as_str(), "op": "load" }));
                    continue;
                }
            };

            match Envelope::parse(&raw) {
                Some(envelope) if now_ms.saturating_sub(envelope.timestamp) <= retention_ms => {
                    tracing::trace!(key = %key, version = %envelope.version, "Loaded persisted state");
                    self.write().insert(key, sanitize_value(&envelope.value));
                    loaded += 1;
                }
                Some(envelope) => {
                    tracing::debug!(key = %key, timestamp = envelope.timestamp, "Discarding stale persisted state");
                    self.remove_durable(key);
                }
                None => {
                    tracing::warn!(key = %key, "Discarding malformed persisted state");
                    self.remove_durable(key);
                }
            }
        }
        tracing::debug!(loaded, "Persisted state loaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wavespace_core::{Clock, DurableStorage, ManualClock, MemoryStorage};
    use wavespace_test_utils::{fixed_clock, recording_reporter, FailingStorage};

    fn store_with(storage: Arc<dyn DurableStorage>, clock: Arc<ManualClock>) -> PersistedStateStore {
        PersistedStateStore::builder(storage).clock(clock).build()
    }

    #[test]
    fn test_ui_settings_are_sanitized_and_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone(), fixed_clock());

        assert!(store.set_state("ui-settings", json!({ "theme": "<b>x</b>" }), SetOptions::default()));
        assert_eq!(
            store.get_state("ui-settings"),
            Some(json!({ "theme": "&lt;b&gt;x&lt;/b&gt;" }))
        );

        let raw = storage.get_item("wave-space-ui-settings").unwrap().unwrap();
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope["value"]["theme"], "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(envelope["version"], "1.0");
        assert!(envelope["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_disallowed_key_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistedStateStore::new(storage.clone());
        assert!(!store.set_state("__proto__", json!(1), SetOptions::default()));
        assert_eq!(store.get_state("__proto__"), None);
        assert!(store.subscribe_fn("admin-token", |_, _, _| Ok(())).is_none());
        assert!(!store.remove_state("admin-token"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_get_state_or_default() {
        let store = PersistedStateStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.get_state_or("theme-mode", json!("light")), json!("light"));
        assert_eq!(store.get_state_or("nope", json!(0)), json!(0));
        store.set_state("theme-mode", json!("dark"), SetOptions::default());
        assert_eq!(store.get_state_or("theme-mode", json!("light")), json!("dark"));
    }

    #[test]
    fn test_memory_only_write_skips_storage_but_notifies() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistedStateStore::new(storage.clone());
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        store.subscribe_fn("form-data", move |_, _, _| {
            *c.lock().unwrap() += 1;
            Ok(())
        });

        store.set_state("form-data", json!({ "title": "draft" }), SetOptions::memory_only());
        assert_eq!(storage.get_item("wave-space-form-data").unwrap(), None);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_subscribers_receive_new_and_old() {
        let store = PersistedStateStore::new(Arc::new(MemoryStorage::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = store
            .subscribe_fn("sidebar-state", move |new, old, key| {
                s.lock().unwrap().push((new.cloned(), old.cloned(), key));
                Ok(())
            })
            .unwrap();

        store.set_state("sidebar-state", json!("open"), SetOptions::default());
        store.set_state("sidebar-state", json!("closed"), SetOptions::default());
        store.remove_state("sidebar-state");
        sub.dispose();
        store.set_state("sidebar-state", json!("ignored"), SetOptions::default());

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (Some(json!("open")), None, StateKey::SidebarState),
                (Some(json!("closed")), Some(json!("open")), StateKey::SidebarState),
                (None, Some(json!("closed")), StateKey::SidebarState),
            ]
        );
    }

    #[test]
    fn test_failing_subscriber_does_not_block_write() {
        let (reporter, notifier) = recording_reporter();
        let store = PersistedStateStore::builder(Arc::new(MemoryStorage::new()))
            .reporter(reporter.clone())
            .build();
        store.subscribe_fn("theme-mode", |_, _, _| Err(RaisedError::from("subscriber broke")));
        let ok = Arc::new(Mutex::new(false));
        let o = ok.clone();
        store.subscribe_fn("theme-mode", move |_, _, _| {
            *o.lock().unwrap() = true;
            Ok(())
        });

        assert!(store.set_state("theme-mode", json!("dark"), SetOptions::default()));
        assert!(*ok.lock().unwrap());
        assert_eq!(reporter.len(), 1);
        assert!(notifier.shown().is_empty());
    }

    #[test]
    fn test_reload_restores_fresh_state() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = fixed_clock();
        let store = store_with(storage.clone(), clock.clone());
        store.set_state("search-history", json!(["rust", "tokio"]), SetOptions::default());

        clock.advance(Duration::from_secs(6 * 24 * 3600));
        let reloaded = store_with(storage, clock);
        assert_eq!(reloaded.get_state("search-history"), Some(json!(["rust", "tokio"])));
    }

    #[test]
    fn test_stale_envelope_discarded_on_load() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = fixed_clock();
        let store = store_with(storage.clone(), clock.clone());
        store.set_state("filter-settings", json!({ "sort": "new" }), SetOptions::default());

        clock.advance(DEFAULT_RETENTION + Duration::from_millis(1));
        let reloaded = store_with(storage.clone(), clock);
        assert_eq!(reloaded.get_state("filter-settings"), None);
        assert_eq!(storage.get_item("wave-space-filter-settings").unwrap(), None);
    }

    #[test]
    fn test_malformed_envelopes_discarded_on_load() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item("wave-space-ui-settings", "not json").unwrap();
        storage
            .set_item("wave-space-theme-mode", r#"{"value":"dark","timestamp":0,"version":"1.0"}"#)
            .unwrap();
        storage
            .set_item("wave-space-form-data", r#"{"timestamp":1,"version":"1.0"}"#)
            .unwrap();

        let store = store_with(storage.clone(), fixed_clock());
        assert!(store.keys().is_empty());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_loaded_values_are_resanitized() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = fixed_clock();
        let envelope = json!({
            "value": { "name": "<script>x</script>Ann" },
            "timestamp": clock.now().timestamp_millis(),
            "version": "1.0",
        });
        storage
            .set_item("wave-space-user-preferences", &envelope.to_string())
            .unwrap();

        let store = store_with(storage, clock);
        assert_eq!(store.get_state("user-preferences"), Some(json!({ "name": "Ann" })));
    }

    #[test]
    fn test_storage_failure_keeps_memory_authoritative() {
        let (reporter, _) = recording_reporter();
        let storage = FailingStorage::new();
        storage.fail_writes(true);
        let store = PersistedStateStore::builder(storage)
            .reporter(reporter.clone())
            .build();

        assert!(store.set_state("ui-settings", json!({ "density": "compact" }), SetOptions::default()));
        assert_eq!(store.get_state("ui-settings"), Some(json!({ "density": "compact" })));
        assert_eq!(reporter.len(), 1);
        assert_eq!(reporter.records(1)[0].context["op"], "save");
    }

    #[test]
    fn test_clear_all_does_not_notify() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistedStateStore::new(storage.clone());
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        store.set_state("theme-mode", json!("dark"), SetOptions::default());
        store.subscribe_fn("theme-mode", move |_, _, _| {
            *c.lock().unwrap() += 1;
            Ok(())
        });

        store.clear_all();
        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(store.keys().is_empty());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_shared_bus_receives_changes() {
        let bus: PubSubBus<Value> = PubSubBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = seen.clone();
        let s2 = seen.clone();
        bus.subscribe_fn(STATE_CHANGE_EVENT, move |payload, event| {
            s1.lock().unwrap().push((event.to_string(), payload["value"].clone()));
            Ok(())
        });
        bus.subscribe_fn("state:change:theme-mode", move |payload, event| {
            s2.lock().unwrap().push((event.to_string(), payload["old"].clone()));
            Ok(())
        });

        let store = PersistedStateStore::builder(Arc::new(MemoryStorage::new()))
            .bus(bus)
            .build();
        store.set_state("theme-mode", json!("dark"), SetOptions::default());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("state:change".to_string(), json!("dark")),
                ("state:change:theme-mode".to_string(), Value::Null),
            ]
        );
    }

    #[test]
    fn test_stats() {
        let store = PersistedStateStore::new(Arc::new(MemoryStorage::new()));
        store.set_state("theme-mode", json!("dark"), SetOptions::default());
        store.set_state("form-data", json!({}), SetOptions::memory_only());
        store.subscribe_fn("theme-mode", |_, _, _| Ok(()));

        let stats = store.stats();
        assert_eq!(stats.state_count, 2);
        assert_eq!(stats.subscriber_count, 1);
        assert!(stats.storage_bytes > 0);
    }

    #[test]
    fn test_state_key_roundtrip() {
        for key in StateKey::ALL {
            assert_eq!(key.as_str().parse::<StateKey>().unwrap(), key);
        }
        assert_eq!(
            serde_json::to_string(&StateKey::NotificationSettings).unwrap(),
            "\"notification-settings\""
        );
    }
}
