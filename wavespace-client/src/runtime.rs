//! Service container.
//!
//! Built once at start-up. Every service shares the same reporter, clock and
//! durable storage; handles are cheap to clone.

use serde_json::{json, Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

use wavespace_core::{
    ConfigError, ErrorReporter, ErrorSink, MemoryStorage, Notifier, RuntimeConfig, SharedClock, SharedReporter,
    SharedStorage, SystemClock, UserPrompt, WavespaceResult,
};
use wavespace_events::{GuardedDispatcher, PubSubBus};
use wavespace_storage::{CacheConfig, PersistedStateStore, StateStoreConfig, TtlCache};

use crate::http::{HttpBackend, HttpErrorSink};
use crate::remote::{RemoteCallWrapper, RequestFn};

/// Bus event published for every runtime config change.
pub const CONFIG_CHANGE_EVENT: &str = "config:change";

fn assign(node: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(fields) = node {
        let child = fields.entry(first.to_string()).or_insert(Value::Null);
        assign(child, rest, value);
    }
}

/// Builder for [`ClientRuntime`]. Collaborators not injected are derived
/// from the config.
pub struct ClientRuntimeBuilder {
    config: RuntimeConfig,
    storage: Option<SharedStorage>,
    backend: Option<Arc<dyn RequestFn>>,
    notifier: Option<Arc<dyn Notifier>>,
    prompt: Option<Arc<dyn UserPrompt>>,
    sink: Option<Arc<dyn ErrorSink>>,
    clock: Option<SharedClock>,
    page_url: Option<String>,
}

impl ClientRuntimeBuilder {
    /// Durable storage. Defaults to in-memory.
    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Request transport. Defaults to HTTP against `remote.base_url`.
    pub fn backend(mut self, backend: Arc<dyn RequestFn>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn UserPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Error sink. Defaults to HTTP against `remote.error_report_endpoint`
    /// when set.
    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Page URL stamped on error records.
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn build(self) -> WavespaceResult<ClientRuntime> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let backend: Arc<dyn RequestFn> = match (self.backend, config.remote.base_url.as_deref()) {
            (Some(backend), _) => backend,
            (None, Some(base_url)) => Arc::new(HttpBackend::with_timeout(base_url, config.remote.request_timeout())?),
            (None, None) => {
                return Err(ConfigError::InvalidValue {
                    field: "remote.base_url",
                    reason: "required when no request backend is provided".to_string(),
                }
                .into())
            }
        };

        let sink: Option<Arc<dyn ErrorSink>> = match (self.sink, config.remote.error_report_endpoint.as_deref()) {
            (Some(sink), _) => Some(sink),
            (None, Some(endpoint)) => Some(Arc::new(HttpErrorSink::new(endpoint)?)),
            (None, None) => None,
        };

        let mut reporter_config = config.reporter_config();
        reporter_config.url = self.page_url;
        let mut reporter = ErrorReporter::new(reporter_config)
            .with_storage(Arc::clone(&storage))
            .with_clock(Arc::clone(&clock));
        if let Some(notifier) = self.notifier {
            reporter = reporter.with_notifier(notifier);
        }
        if let Some(prompt) = self.prompt {
            reporter = reporter.with_prompt(prompt);
        }
        if let Some(sink) = sink {
            reporter = reporter.with_sink(sink);
        }
        let reporter: SharedReporter = Arc::new(reporter);
        if config.reporter.capture_panics {
            reporter.install_panic_hook();
        }

        let cache = Arc::new(TtlCache::new(CacheConfig::from(&config.cache)).with_clock(Arc::clone(&clock)));
        let bus = PubSubBus::with_reporter(Arc::clone(&reporter));
        let state = Arc::new(
            PersistedStateStore::builder(Arc::clone(&storage))
                .config(StateStoreConfig::from(&config.state))
                .reporter(Arc::clone(&reporter))
                .bus(bus.clone())
                .clock(Arc::clone(&clock))
                .build(),
        );
        let dispatcher = GuardedDispatcher::with_reporter(Arc::clone(&reporter));
        let remote = Arc::new(
            RemoteCallWrapper::new(backend, Arc::clone(&cache))
                .with_reporter(Arc::clone(&reporter))
                .configured(&config.remote),
        );

        let settings = serde_json::to_value(&config).unwrap_or_else(|_| Value::Object(Map::new()));

        tracing::info!(mode = ?config.mode, "Client runtime ready");
        Ok(ClientRuntime {
            settings: Arc::new(RwLock::new(settings)),
            config,
            reporter,
            cache,
            state,
            bus,
            dispatcher,
            remote,
        })
    }
}

/// Shared services of one client session.
#[derive(Debug, Clone)]
pub struct ClientRuntime {
    config: RuntimeConfig,
    settings: Arc<RwLock<Value>>,
    reporter: SharedReporter,
    cache: Arc<TtlCache<Value>>,
    state: Arc<PersistedStateStore>,
    bus: PubSubBus<Value>,
    dispatcher: GuardedDispatcher,
    remote: Arc<RemoteCallWrapper>,
}

impl ClientRuntime {
    pub fn builder(config: RuntimeConfig) -> ClientRuntimeBuilder {
        ClientRuntimeBuilder {
            config,
            storage: None,
            backend: None,
            notifier: None,
            prompt: None,
            sink: None,
            clock: None,
            page_url: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Setting at a dotted `key` such as `cache.max_size`. Seeded from the
    /// start-up config, then updated by [`set_config_value`](Self::set_config_value).
    pub fn get_config_value(&self, key: &str) -> Option<Value> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        key.split('.')
            .try_fold(&*settings, |node, part| node.get(part))
            .cloned()
    }

    /// Like [`get_config_value`](Self::get_config_value), with a fallback for
    /// missing or null settings.
    pub fn get_config_value_or(&self, key: &str, default: Value) -> Value {
        self.get_config_value(key).filter(|v| !v.is_null()).unwrap_or(default)
    }

    /// Store a setting at a dotted `key`, creating intermediate objects, and
    /// publish `config:change` and `config:change:<key>` on the bus.
    ///
    /// Running services keep the values they were built with.
    pub fn set_config_value(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        let path: Vec<&str> = key.split('.').collect();
        if path.iter().any(|part| part.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "settings",
                reason: format!("malformed key '{}'", key),
            });
        }
        {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            assign(&mut settings, &path, value.clone());
        }

        tracing::debug!(key, "Config value changed");
        self.bus
            .publish(CONFIG_CHANGE_EVENT, &json!({ "key": key, "value": value }));
        self.bus.publish(&format!("{}:{}", CONFIG_CHANGE_EVENT, key), &value);
        Ok(())
    }

    pub fn reporter(&self) -> &SharedReporter {
        &self.reporter
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn state(&self) -> &Arc<PersistedStateStore> {
        &self.state
    }

    pub fn bus(&self) -> &PubSubBus<Value> {
        &self.bus
    }

    pub fn dispatcher(&self) -> &GuardedDispatcher {
        &self.dispatcher
    }

    pub fn remote(&self) -> &Arc<RemoteCallWrapper> {
        &self.remote
    }

    /// Remove every listener, pending timer and bus subscriber. State and
    /// cache contents are kept.
    pub fn shutdown(&self) {
        self.dispatcher.cleanup();
        self.bus.cleanup();
        tracing::info!("Client runtime shut down");
    }
}
