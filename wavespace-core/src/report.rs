//! Error Reporter.
//!
//! Every handled error runs the same pipeline: parse, classify, record,
//! optionally notify the user, and escalate when critical. The reporter never
//! fails: storage and sink problems are logged and swallowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::durable::SharedStorage;
use crate::error::RemoteError;
use crate::raised::RaisedError;
use crate::taxonomy::{classify_parsed, ErrorKind, ErrorLevel};

/// Default ring buffer size.
pub const DEFAULT_MAX_LOG_SIZE: usize = 100;

/// Default number of records kept in durable storage in development mode.
pub const DEFAULT_MAX_PERSISTED_LOGS: usize = 50;

/// Durable storage key for persisted records.
pub const DEFAULT_LOG_STORAGE_KEY: &str = "wave-error-logs";

const CRITICAL_DISMISS: Duration = Duration::from_secs(10);
const DEFAULT_DISMISS: Duration = Duration::from_secs(5);
const RELOAD_PROMPT: &str = "A serious error occurred. Reload the page?";

// ============================================================================
// RECORDS AND COLLABORATORS
// ============================================================================

/// A handled error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    /// Internal message. Never shown to the user.
    pub message: String,
    pub kind: ErrorKind,
    pub level: ErrorLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub user_message: String,
    #[serde(default)]
    pub context: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub level: ErrorLevel,
    pub dismiss_after: Duration,
}

impl Notification {
    pub fn new(text: impl Into<String>, level: ErrorLevel) -> Self {
        let dismiss_after = if level == ErrorLevel::Critical {
            CRITICAL_DISMISS
        } else {
            DEFAULT_DISMISS
        };
        Self {
            text: text.into(),
            level,
            dismiss_after,
        }
    }
}

/// Non-blocking notification surface (a toast, a status line).
pub trait Notifier: Send + Sync {
    fn show(&self, notification: Notification);
}

/// Blocking user prompts.
pub trait UserPrompt: Send + Sync {
    fn alert(&self, text: &str);

    fn confirm(&self, text: &str) -> bool;

    fn reload(&self);
}

/// Prompt for headless use: alerts are logged, confirmations declined.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPrompt;

impl UserPrompt for HeadlessPrompt {
    fn alert(&self, text: &str) {
        tracing::info!(text, "alert");
    }

    fn confirm(&self, text: &str) -> bool {
        tracing::info!(text, "confirm declined (headless)");
        false
    }

    fn reload(&self) {
        tracing::info!("reload requested (headless)");
    }
}

/// Remote destination for critical records in production.
pub trait ErrorSink: Send + Sync {
    fn submit(&self, record: &ErrorRecord) -> Result<(), RemoteError>;
}

/// Which side effects the reporter performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Verbose logs and durable record history.
    Development,
    /// Quiet logs; critical records go to the sink.
    #[default]
    Production,
}

// ============================================================================
// CONFIG
// ============================================================================

/// Reporter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterConfig {
    pub mode: ReportMode,
    pub max_log_size: usize,
    pub max_persisted_logs: usize,
    pub log_storage_key: String,
    /// Page URL stamped on every record.
    pub url: Option<String>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            mode: ReportMode::default(),
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            max_persisted_logs: DEFAULT_MAX_PERSISTED_LOGS,
            log_storage_key: DEFAULT_LOG_STORAGE_KEY.to_string(),
            url: None,
        }
    }
}

impl ReporterConfig {
    pub fn new(mode: ReportMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_max_log_size(mut self, size: usize) -> Self {
        self.max_log_size = size;
        self
    }

    pub fn with_max_persisted_logs(mut self, size: usize) -> Self {
        self.max_persisted_logs = size;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Per-call options for [`ErrorReporter::handle`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub notify: bool,
    pub context: Value,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            notify: true,
            context: Value::Object(Map::new()),
        }
    }
}

impl ReportOptions {
    /// Record and log only.
    pub fn silent() -> Self {
        Self {
            notify: false,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

// ============================================================================
// PANIC CAPTURE
// ============================================================================

thread_local! {
    static CONTAINED: Cell<usize> = const { Cell::new(0) };
}

/// Run `f`, catching any panic. Panics caught here are already handled by
/// the caller and are skipped by [`ErrorReporter::install_panic_hook`].
pub fn catch_contained<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    CONTAINED.with(|depth| depth.set(depth.get() + 1));
    let outcome = catch_unwind(AssertUnwindSafe(f));
    CONTAINED.with(|depth| depth.set(depth.get() - 1));
    outcome
}

fn panic_is_contained() -> bool {
    CONTAINED.with(|depth| depth.get() > 0)
}

// ============================================================================
// REPORTER
// ============================================================================

/// Central error reporter.
pub struct ErrorReporter {
    config: ReporterConfig,
    records: Mutex<VecDeque<ErrorRecord>>,
    notifier: Option<Arc<dyn Notifier>>,
    prompt: Arc<dyn UserPrompt>,
    sink: Option<Arc<dyn ErrorSink>>,
    storage: Option<SharedStorage>,
    persist_lock: Mutex<()>,
    clock: SharedClock,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("config", &self.config)
            .field("records", &self.len())
            .field("notifier", &self.notifier.is_some())
            .field("sink", &self.sink.is_some())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(ReporterConfig::default())
    }
}

impl ErrorReporter {
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(config.max_log_size)),
            config,
            notifier: None,
            prompt: Arc::new(HeadlessPrompt),
            sink: None,
            storage: None,
            persist_lock: Mutex::new(()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn UserPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Route uncaught panics into [`handle`](Self::handle) at critical
    /// level, then run the previously installed hook. The hook holds a weak
    /// reference and goes quiet once the reporter is dropped.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let reporter = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !panic_is_contained() {
                if let Some(reporter) = reporter.upgrade() {
                    let location = info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                    let context = json!({
                        "source": "panic",
                        "thread": std::thread::current().name().unwrap_or("unnamed"),
                        "location": location,
                    });
                    reporter.handle(
                        RaisedError::from_panic(info.payload()),
                        ErrorLevel::Critical,
                        ReportOptions::default().with_context(context),
                    );
                }
            }
            previous(info);
        }));
        tracing::debug!("Panic hook installed");
    }

    /// Handle an error and return the message suitable for the user.
    pub fn handle(&self, error: impl Into<RaisedError>, level: ErrorLevel, options: ReportOptions) -> String {
        let parsed = error.into().parse();
        let classification = classify_parsed(&parsed);

        let context = match options.context {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let context = match parsed.details {
            Some(details) => with_details(context, details),
            None => context,
        };

        let record = ErrorRecord {
            id: Uuid::now_v7(),
            message: classification.message,
            kind: classification.kind,
            level,
            code: classification.code,
            user_message: classification.user_message.to_string(),
            context,
            timestamp: self.clock.now(),
            url: self.config.url.clone(),
        };
        let user_message = record.user_message.clone();

        self.log_record(&record);

        if options.notify {
            self.notify(&user_message, level);
        }

        if level == ErrorLevel::Critical {
            self.escalate(&record);
        }

        user_message
    }

    pub fn info(&self, error: impl Into<RaisedError>, context: Value) -> String {
        self.handle(error, ErrorLevel::Info, ReportOptions::default().with_context(context))
    }

    pub fn warning(&self, error: impl Into<RaisedError>, context: Value) -> String {
        self.handle(error, ErrorLevel::Warning, ReportOptions::default().with_context(context))
    }

    pub fn error(&self, error: impl Into<RaisedError>, context: Value) -> String {
        self.handle(error, ErrorLevel::Error, ReportOptions::default().with_context(context))
    }

    pub fn critical(&self, error: impl Into<RaisedError>, context: Value) -> String {
        self.handle(error, ErrorLevel::Critical, ReportOptions::default().with_context(context))
    }

    /// Record without notifying the user.
    pub fn log(&self, level: ErrorLevel, error: impl Into<RaisedError>, context: Value) -> String {
        self.handle(error, level, ReportOptions::silent().with_context(context))
    }

    /// The newest `limit` records, newest first.
    pub fn records(&self, limit: usize) -> Vec<ErrorRecord> {
        self.lock_records().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records kept in durable storage, newest first. Unreadable history is
    /// treated as empty.
    pub fn persisted_records(&self) -> Vec<ErrorRecord> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        match storage.get_item(&self.config.log_storage_key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable persisted error log");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted error log");
                Vec::new()
            }
        }
    }

    /// Drop the ring buffer and the persisted history.
    pub fn clear_logs(&self) {
        self.lock_records().clear();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.remove_item(&self.config.log_storage_key) {
                tracing::warn!(error = %e, "Failed to clear persisted error log");
            }
        }
        tracing::debug!("Error logs cleared");
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_record(&self, record: &ErrorRecord) {
        {
            let mut records = self.lock_records();
            records.push_front(record.clone());
            records.truncate(self.config.max_log_size);
        }

        match self.config.mode {
            ReportMode::Development => {
                trace_record(record);
                self.persist(record);
            }
            ReportMode::Production => {
                tracing::debug!(
                    id = %record.id,
                    kind = %record.kind,
                    level = %record.level,
                    code = record.code.as_deref(),
                    "Error recorded"
                );
                if record.level == ErrorLevel::Critical {
                    self.forward(record);
                }
            }
        }
    }

    fn persist(&self, record: &ErrorRecord) {
        let Some(storage) = &self.storage else {
            return;
        };
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut history = self.persisted_records();
        history.insert(0, record.clone());
        history.truncate(self.config.max_persisted_logs);

        let result = serde_json::to_string(&history)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                storage
                    .set_item(&self.config.log_storage_key, &raw)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist error log");
        }
    }

    fn forward(&self, record: &ErrorRecord) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.submit(record) {
            tracing::warn!(error = %e, id = %record.id, "Failed to report error to server");
        }
    }

    fn notify(&self, text: &str, level: ErrorLevel) {
        if text.is_empty() {
            return;
        }
        match &self.notifier {
            Some(notifier) => notifier.show(Notification::new(text, level)),
            None => self.prompt.alert(text),
        }
    }

    fn escalate(&self, record: &ErrorRecord) {
        tracing::error!(
            id = %record.id,
            message = %record.message,
            context = %record.context,
            "CRITICAL ERROR"
        );
        if self.prompt.confirm(RELOAD_PROMPT) {
            self.prompt.reload();
        }
    }
}

fn trace_record(record: &ErrorRecord) {
    let code = record.code.as_deref();
    match record.level {
        ErrorLevel::Critical | ErrorLevel::Error => tracing::error!(
            id = %record.id,
            kind = %record.kind,
            code,
            message = %record.message,
            context = %record.context,
            "Error handled"
        ),
        ErrorLevel::Warning => tracing::warn!(
            id = %record.id,
            kind = %record.kind,
            code,
            message = %record.message,
            context = %record.context,
            "Warning handled"
        ),
        ErrorLevel::Info => tracing::info!(
            id = %record.id,
            kind = %record.kind,
            message = %record.message,
            "Info handled"
        ),
        ErrorLevel::Debug => tracing::debug!(
            id = %record.id,
            message = %record.message,
            "Debug handled"
        ),
    }
}

fn with_details(context: Value, details: Value) -> Value {
    match context {
        Value::Object(mut fields) => {
            fields.entry("details").or_insert(details);
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("context".to_string(), other);
            fields.insert("details".to_string(), details);
            Value::Object(fields)
        }
    }
}
