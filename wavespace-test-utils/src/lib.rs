//! WAVE SPACE Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Recording doubles for the reporter's notifier, prompt and sink
//! - A durable storage backend that fails on demand
//! - Proptest generators for hostile input and JSON payloads

pub use wavespace_core::{
    DurableStorage, ErrorLevel, ErrorRecord, ErrorReporter, ErrorSink, ManualClock, MemoryStorage, Notification,
    Notifier, RemoteError, ReportMode, ReporterConfig, StorageError, StorageResult, UserPrompt,
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// REPORTER DOUBLES
// ============================================================================

/// Notifier that remembers everything shown.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.shown().into_iter().map(|n| n.text).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: Notification) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Prompt with a scripted confirm answer.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    accept: AtomicBool,
    alerts: Mutex<Vec<String>>,
    confirms: AtomicUsize,
    reloads: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn accepting() -> Arc<Self> {
        let prompt = Self::default();
        prompt.accept.store(true, Ordering::SeqCst);
        Arc::new(prompt)
    }

    pub fn declining() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn confirms(&self) -> usize {
        self.confirms.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl UserPrompt for ScriptedPrompt {
    fn alert(&self, text: &str) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    fn confirm(&self, _text: &str) -> bool {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        self.accept.load(Ordering::SeqCst)
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that keeps submitted records.
#[derive(Debug, Default)]
pub struct RecordingSink {
    submitted: Mutex<Vec<ErrorRecord>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submitted(&self) -> Vec<ErrorRecord> {
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ErrorSink for RecordingSink {
    fn submit(&self, record: &ErrorRecord) -> Result<(), RemoteError> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Reporter wired to a recording notifier and a declining prompt.
pub fn recording_reporter() -> (Arc<ErrorReporter>, Arc<RecordingNotifier>) {
    let notifier = RecordingNotifier::new();
    let reporter = ErrorReporter::new(ReporterConfig::new(ReportMode::Production))
        .with_notifier(notifier.clone())
        .with_prompt(ScriptedPrompt::declining());
    (Arc::new(reporter), notifier)
}

// ============================================================================
// STORAGE DOUBLES
// ============================================================================

/// Memory storage whose reads and writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DurableStorage for FailingStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.remove_item(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        self.inner.keys()
    }
}

/// A manual clock at a fixed, readable instant.
pub fn fixed_clock() -> Arc<ManualClock> {
    let start: DateTime<Utc> = DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_else(Utc::now);
    Arc::new(ManualClock::new(start))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Fragments that exercise the sanitizer.
    pub fn hostile_fragment() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "<script>alert(1)</script>",
            "<b>",
            "</b>",
            "javascript:",
            "onload=",
            "<iframe src=x></iframe>",
            "&",
            "\"",
            "'",
            "hello",
            " ",
        ])
        .prop_map(str::to_string)
    }

    pub fn hostile_text() -> impl Strategy<Value = String> {
        prop::collection::vec(prop_oneof![hostile_fragment(), "[a-z0-9 ]{0,8}"], 0..8).prop_map(|p| p.concat())
    }

    /// Small JSON documents with hostile strings at the leaves.
    pub fn json_payload() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            hostile_text().prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                    .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<String, Value>>())),
            ]
        })
    }

    /// Cache keys drawn from a small alphabet so collisions happen.
    pub fn cache_key() -> impl Strategy<Value = String> {
        "[a-e]{1,2}"
    }
}

/// Convenience: the payload of the sanitizing scenario.
pub fn ui_settings_payload() -> Value {
    serde_json::json!({ "theme": "<b>x</b>" })
}
