//! End-to-end smoke tests for the assembled client runtime

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wavespace_client::{ClientRuntime, RemoteResponse, RequestFn, RequestOptions, RetryPolicy};
use wavespace_core::{
    DurableStorage, ErrorKind, ErrorLevel, MemoryStorage, RemoteError, ReportMode, RuntimeConfig,
};
use wavespace_events::{DomEvent, EventTarget, EventType, InputElement, ListenerOptions};
use wavespace_storage::SetOptions;
use wavespace_test_utils::{fixed_clock, RecordingNotifier, RecordingSink, ScriptedPrompt};

/// Backend that replays queued responses; an empty queue answers 200 `null`.
#[derive(Default)]
struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<RemoteResponse, RemoteError>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn with(responses: Vec<Result<RemoteResponse, RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestFn for ScriptedBackend {
    async fn request(&self, endpoint: &str, options: &RequestOptions) -> Result<RemoteResponse, RemoteError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("{} {}", options.method, endpoint));
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RemoteResponse::ok(Value::Null)))
    }
}

type Harness = (ClientRuntime, Arc<RecordingNotifier>, Arc<RecordingSink>, Arc<MemoryStorage>);

fn runtime_with(backend: Arc<ScriptedBackend>, mode: ReportMode) -> Harness {
    let notifier = RecordingNotifier::new();
    let sink = RecordingSink::new();
    let storage = Arc::new(MemoryStorage::new());
    let mut config = RuntimeConfig::default();
    config.mode = mode;

    let runtime = ClientRuntime::builder(config)
        .backend(backend)
        .storage(storage.clone())
        .notifier(notifier.clone())
        .prompt(ScriptedPrompt::declining())
        .sink(sink.clone())
        .clock(fixed_clock())
        .build()
        .unwrap();
    (runtime, notifier, sink, storage)
}

#[tokio::test]
async fn smoke_test_remote_result_flows_into_state_and_bus() {
    let backend = ScriptedBackend::with(vec![Ok(RemoteResponse::ok(json!({ "theme": "<b>x</b>" })))]);
    let (runtime, notifier, _, storage) = runtime_with(backend.clone(), ReportMode::Production);

    let changes = Arc::new(Mutex::new(Vec::new()));
    let c = changes.clone();
    runtime.bus().subscribe_fn("state:change:ui-settings", move |payload, _| {
        c.lock().unwrap().push(payload["value"].clone());
        Ok(())
    });

    let settings = runtime.remote().call("/settings", RequestOptions::get()).await.unwrap();
    assert!(runtime.state().set_state("ui-settings", settings, SetOptions::default()));

    // Second read is served from the shared cache.
    runtime.remote().call("/settings", RequestOptions::get()).await.unwrap();
    assert_eq!(backend.requests(), vec!["GET /settings"]);
    assert!(runtime.cache().contains("api:/settings:{}"));

    assert_eq!(
        runtime.state().get_state("ui-settings"),
        Some(json!({ "theme": "&lt;b&gt;x&lt;/b&gt;" }))
    );
    assert_eq!(*changes.lock().unwrap(), vec![json!({ "theme": "&lt;b&gt;x&lt;/b&gt;" })]);
    assert!(storage.get_item("wave-space-ui-settings").unwrap().is_some());
    assert!(notifier.shown().is_empty());
}

#[tokio::test]
async fn smoke_test_dispatcher_writes_sanitized_input_into_state() {
    let (runtime, _, _, _) = runtime_with(ScriptedBackend::with(Vec::new()), ReportMode::Production);
    let search = InputElement::new("search").with_value("<script>steal()</script>rust").shared();

    let state = runtime.state().clone();
    assert!(runtime.dispatcher().on_fn(
        search.clone(),
        "change",
        move |event: &DomEvent| {
            let query = event.target.value().unwrap_or_default();
            state.set_state("search-history", json!([query]), SetOptions::default());
            Ok(())
        },
        ListenerOptions::default(),
    ));
    assert!(!runtime
        .dispatcher()
        .on_fn(search.clone(), "contextmenu", |_| Ok(()), ListenerOptions::default()));

    assert_eq!(runtime.dispatcher().dispatch(DomEvent::new(EventType::Change, search.clone())), 1);
    assert_eq!(runtime.state().get_state("search-history"), Some(json!(["rust"])));
    assert_eq!(search.value().as_deref(), Some("rust"));

    runtime.shutdown();
    assert_eq!(runtime.dispatcher().dispatch(DomEvent::new(EventType::Change, search)), 0);
}

#[tokio::test(start_paused = true)]
async fn smoke_test_failed_call_is_classified_and_notified() {
    let backend = ScriptedBackend::with(vec![
        Ok(RemoteResponse::new(429, json!({ "message": "slow down" }))),
        Ok(RemoteResponse::new(429, json!({ "message": "slow down" }))),
    ]);
    let (runtime, notifier, sink, _) = runtime_with(backend.clone(), ReportMode::Production);

    let err = runtime
        .remote()
        .call_with_retry("/posts", RequestOptions::get(), RetryPolicy::new(2, Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert_eq!(err.taxonomy_code(), "rate-limit");
    assert_eq!(backend.requests().len(), 2);

    let records = runtime.reporter().records(10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, ErrorKind::RateLimit);
    assert_eq!(records[0].level, ErrorLevel::Error);
    assert_eq!(notifier.texts(), vec![records[0].user_message.clone()]);
    // Only critical records leave the process.
    assert!(sink.submitted().is_empty());
}

#[tokio::test]
async fn smoke_test_production_critical_goes_to_sink() {
    let (runtime, _, sink, storage) = runtime_with(ScriptedBackend::with(Vec::new()), ReportMode::Production);
    runtime.reporter().critical("session-expired", json!({ "page": "admin" }));

    let submitted = sink.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].level, ErrorLevel::Critical);
    assert_eq!(storage.get_item("wave-error-logs").unwrap(), None);
}

#[tokio::test]
async fn smoke_test_development_persists_error_log() {
    let (runtime, _, sink, storage) = runtime_with(ScriptedBackend::with(Vec::new()), ReportMode::Development);
    runtime.reporter().warning("validation/required", Value::Null);
    runtime.reporter().error("Failed to fetch", Value::Null);

    let persisted = runtime.reporter().persisted_records();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].kind, ErrorKind::Network);
    assert!(storage.get_item("wave-error-logs").unwrap().is_some());
    assert!(sink.submitted().is_empty());

    runtime.reporter().clear_logs();
    assert!(runtime.reporter().persisted_records().is_empty());
}
