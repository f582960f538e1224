//! Guarded event dispatch.
//!
//! Listeners are only accepted for whitelisted event types. Every delivery
//! runs through a wrapper that sanitizes the target's value and contains
//! handler failures. Throttle and debounce timers run on the tokio runtime.

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use wavespace_core::{catch_contained, sanitize, ErrorLevel, RaisedError, SharedReporter};

use crate::target::{DomEvent, EventType, SharedTarget};

/// Listener callback.
pub type EventHandler = Arc<dyn Fn(&DomEvent) -> Result<(), RaisedError> + Send + Sync>;

/// Which call a throttled listener keeps inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleEdge {
    /// The first call fires; the rest of the window is dropped.
    #[default]
    Leading,
    /// The first call fires; the last call inside the window fires when it
    /// closes.
    Trailing,
}

/// Per-listener scheduling options. Throttle takes precedence over debounce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub throttle: Option<Duration>,
    pub throttle_edge: ThrottleEdge,
    pub debounce: Option<Duration>,
    pub passive: bool,
}

impl ListenerOptions {
    pub fn throttled(window: Duration) -> Self {
        Self {
            throttle: Some(window),
            ..Self::default()
        }
    }

    pub fn throttled_trailing(window: Duration) -> Self {
        Self {
            throttle: Some(window),
            throttle_edge: ThrottleEdge::Trailing,
            ..Self::default()
        }
    }

    pub fn debounced(quiet: Duration) -> Self {
        Self {
            debounce: Some(quiet),
            ..Self::default()
        }
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    pub listeners: usize,
    pub throttled: usize,
    pub debounced: usize,
    pub pending_timers: usize,
}

#[derive(Default)]
struct ThrottleState {
    last_fired: Option<Instant>,
    pending: Option<DomEvent>,
    timer: Option<JoinHandle<()>>,
}

struct Listener {
    target: SharedTarget,
    event_type: EventType,
    handler: EventHandler,
    options: ListenerOptions,
    throttle: Mutex<ThrottleState>,
}

impl Listener {
    fn lock_throttle(&self) -> MutexGuard<'_, ThrottleState> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct DebounceTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct DispatcherInner {
    listeners: Mutex<Vec<Arc<Listener>>>,
    debounce_timers: Mutex<HashMap<String, DebounceTimer>>,
    next_generation: AtomicU64,
    reporter: Option<SharedReporter>,
}

impl DispatcherInner {
    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Arc<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<String, DebounceTimer>> {
        self.debounce_timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whitelisting, sanitizing event dispatcher.
#[derive(Clone)]
pub struct GuardedDispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for GuardedDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for GuardedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

impl GuardedDispatcher {
    pub fn new(reporter: Option<SharedReporter>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: Mutex::new(Vec::new()),
                debounce_timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                reporter,
            }),
        }
    }

    pub fn with_reporter(reporter: SharedReporter) -> Self {
        Self::new(Some(reporter))
    }

    /// Attach `handler` to `target` for `event_type`.
    ///
    /// Returns `false` without attaching when the type is not whitelisted.
    pub fn on(&self, target: SharedTarget, event_type: &str, handler: EventHandler, options: ListenerOptions) -> bool {
        let event_type = match event_type.parse::<EventType>() {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(error = %err, "Rejected listener for disallowed event type");
                return false;
            }
        };

        tracing::trace!(
            event_type = %event_type,
            element = target.id().as_deref().unwrap_or("anonymous"),
            throttle_ms = options.throttle.map(|d| d.as_millis() as u64),
            debounce_ms = options.debounce.map(|d| d.as_millis() as u64),
            "Listener attached"
        );
        self.inner.lock_listeners().push(Arc::new(Listener {
            target,
            event_type,
            handler,
            options,
            throttle: Mutex::new(ThrottleState::default()),
        }));
        true
    }

    /// Attach a plain closure.
    pub fn on_fn<F>(&self, target: SharedTarget, event_type: &str, handler: F, options: ListenerOptions) -> bool
    where
        F: Fn(&DomEvent) -> Result<(), RaisedError> + Send + Sync + 'static,
    {
        self.on(target, event_type, Arc::new(handler), options)
    }

    /// Detach every listener for `event_type` on `target`. Returns how many
    /// were removed.
    pub fn off(&self, target: &SharedTarget, event_type: EventType) -> usize {
        let mut listeners = self.inner.lock_listeners();
        let (removed, kept): (Vec<_>, Vec<_>) = listeners
            .drain(..)
            .partition(|l| l.event_type == event_type && same_target(&l.target, target));
        *listeners = kept;

        let mut released = Vec::new();
        for listener in &removed {
            let mut state = listener.lock_throttle();
            state.pending = None;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            drop(state);
            if listener.options.throttle.is_none() && listener.options.debounce.is_some() {
                let key = debounce_key(listener);
                if !listeners.iter().any(|l| debounce_key(l) == key) && !released.contains(&key) {
                    released.push(key);
                }
            }
        }
        drop(listeners);

        let mut timers = self.inner.lock_timers();
        for key in released {
            if let Some(timer) = timers.remove(&key) {
                timer.handle.abort();
            }
        }
        removed.len()
    }

    /// Deliver `event` to the listeners registered for its target and type.
    /// Returns the number of listeners the event was routed to; throttled or
    /// debounced listeners may run later or not at all.
    pub fn dispatch(&self, event: DomEvent) -> usize {
        let matching: Vec<Arc<Listener>> = self
            .inner
            .lock_listeners()
            .iter()
            .filter(|l| l.event_type == event.event_type && same_target(&l.target, &event.target))
            .cloned()
            .collect();

        for listener in &matching {
            self.schedule(listener, event.clone());
        }
        matching.len()
    }

    /// Remove every listener and cancel pending timers. Safe to call twice.
    pub fn cleanup(&self) {
        let listeners: Vec<Arc<Listener>> = self.inner.lock_listeners().drain(..).collect();
        for listener in &listeners {
            let mut state = listener.lock_throttle();
            state.pending = None;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
        for (_, timer) in self.inner.lock_timers().drain() {
            timer.handle.abort();
        }
        tracing::debug!(removed = listeners.len(), "Event listeners cleaned up");
    }

    pub fn stats(&self) -> DispatcherStats {
        let listeners = self.inner.lock_listeners();
        let trailing_timers = listeners
            .iter()
            .filter(|l| l.lock_throttle().timer.is_some())
            .count();
        DispatcherStats {
            listeners: listeners.len(),
            throttled: listeners.iter().filter(|l| l.options.throttle.is_some()).count(),
            debounced: listeners
                .iter()
                .filter(|l| l.options.throttle.is_none() && l.options.debounce.is_some())
                .count(),
            pending_timers: trailing_timers + self.inner.lock_timers().len(),
        }
    }

    fn schedule(&self, listener: &Arc<Listener>, event: DomEvent) {
        match (listener.options.throttle, listener.options.debounce) {
            (Some(window), _) => match listener.options.throttle_edge {
                ThrottleEdge::Leading => self.throttle_leading(listener, window, event),
                ThrottleEdge::Trailing => self.throttle_trailing(listener, window, event),
            },
            (None, Some(quiet)) => self.debounce(listener, quiet, event),
            (None, None) => run_guarded(&self.inner, listener, &event),
        }
    }

    fn throttle_leading(&self, listener: &Arc<Listener>, window: Duration, event: DomEvent) {
        let now = Instant::now();
        let fire = {
            let mut state = listener.lock_throttle();
            match state.last_fired {
                Some(last) if now.duration_since(last) < window => false,
                _ => {
                    state.last_fired = Some(now);
                    true
                }
            }
        };
        if fire {
            run_guarded(&self.inner, listener, &event);
        } else {
            tracing::trace!(event_type = %event.event_type, "Throttled");
        }
    }

    fn throttle_trailing(&self, listener: &Arc<Listener>, window: Duration, event: DomEvent) {
        let now = Instant::now();
        let mut state = listener.lock_throttle();
        let window_open = state
            .last_fired
            .is_some_and(|last| now.duration_since(last) < window);

        if !window_open && state.timer.is_none() {
            state.last_fired = Some(now);
            drop(state);
            run_guarded(&self.inner, listener, &event);
            return;
        }

        state.pending = Some(event);
        if state.timer.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No async runtime for trailing throttle; dropping call");
            state.pending = None;
            return;
        };
        let deadline = state.last_fired.map_or(now, |last| last + window);
        let inner = Arc::clone(&self.inner);
        let owner = Arc::clone(listener);
        // The lock is held until the handle is stored, so the task cannot
        // clear `timer` before it is set.
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let pending = {
                let mut state = owner.lock_throttle();
                state.timer = None;
                let pending = state.pending.take();
                if pending.is_some() {
                    state.last_fired = Some(Instant::now());
                }
                pending
            };
            if let Some(event) = pending {
                run_guarded(&inner, &owner, &event);
            }
        }));
    }

    fn debounce(&self, listener: &Arc<Listener>, quiet: Duration, event: DomEvent) {
        let key = debounce_key(listener);
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(key = %key, "No async runtime for debounce; running immediately");
            run_guarded(&self.inner, listener, &event);
            return;
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut timers = self.inner.lock_timers();
        if let Some(previous) = timers.remove(&key) {
            previous.handle.abort();
        }

        let inner = Arc::clone(&self.inner);
        let owner = Arc::clone(listener);
        let task_key = key.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            let current = {
                let mut timers = inner.lock_timers();
                let current = timers.get(&task_key).is_some_and(|t| t.generation == generation);
                if current {
                    timers.remove(&task_key);
                }
                current
            };
            if current {
                run_guarded(&inner, &owner, &event);
            }
        });
        timers.insert(key, DebounceTimer { generation, handle });
    }
}

/// Listeners sharing a target id (or none) and a type share one debounce
/// timer.
fn debounce_key(listener: &Listener) -> String {
    format!(
        "{}-{}",
        listener.target.id().unwrap_or_else(|| "anonymous".to_string()),
        listener.event_type
    )
}

fn same_target(a: &SharedTarget, b: &SharedTarget) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn run_guarded(inner: &DispatcherInner, listener: &Listener, event: &DomEvent) {
    if let Some(value) = event.target.value() {
        let clean = sanitize(&value);
        if clean != value {
            event.target.set_value(&clean);
            tracing::warn!(
                element = event.target.id().as_deref().unwrap_or("anonymous"),
                event_type = %event.event_type,
                "Blocked potentially dangerous input"
            );
        }
    }

    let outcome = catch_contained(|| (listener.handler)(event));
    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(payload) => RaisedError::from_panic(payload.as_ref()),
    };

    let element = event.target.id().unwrap_or_else(|| "anonymous".to_string());
    tracing::error!(
        element = %element,
        event_type = %event.event_type,
        error = %failure,
        "Event handler failed"
    );
    if let Some(reporter) = &inner.reporter {
        reporter.log(
            ErrorLevel::Error,
            failure,
            json!({
                "source": "event",
                "event_type": event.event_type.as_str(),
                "element": element,
                "tag_name": event.target.tag_name(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::InputElement;
    use serde_json::{json, Value};
    use wavespace_test_utils::recording_reporter;

    fn counter() -> (Arc<Mutex<Vec<Value>>>, EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler: EventHandler = Arc::new(move |event: &DomEvent| {
            s.lock().unwrap().push(event.detail.clone());
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn test_rejects_disallowed_event_type() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("x").shared();
        let (_, handler) = counter();
        assert!(!dispatcher.on(target.clone(), "contextmenu", handler.clone(), ListenerOptions::default()));
        assert!(dispatcher.on(target, "click", handler, ListenerOptions::default()));
        assert_eq!(dispatcher.stats().listeners, 1);
    }

    #[test]
    fn test_dispatch_routes_by_target_and_type() {
        let dispatcher = GuardedDispatcher::default();
        let a = InputElement::new("a").shared();
        let b = InputElement::new("b").shared();
        let (seen, handler) = counter();
        dispatcher.on(a.clone(), "click", handler, ListenerOptions::default());

        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Click, a.clone()).with_detail(json!(1))), 1);
        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Click, b)), 0);
        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Blur, a)), 0);
        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
    }

    #[test]
    fn test_wrapper_sanitizes_target_value() {
        let dispatcher = GuardedDispatcher::default();
        let input = InputElement::new("comment")
            .with_value("<script>alert(1)</script>hi")
            .shared();
        let observed = Arc::new(Mutex::new(None));
        let o = observed.clone();
        dispatcher.on_fn(
            input.clone(),
            "input",
            move |event: &DomEvent| {
                *o.lock().unwrap() = event.target.value();
                Ok(())
            },
            ListenerOptions::default(),
        );

        dispatcher.dispatch(DomEvent::new(EventType::Input, input.clone()));
        assert_eq!(input.value().as_deref(), Some("hi"));
        assert_eq!(observed.lock().unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn test_handler_failure_is_contained_and_logged() {
        let (reporter, notifier) = recording_reporter();
        let dispatcher = GuardedDispatcher::with_reporter(reporter.clone());
        let button = InputElement::element("save", "button").shared();
        dispatcher.on_fn(button.clone(), "click", |_| Err(RaisedError::from("boom")), ListenerOptions::default());
        dispatcher.on_fn(button.clone(), "click", |_| panic!("handler panic"), ListenerOptions::default());

        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Click, button)), 2);
        assert_eq!(reporter.len(), 2);
        assert!(notifier.shown().is_empty());
        assert_eq!(reporter.records(1)[0].context["element"], "save");
    }

    #[test]
    fn test_leading_throttle_without_runtime_timers() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("list").shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "scroll", handler, ListenerOptions::throttled(Duration::from_secs(60)));

        for i in 0..5 {
            dispatcher.dispatch(DomEvent::new(EventType::Scroll, target.clone()).with_detail(json!(i)));
        }
        assert_eq!(*seen.lock().unwrap(), vec![json!(0)]);
        assert_eq!(dispatcher.stats().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_throttle_reopens_after_window() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("list").shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "scroll", handler, ListenerOptions::throttled(Duration::from_millis(100)));

        dispatcher.dispatch(DomEvent::new(EventType::Scroll, target.clone()).with_detail(json!(0)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.dispatch(DomEvent::new(EventType::Scroll, target.clone()).with_detail(json!(1)));
        tokio::time::sleep(Duration::from_millis(60)).await;
        dispatcher.dispatch(DomEvent::new(EventType::Scroll, target.clone()).with_detail(json!(2)));

        assert_eq!(*seen.lock().unwrap(), vec![json!(0), json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_throttle_fires_last_call_in_window() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("win").shared();
        let (seen, handler) = counter();
        dispatcher.on(
            target.clone(),
            "resize",
            handler,
            ListenerOptions::throttled_trailing(Duration::from_millis(100)),
        );

        for i in 0..4 {
            dispatcher.dispatch(DomEvent::new(EventType::Resize, target.clone()).with_detail(json!(i)));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![json!(0)]);
        assert_eq!(dispatcher.stats().pending_timers, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(0), json!(3)]);
        assert_eq!(dispatcher.stats().pending_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_burst_into_last_call() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("search").shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "input", handler, ListenerOptions::debounced(Duration::from_millis(100)));

        for i in 0..5 {
            dispatcher.dispatch(DomEvent::new(EventType::Input, target.clone()).with_detail(json!(i)));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!(4)]);
        assert_eq!(dispatcher.stats().pending_timers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_wins_over_debounce() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("both").shared();
        let (seen, handler) = counter();
        let options = ListenerOptions {
            throttle: Some(Duration::from_millis(100)),
            debounce: Some(Duration::from_millis(100)),
            ..ListenerOptions::default()
        };
        dispatcher.on(target.clone(), "keyup", handler, options);

        dispatcher.dispatch(DomEvent::new(EventType::KeyUp, target.clone()).with_detail(json!("first")));
        assert_eq!(*seen.lock().unwrap(), vec![json!("first")]);
        assert_eq!(dispatcher.stats().debounced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_pending_debounce() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::anonymous().shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "change", handler, ListenerOptions::debounced(Duration::from_millis(50)));

        dispatcher.dispatch(DomEvent::new(EventType::Change, target.clone()));
        assert_eq!(dispatcher.stats().pending_timers, 1);

        dispatcher.cleanup();
        dispatcher.cleanup();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats(), DispatcherStats::default());
        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Change, target)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_cancels_pending_debounce() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("search").shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "input", handler, ListenerOptions::debounced(Duration::from_millis(100)));

        dispatcher.dispatch(DomEvent::new(EventType::Input, target.clone()).with_detail(json!("late")));
        assert_eq!(dispatcher.stats().pending_timers, 1);
        assert_eq!(dispatcher.off(&target, EventType::Input), 1);
        assert_eq!(dispatcher.stats().pending_timers, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_keeps_debounce_shared_with_remaining_listener() {
        let dispatcher = GuardedDispatcher::default();
        let first = InputElement::new("q").shared();
        let twin = InputElement::new("q").shared();
        let (seen, handler) = counter();
        dispatcher.on(first.clone(), "input", handler.clone(), ListenerOptions::debounced(Duration::from_millis(100)));
        dispatcher.on(twin.clone(), "input", handler, ListenerOptions::debounced(Duration::from_millis(100)));

        dispatcher.dispatch(DomEvent::new(EventType::Input, twin.clone()).with_detail(json!("kept")));
        assert_eq!(dispatcher.off(&first, EventType::Input), 1);
        assert_eq!(dispatcher.stats().pending_timers, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), vec![json!("kept")]);
    }

    #[test]
    fn test_off_detaches() {
        let dispatcher = GuardedDispatcher::default();
        let target = InputElement::new("f").shared();
        let (seen, handler) = counter();
        dispatcher.on(target.clone(), "focus", handler.clone(), ListenerOptions::default().passive());
        dispatcher.on(target.clone(), "blur", handler, ListenerOptions::default());

        assert_eq!(dispatcher.off(&target, EventType::Focus), 1);
        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Focus, target.clone())), 0);
        assert_eq!(dispatcher.dispatch(DomEvent::new(EventType::Blur, target)), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
