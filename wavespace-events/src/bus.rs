//! Publish/subscribe bus.
//!
//! Delivery is synchronous and in subscription order. A failing subscriber
//! (an `Err` or a panic) is reported and skipped; the rest still run.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use wavespace_core::{catch_contained, ErrorLevel, RaisedError, SharedReporter};

use crate::subscription::Subscription;

/// Subscriber callback: receives the payload and the event name.
pub type BusCallback<T> = Arc<dyn Fn(&T, &str) -> Result<(), RaisedError> + Send + Sync>;

struct Entry<T> {
    id: u64,
    callback: BusCallback<T>,
    alive: Arc<AtomicBool>,
}

struct BusInner<T> {
    subscribers: RwLock<HashMap<String, Vec<Entry<T>>>>,
    next_id: AtomicU64,
    reporter: Option<SharedReporter>,
    notify_failures: bool,
}

impl<T> BusInner<T> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Entry<T>>>> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Entry<T>>>> {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, event: &str, id: u64) {
        let mut subscribers = self.write();
        if let Some(entries) = subscribers.get_mut(event) {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                let entry = entries.remove(pos);
                entry.alive.store(false, Ordering::SeqCst);
            }
            if entries.is_empty() {
                subscribers.remove(event);
            }
        }
    }
}

/// Named-event bus, generic over the payload.
pub struct PubSubBus<T = Value> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for PubSubBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for PubSubBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubBus")
            .field("events", &self.inner.read().len())
            .field("reporter", &self.inner.reporter.is_some())
            .finish()
    }
}

impl<T> Default for PubSubBus<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> PubSubBus<T>
where
    T: Send + Sync + 'static,
{
    /// Create a bus. Subscriber failures go to `reporter` when given,
    /// otherwise only to the log.
    pub fn new(reporter: Option<SharedReporter>) -> Self {
        Self::build(reporter, true)
    }

    pub fn with_reporter(reporter: SharedReporter) -> Self {
        Self::new(Some(reporter))
    }

    /// A bus whose subscriber failures are recorded without notifying the
    /// user.
    pub fn silent(reporter: Option<SharedReporter>) -> Self {
        Self::build(reporter, false)
    }

    fn build(reporter: Option<SharedReporter>, notify_failures: bool) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                reporter,
                notify_failures,
            }),
        }
    }

    /// Subscribe `callback` to `event`.
    ///
    /// Subscribing the same shared callback twice to one event keeps a single
    /// entry; both handles dispose it.
    pub fn subscribe(&self, event: &str, callback: BusCallback<T>) -> Subscription {
        let id = {
            let mut subscribers = self.inner.write();
            let entries = subscribers.entry(event.to_string()).or_default();
            match entries
                .iter()
                .find(|e| std::ptr::addr_eq(Arc::as_ptr(&e.callback), Arc::as_ptr(&callback)))
            {
                Some(existing) => existing.id,
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    entries.push(Entry {
                        id,
                        callback,
                        alive: Arc::new(AtomicBool::new(true)),
                    });
                    id
                }
            }
        };
        tracing::trace!(event, id, "Subscribed");

        let weak: Weak<BusInner<T>> = Arc::downgrade(&self.inner);
        let event = event.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&event, id);
            }
        })
    }

    /// Subscribe a plain closure.
    pub fn subscribe_fn<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&T, &str) -> Result<(), RaisedError> + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(callback))
    }

    /// Deliver `data` to the current subscribers of `event`.
    ///
    /// Returns the number of subscribers invoked. Subscribers added while
    /// publishing do not see this event; subscribers removed while publishing
    /// are skipped once removed.
    pub fn publish(&self, event: &str, data: &T) -> usize {
        let snapshot: Vec<(u64, BusCallback<T>, Arc<AtomicBool>)> = match self.inner.read().get(event) {
            Some(entries) => entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.callback), Arc::clone(&e.alive)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback, alive) in snapshot {
            if !alive.load(Ordering::SeqCst) {
                continue;
            }
            delivered += 1;
            let outcome = catch_contained(|| callback(data, event));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(RaisedError::from_panic(payload.as_ref())),
            };
            if let Some(err) = failure {
                self.report_failure(event, id, err);
            }
        }
        delivered
    }

    /// Remove every subscriber of every event.
    pub fn cleanup(&self) {
        let mut subscribers = self.inner.write();
        for entry in subscribers.values().flatten() {
            entry.alive.store(false, Ordering::SeqCst);
        }
        subscribers.clear();
        tracing::debug!("Bus subscribers cleared");
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.read().get(event).map_or(0, Vec::len)
    }

    /// Events with at least one subscriber, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.inner.read().keys().cloned().collect();
        events.sort();
        events
    }

    /// Total subscriber count across events.
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().values().map(Vec::len).sum()
    }

    fn report_failure(&self, event: &str, id: u64, err: RaisedError) {
        tracing::error!(event, subscriber = id, error = %err, "Subscriber failed");
        if let Some(reporter) = &self.inner.reporter {
            let context = json!({ "source": "pubsub", "event": event });
            if self.inner.notify_failures {
                reporter.error(err, context);
            } else {
                reporter.log(ErrorLevel::Error, err, context);
            }
        }
    }
}
