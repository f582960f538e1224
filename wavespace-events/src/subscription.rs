//! Disposable subscription handles.

use std::fmt;
use std::sync::{Mutex, PoisonError};

type Disposer = Box<dyn FnOnce() + Send>;

/// Handle returned by every subscribe operation.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::dispose`].
/// Disposing more than once is a no-op.
pub struct Subscription {
    disposer: Mutex<Option<Disposer>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Mutex::new(Some(Box::new(disposer))),
        }
    }

    /// A handle that does nothing when disposed.
    pub fn noop() -> Self {
        Self {
            disposer: Mutex::new(None),
        }
    }

    pub fn dispose(&self) {
        let disposer = self
            .disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispose) = disposer {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
