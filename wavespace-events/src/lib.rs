//! WAVE SPACE Events
//!
//! In-process publish/subscribe and guarded interaction dispatch.

pub mod bus;
pub mod dispatch;
pub mod subscription;
pub mod target;

pub use bus::{BusCallback, PubSubBus};
pub use dispatch::{DispatcherStats, EventHandler, GuardedDispatcher, ListenerOptions, ThrottleEdge};
pub use subscription::Subscription;
pub use target::{DomEvent, EventTarget, EventType, InputElement, SharedTarget, UnknownEventType};
