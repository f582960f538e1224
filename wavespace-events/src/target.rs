//! Headless event targets and event types.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

/// Whitelisted interaction event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Click,
    Submit,
    Change,
    Input,
    Focus,
    Blur,
    MouseEnter,
    MouseLeave,
    KeyDown,
    KeyUp,
    Scroll,
    Resize,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        Self::Click,
        Self::Submit,
        Self::Change,
        Self::Input,
        Self::Focus,
        Self::Blur,
        Self::MouseEnter,
        Self::MouseLeave,
        Self::KeyDown,
        Self::KeyUp,
        Self::Scroll,
        Self::Resize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Submit => "submit",
            Self::Change => "change",
            Self::Input => "input",
            Self::Focus => "focus",
            Self::Blur => "blur",
            Self::MouseEnter => "mouseenter",
            Self::MouseLeave => "mouseleave",
            Self::KeyDown => "keydown",
            Self::KeyUp => "keyup",
            Self::Scroll => "scroll",
            Self::Resize => "resize",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a type name is outside the whitelist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event type not allowed: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Something listeners can be attached to.
pub trait EventTarget: Send + Sync {
    /// Element id, if any. Used to key debounce timers.
    fn id(&self) -> Option<String>;

    fn tag_name(&self) -> &str;

    /// Current string value, for value-carrying targets.
    fn value(&self) -> Option<String>;

    fn set_value(&self, value: &str);
}

/// Shared target handle.
pub type SharedTarget = Arc<dyn EventTarget>;

/// An in-process stand-in for a form control.
#[derive(Debug)]
pub struct InputElement {
    id: Option<String>,
    tag_name: String,
    value: Mutex<Option<String>>,
}

impl InputElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            tag_name: "INPUT".to_string(),
            value: Mutex::new(Some(String::new())),
        }
    }

    /// An element without an id.
    pub fn anonymous() -> Self {
        Self {
            id: None,
            tag_name: "INPUT".to_string(),
            value: Mutex::new(Some(String::new())),
        }
    }

    /// A non-form element (a button, a div) that carries no value.
    pub fn element(id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            tag_name: tag_name.into().to_ascii_uppercase(),
            value: Mutex::new(None),
        }
    }

    pub fn with_value(self, value: impl Into<String>) -> Self {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.into());
        self
    }

    pub fn shared(self) -> SharedTarget {
        Arc::new(self)
    }
}

impl EventTarget for InputElement {
    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn tag_name(&self) -> &str {
        &self.tag_name
    }

    fn value(&self) -> Option<String> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_value(&self, value: &str) {
        let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            *current = Some(value.to_string());
        }
    }
}

/// An event delivered to listeners.
#[derive(Clone)]
pub struct DomEvent {
    pub event_type: EventType,
    pub target: SharedTarget,
    pub detail: Value,
}

impl DomEvent {
    pub fn new(event_type: EventType, target: SharedTarget) -> Self {
        Self {
            event_type,
            target,
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

impl fmt::Debug for DomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomEvent")
            .field("event_type", &self.event_type)
            .field("target", &self.target.id())
            .field("detail", &self.detail)
            .finish()
    }
}
