//! Entity events.
//!
//! Every successful add, edit or remove publishes an [`AppEvent`] carrying the affected
//! entity and a free-form context map. Which [`EventType`] an operation produces is
//! registered per [`EventKey`] on the handler; unregistered keys publish nothing.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::{HandlerError, HandlerErrorKind};
use crate::resource::RestResource;

/// Free-form values handed to listeners alongside the entity.
pub type EventContext = HashMap<String, Value>;

/// Operation keys an event type can be registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKey {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Add,
    Edit,
    Remove,
}

impl EventKey {
    pub const ALL: [Self; 8] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Add,
        Self::Edit,
        Self::Remove,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKey {
    type Err = HandlerError;

    /// Case-insensitive.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == lowered)
            .ok_or_else(|| {
                HandlerError::new(
                    HandlerErrorKind::InvalidKey,
                    format!("'{value}' is not a valid event key"),
                )
            })
    }
}

/// Closed set of events a handler can publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Viewed,
    Created,
    Updated,
    Removed,
}

impl EventType {
    pub const ALL: [Self; 4] = [Self::Viewed, Self::Created, Self::Updated, Self::Removed];

    /// Declared name, used to derive the published name when none is configured.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Viewed => "viewed",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }

    /// Published name for resources of type `T`, e.g. `widget.created`.
    #[must_use]
    pub fn event_name<T: RestResource>(self) -> String {
        format!("{}.{}", T::var_name(), self.name())
    }

    /// Event type a key publishes unless the handler registers something else.
    #[must_use]
    pub const fn default_for(key: EventKey) -> Option<Self> {
        match key {
            EventKey::Get => None,
            EventKey::Post | EventKey::Add => Some(Self::Created),
            EventKey::Put | EventKey::Patch | EventKey::Edit => Some(Self::Updated),
            EventKey::Delete | EventKey::Remove => Some(Self::Removed),
        }
    }
}

impl FromStr for EventType {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.name() == lowered)
            .ok_or_else(|| {
                HandlerError::new(
                    HandlerErrorKind::InvalidType,
                    format!("'{value}' is not a known event type"),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    MissingKey(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "Event context has no '{key}' entry"),
        }
    }
}

impl std::error::Error for EventError {}

/// Notification emitted after a successful operation.
#[derive(Clone, Debug, Serialize)]
pub struct AppEvent<T> {
    event_type: EventType,
    key: EventKey,
    entity: T,
    context: EventContext,
}

impl<T: RestResource> AppEvent<T> {
    #[must_use]
    pub fn new(event_type: EventType, key: EventKey, entity: T, context: EventContext) -> Self {
        Self {
            event_type,
            key,
            entity,
            context,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    #[must_use]
    pub fn key(&self) -> EventKey {
        self.key
    }

    #[must_use]
    pub fn entity(&self) -> &T {
        &self.entity
    }

    #[must_use]
    pub fn context(&self) -> &EventContext {
        &self.context
    }

    /// # Errors
    ///
    /// Returns [`EventError::MissingKey`] when the context has no `key` entry.
    pub fn context_item(&self, key: &str) -> Result<&Value, EventError> {
        self.context
            .get(key)
            .ok_or_else(|| EventError::MissingKey(key.to_string()))
    }

    /// Name derived from the event type.
    #[must_use]
    pub fn name(&self) -> String {
        self.event_type.event_name::<T>()
    }
}

/// Event bus capability.
#[async_trait]
pub trait EventPublisher<T: RestResource>: Send + Sync {
    async fn publish(&self, name: &str, event: &AppEvent<T>);
}

pub type Listener<T> = Arc<dyn Fn(&AppEvent<T>) + Send + Sync>;

/// In-process publisher calling listeners subscribed by event name, in subscription order.
pub struct EventDispatcher<T> {
    listeners: RwLock<HashMap<String, Vec<Listener<T>>>>,
}

impl<T: RestResource> EventDispatcher<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&AppEvent<T>) + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(event = %name, "Subscribing listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(Arc::new(listener));
    }

    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl<T: RestResource> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: RestResource> EventPublisher<T> for EventDispatcher<T> {
    async fn publish(&self, name: &str, event: &AppEvent<T>) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(event = %name, listeners = listeners.len(), "Publishing event");
        for listener in listeners {
            listener(event);
        }
    }
}
