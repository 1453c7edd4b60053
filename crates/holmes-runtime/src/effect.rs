use std::fmt;
use std::time::Duration;

use holmes_link::{EndpointId, Envelope};
use serde_json::Value;

/// A side effect requested by a transition. Effects are data; the engine
/// executes them after the new state has been rendered.
pub enum Effect<E> {
    /// Append an event to the queue tail within the current drain.
    Dispatch(E),
    /// Enqueue an event after `delay`. Not cancellable. A zero delay lands on
    /// the next drain cycle, after the current drain finishes.
    Schedule { delay: Duration, event: E },
    Connect(EndpointId),
    /// Dropped by the connection manager unless the link is open.
    Send {
        endpoint: EndpointId,
        message: Envelope,
    },
    Disconnect(EndpointId),
    Persist { key: String, value: Value },
    Forget { key: String },
    /// Read a persisted value and append `reply(value)` to the queue tail.
    ReadPersisted {
        key: String,
        reply: fn(Option<Value>) -> E,
    },
}

impl<E> Effect<E> {
    pub fn schedule(delay: Duration, event: E) -> Self {
        Effect::Schedule { delay, event }
    }

    /// Shorthand for a zero-delay [`Effect::Schedule`].
    pub fn next_cycle(event: E) -> Self {
        Effect::Schedule {
            delay: Duration::ZERO,
            event,
        }
    }

    pub fn send(endpoint: EndpointId, message: Envelope) -> Self {
        Effect::Send { endpoint, message }
    }

    pub fn persist(key: impl Into<String>, value: Value) -> Self {
        Effect::Persist {
            key: key.into(),
            value,
        }
    }

    pub fn forget(key: impl Into<String>) -> Self {
        Effect::Forget { key: key.into() }
    }

    pub fn read_persisted(key: impl Into<String>, reply: fn(Option<Value>) -> E) -> Self {
        Effect::ReadPersisted {
            key: key.into(),
            reply,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Effect::Dispatch(_) => "dispatch",
            Effect::Schedule { .. } => "schedule",
            Effect::Connect(_) => "connect",
            Effect::Send { .. } => "send",
            Effect::Disconnect(_) => "disconnect",
            Effect::Persist { .. } => "persist",
            Effect::Forget { .. } => "forget",
            Effect::ReadPersisted { .. } => "read_persisted",
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Effect<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Dispatch(event) => f.debug_tuple("Dispatch").field(event).finish(),
            Effect::Schedule { delay, event } => f
                .debug_struct("Schedule")
                .field("delay", delay)
                .field("event", event)
                .finish(),
            Effect::Connect(endpoint) => f.debug_tuple("Connect").field(endpoint).finish(),
            Effect::Send { endpoint, message } => f
                .debug_struct("Send")
                .field("endpoint", endpoint)
                .field("message", message)
                .finish(),
            Effect::Disconnect(endpoint) => f.debug_tuple("Disconnect").field(endpoint).finish(),
            Effect::Persist { key, value } => f
                .debug_struct("Persist")
                .field("key", key)
                .field("value", value)
                .finish(),
            Effect::Forget { key } => f.debug_struct("Forget").field("key", key).finish(),
            Effect::ReadPersisted { key, .. } => f
                .debug_struct("ReadPersisted")
                .field("key", key)
                .finish_non_exhaustive(),
        }
    }
}

impl<E: PartialEq> PartialEq for Effect<E> {
    /// `ReadPersisted` compares by key only.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Effect::Dispatch(a), Effect::Dispatch(b)) => a == b,
            (
                Effect::Schedule { delay, event },
                Effect::Schedule {
                    delay: other_delay,
                    event: other_event,
                },
            ) => delay == other_delay && event == other_event,
            (Effect::Connect(a), Effect::Connect(b)) => a == b,
            (
                Effect::Send { endpoint, message },
                Effect::Send {
                    endpoint: other_endpoint,
                    message: other_message,
                },
            ) => endpoint == other_endpoint && message == other_message,
            (Effect::Disconnect(a), Effect::Disconnect(b)) => a == b,
            (
                Effect::Persist { key, value },
                Effect::Persist {
                    key: other_key,
                    value: other_value,
                },
            ) => key == other_key && value == other_value,
            (Effect::Forget { key }, Effect::Forget { key: other_key }) => key == other_key,
            (
                Effect::ReadPersisted { key, .. },
                Effect::ReadPersisted { key: other_key, .. },
            ) => key == other_key,
            _ => false,
        }
    }
}
