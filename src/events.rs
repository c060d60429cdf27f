//! Event bus for registry changes and lifecycle transitions
//!
//! Fan-out is best-effort: a slow subscriber lags and skips events, there
//! is no replay on reconnect. The reload coordinator and the SSE stream
//! both subscribe here.

use crate::registry::ObservedState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel before slow subscribers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What kind of registry mutation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    StateChanged,
    Removed,
}

/// Emitted on every committed registry mutation, in per-registry total order
#[derive(Debug, Clone, Serialize)]
pub struct RegistryChangeEvent {
    pub server_id: String,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

/// Everything published on the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Registry(RegistryChangeEvent),
    Lifecycle {
        server_id: String,
        from: ObservedState,
        to: ObservedState,
        timestamp: DateTime<Utc>,
    },
}

/// Shared broadcast channel. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Succeeds even with no subscribers.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn registry_changed(&self, server_id: &str, kind: ChangeKind) {
        self.publish(Event::Registry(RegistryChangeEvent {
            server_id: server_id.to_string(),
            kind,
            timestamp: Utc::now(),
        }));
    }

    pub fn lifecycle_transition(&self, server_id: &str, from: ObservedState, to: ObservedState) {
        self.publish(Event::Lifecycle {
            server_id: server_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
