//! Event bus
//!
//! Maps event names to their subscribed handlers. Handlers are keyed by a
//! [`HandlerId`] that is unique across every event, so a plugin can remove
//! exactly the subscription it created.

use crate::audit::{self, record_or_warn, AuditSink, NullAuditSink};
use bridge_plugin_api::HandlerId;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A subscribed event handler
pub type EventHandler = Arc<dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct BusInner {
    /// Handlers per event, in subscription order. Never holds an empty list.
    events: HashMap<String, Vec<(HandlerId, EventHandler)>>,
    /// Live ids across all events
    index: HashMap<HandlerId, String>,
}

/// Publish/subscribe event bus
pub struct EventBus {
    inner: RwLock<BusInner>,
    audit: Arc<dyn AuditSink>,
}

impl EventBus {
    /// Create a bus that discards handler failures after logging them
    pub fn new() -> Self {
        Self::with_audit(Arc::new(NullAuditSink))
    }

    /// Create a bus reporting handler failures to `audit`
    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: RwLock::new(BusInner::default()),
            audit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BusInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BusInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a handler for an event and return its id
    pub fn subscribe<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(event, Arc::new(handler))
    }

    /// Add an already shared handler for an event
    pub fn subscribe_handler(&self, event: &str, handler: EventHandler) -> HandlerId {
        tracing::debug!(event, "Adding handler for event");

        let mut inner = self.write();
        let id = loop {
            let candidate = HandlerId::generate();
            if !inner.index.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.index.insert(id.clone(), event.to_string());
        inner
            .events
            .entry(event.to_string())
            .or_default()
            .push((id.clone(), handler));
        id
    }

    /// Remove a handler by event name and id.
    ///
    /// Unknown events and ids are ignored. Returns whether a handler was removed.
    pub fn unsubscribe(&self, event: &str, id: &HandlerId) -> bool {
        tracing::debug!(event, handler_id = %id, "Removing handler for event");

        let removed = {
            let mut inner = self.write();
            let Some(handlers) = inner.events.get_mut(event) else {
                return false;
            };
            let Some(pos) = handlers.iter().position(|(h, _)| h == id) else {
                return false;
            };
            let (_, handler) = handlers.remove(pos);
            if handlers.is_empty() {
                inner.events.remove(event);
            }
            inner.index.remove(id);
            handler
        };

        // Closure state is released outside the lock
        drop(removed);
        true
    }

    /// Remove a handler knowing only its id
    pub fn off_handler(&self, id: &HandlerId) -> bool {
        let event = self.read().index.get(id).cloned();
        match event {
            Some(event) => self.unsubscribe(&event, id),
            None => false,
        }
    }

    /// Call every handler subscribed to `event`.
    ///
    /// The handler set is fixed when the call starts. A failing or panicking
    /// handler is logged and audited; the rest still run. Returns the number
    /// of handlers invoked.
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        tracing::debug!(event, "Emitting event");

        let snapshot = match self.read().events.get(event) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        for (id, handler) in &snapshot {
            let message = match panic::catch_unwind(AssertUnwindSafe(|| handler(args))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("handler panicked: {}", panic_message(&*payload)),
            };

            tracing::warn!(event, handler_id = %id, error = %message, "Event handler failed");
            record_or_warn(&*self.audit, audit::handler_failed(event, id.as_str(), message));
        }

        snapshot.len()
    }

    /// Number of handlers subscribed to an event
    pub fn handler_count(&self, event: &str) -> usize {
        self.read().events.get(event).map_or(0, Vec::len)
    }

    /// Check if an event has at least one handler
    pub fn has_event(&self, event: &str) -> bool {
        self.read().events.contains_key(event)
    }

    /// Names of all events with handlers
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().events.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of subscriptions
    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().index.is_empty()
    }

    /// Remove every subscription, returning how many were removed
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.write());
        removed.index.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
