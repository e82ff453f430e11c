//! Event Bus
//!
//! Named-event publish/subscribe shared by all plugins. Delivery awaits each
//! listener in subscription order, bounded by a per-listener timeout; a failing
//! or slow listener is logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;
use crate::plugin::error::PluginResult;

/// Handle returned by `subscribe`
pub type SubscriptionId = Uuid;

/// Receiver of emitted events
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &str, payload: &Value) -> PluginResult<()>;
}

/// Event dispatch shared across plugins
#[async_trait]
pub trait EventBus: Send + Sync {
    fn subscribe(&self, event: &str, listener: Arc<dyn EventListener>) -> SubscriptionId;

    /// Remove a subscription, returning whether it existed
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Deliver to every listener of `event`; returns how many succeeded
    async fn emit(&self, event: &str, payload: Value) -> usize;
}

/// Listener backed by a closure
pub struct FnListener<F> {
    handler: F,
}

impl<F> FnListener<F>
where
    F: Fn(&str, &Value) -> PluginResult<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&str, &Value) -> PluginResult<()> + Send + Sync,
{
    async fn on_event(&self, event: &str, payload: &Value) -> PluginResult<()> {
        (self.handler)(event, payload)
    }
}

type Subscription = (SubscriptionId, Arc<dyn EventListener>);

/// In-process event bus
pub struct InMemoryEventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscription>>>,
    listener_timeout: Duration,
}

impl InMemoryEventBus {
    /// Create a bus with the default 5 second listener timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    /// Create a bus with a custom listener timeout
    pub fn with_timeout(listener_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            listener_timeout,
        }
    }

    /// Number of listeners for an event
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers.read().get(event).map_or(0, Vec::len)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn subscribe(&self, event: &str, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        debug!("Subscription {} added for event '{}'", id, event);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for listeners in subscribers.values_mut() {
            if let Some(index) = listeners.iter().position(|(sub_id, _)| *sub_id == id) {
                listeners.remove(index);
                return true;
            }
        }
        false
    }

    async fn emit(&self, event: &str, payload: Value) -> usize {
        // Snapshot so listeners may (un)subscribe while being called
        let listeners: Vec<Subscription> = self
            .subscribers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, listener) in listeners {
            match tokio::time::timeout(self.listener_timeout, listener.on_event(event, &payload)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Listener {} failed on event '{}': {}", id, event, e),
                Err(_) => warn!("Listener {} timed out on event '{}'", id, event),
            }
        }
        delivered
    }
}
