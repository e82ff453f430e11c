//! Plugin Context
//!
//! The capability bundle a plugin receives at activation, and the shared host
//! services it is built from.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::events::{EventBus, InMemoryEventBus};
use crate::plugin::extension::ExtensionRegistry;
use crate::plugin::logger::{FacadeSink, LogSink, PluginLogger};
use crate::plugin::sandbox::{GuardedEvents, GuardedRegistry, GuardedStorage, SandboxConfig};
use crate::plugin::storage::{GlobalStorage, MemoryStorage};

/// Shared services every plugin context is built over
///
/// Constructed once by the host; cloning shares the same underlying services.
#[derive(Clone)]
pub struct HostServices {
    pub registry: Arc<ExtensionRegistry>,
    pub storage: Arc<dyn GlobalStorage>,
    pub events: Arc<dyn EventBus>,
    pub log_sink: Arc<dyn LogSink>,
}

impl HostServices {
    /// In-process storage and events, logging through the `log` facade
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            registry,
            storage: Arc::new(MemoryStorage::new()),
            events: Arc::new(InMemoryEventBus::new()),
            log_sink: Arc::new(FacadeSink),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn GlobalStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::new(Arc::new(ExtensionRegistry::with_default_points()))
    }
}

/// Plugin-scoped key/value configuration
#[derive(Debug, Clone, Default)]
pub struct PluginConfigStore {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl PluginConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with initial values
    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Deserialize a value into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> PluginResult<Option<T>> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                PluginError::configuration_error(format!("Invalid value for '{}': {}", key, e))
            }),
            None => Ok(None),
        }
    }

    /// Set a value, returning the previous one
    pub fn set<S: Into<String>>(&self, key: S, value: Value) -> Option<Value> {
        self.values.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// Snapshot of all values
    pub fn entries(&self) -> HashMap<String, Value> {
        self.values.read().clone()
    }
}

/// Capability bundle handed to one plugin
pub struct PluginContext {
    plugin_id: String,
    registry: GuardedRegistry,
    logger: PluginLogger,
    config: PluginConfigStore,
    storage_path: PathBuf,
    global_storage: GuardedStorage,
    events: GuardedEvents,
    sandbox: SandboxConfig,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        plugin_id: String,
        registry: GuardedRegistry,
        logger: PluginLogger,
        config: PluginConfigStore,
        storage_path: PathBuf,
        global_storage: GuardedStorage,
        events: GuardedEvents,
        sandbox: SandboxConfig,
    ) -> Self {
        Self {
            plugin_id,
            registry,
            logger,
            config,
            storage_path,
            global_storage,
            events,
            sandbox,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Extension registry, gated by the sandbox
    pub fn registry(&self) -> &GuardedRegistry {
        &self.registry
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    pub fn config(&self) -> &PluginConfigStore {
        &self.config
    }

    /// Private storage directory; exists before activation
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Cross-plugin storage, gated by the sandbox
    pub fn global_storage(&self) -> &GuardedStorage {
        &self.global_storage
    }

    /// Event subscriptions, gated by the sandbox
    pub fn events(&self) -> &GuardedEvents {
        &self.events
    }

    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    /// Undo registrations and subscriptions still held by this context
    ///
    /// Returns the number of extensions removed from the registry.
    pub(crate) fn release(&self) -> usize {
        let removed = self.registry.rollback();
        self.events.release();
        removed
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("storage_path", &self.storage_path)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}
