//! Plugin Lifecycle Manager
//!
//! Owns the table of loaded plugins and drives each one through
//! load (validate, resolve, sandbox, activate), unload and reload.
//!
//! Concurrency: operations on the same plugin id are serialised by a per-id
//! async mutex; operations on different ids run concurrently. The plugin table
//! lock is only held for short synchronous sections, never across plugin code.
//!
//! Failure semantics:
//! - A failed `load` records nothing and undoes any registrations or
//!   subscriptions the plugin made before failing. A storage directory that
//!   was created stays in place.
//! - A failed `unload` keeps the entry, marked `Error`, so it can be retried.
//! - `reload` is unload followed by load and is not transactional: when the
//!   load step fails the plugin stays unloaded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use crate::config::ConfigManager;
use crate::platform;
use crate::plugin::context::{HostServices, PluginConfigStore, PluginContext};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::extension::ExtensionRegistry;
use crate::plugin::sandbox::{Sandbox, SandboxConfig};
use crate::plugin::storage::prepare_plugin_storage;
use crate::plugin::traits::{Plugin, PluginMetadata, PluginState, PluginStatus};
use crate::plugin::version;

/// Host-side settings for the lifecycle manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Version plugins' platform constraints are checked against
    pub platform_version: String,

    /// Root under which each plugin gets `<root>/<plugin-id>`
    pub storage_root: PathBuf,

    /// Activation bound used when the plugin's sandbox declares none
    pub activation_timeout: Option<Duration>,

    /// Sandbox for plugins that do not declare their own
    pub default_sandbox: SandboxConfig,

    /// Initial configuration values per plugin id
    pub plugin_settings: HashMap<String, HashMap<String, Value>>,
}

impl ManagerSettings {
    pub fn new<P: Into<PathBuf>>(storage_root: P) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    pub fn with_platform_version<S: Into<String>>(mut self, version: S) -> Self {
        self.platform_version = version.into();
        self
    }

    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = Some(timeout);
        self
    }

    pub fn with_default_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.default_sandbox = sandbox;
        self
    }

    pub fn with_plugin_settings<S: Into<String>>(mut self, plugin_id: S, values: HashMap<String, Value>) -> Self {
        self.plugin_settings.insert(plugin_id.into(), values);
        self
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            platform_version: platform::platform_version().to_string(),
            storage_root: default_storage_root(),
            activation_timeout: None,
            default_sandbox: SandboxConfig::default(),
            plugin_settings: HashMap::new(),
        }
    }
}

/// `<data dir>/plughost/plugins`, falling back to the temp dir
pub fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("plughost")
        .join("plugins")
}

/// Tracked plugin record
struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    context: Arc<PluginContext>,
    state: PluginState,
    loaded_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl LoadedPlugin {
    fn status(&self) -> PluginStatus {
        PluginStatus {
            metadata: self.plugin.metadata().clone(),
            state: self.state,
            loaded_at: self.loaded_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Central plugin manager responsible for:
/// - Metadata validation and dependency resolution
/// - Sandboxed context construction
/// - Activation, deactivation and reload
/// - The authoritative table of loaded plugins
pub struct PluginManager {
    sandbox: Sandbox,
    settings: ManagerSettings,
    plugins: RwLock<IndexMap<String, LoadedPlugin>>,
    operation_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PluginManager {
    /// Create a manager over the given host services
    pub fn new(services: HostServices, settings: ManagerSettings) -> Self {
        Self {
            sandbox: Sandbox::new(services),
            settings,
            plugins: RwLock::new(IndexMap::new()),
            operation_locks: DashMap::new(),
        }
    }

    /// Create a manager with settings read from host configuration
    pub fn from_config(config: &ConfigManager, services: HostServices) -> anyhow::Result<Self> {
        Ok(Self::new(services, config.get_manager_settings()?))
    }

    /// Shared extension registry
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.sandbox.services().registry
    }

    pub fn services(&self) -> &HostServices {
        self.sandbox.services()
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    fn operation_lock(&self, plugin_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.operation_locks
            .entry(plugin_id.to_string())
            .or_default()
            .clone()
    }

    /// Validate, resolve, sandbox and activate a plugin
    pub async fn load(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        plugin.metadata().validate()?;

        let lock = self.operation_lock(plugin.id());
        let _guard = lock.lock().await;
        self.load_locked(plugin).await
    }

    async fn load_locked(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let metadata = plugin.metadata().clone();
        let plugin_id = metadata.id.clone();

        if self.is_loaded(&plugin_id) {
            return Err(PluginError::already_loaded(&plugin_id));
        }

        self.resolve_dependencies(&metadata)?;

        let sandbox_config = plugin
            .sandbox_config()
            .unwrap_or_else(|| self.settings.default_sandbox.clone());
        sandbox_config.validate()?;

        let storage_path = prepare_plugin_storage(&self.settings.storage_root, &plugin_id).await?;
        let context = Arc::new(self.sandbox.create_context(
            &plugin_id,
            &sandbox_config,
            storage_path,
            self.plugin_config(&plugin_id),
        )?);

        debug!("Activating plugin '{}' v{}", plugin_id, metadata.version);
        let timeout = sandbox_config.timeout().or(self.settings.activation_timeout);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, plugin.activate(&context)).await {
                Ok(result) => result.map_err(|e| PluginError::activation_failed(&plugin_id, e)),
                Err(_) => Err(PluginError::ActivationTimeout {
                    plugin_id: plugin_id.clone(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => plugin
                .activate(&context)
                .await
                .map_err(|e| PluginError::activation_failed(&plugin_id, e)),
        };

        if let Err(e) = outcome {
            let removed = context.release();
            warn!("Plugin '{}' failed to activate ({} registrations rolled back): {}", plugin_id, removed, e);
            return Err(e);
        }

        self.plugins.write().insert(plugin_id.clone(), LoadedPlugin {
            plugin,
            context,
            state: PluginState::Active,
            loaded_at: Utc::now(),
            last_error: None,
        });
        info!("Loaded plugin '{}' v{}", plugin_id, metadata.version);
        Ok(())
    }

    fn resolve_dependencies(&self, metadata: &PluginMetadata) -> PluginResult<()> {
        if let Some(required) = metadata.platform_constraint() {
            if !version::satisfies(&self.settings.platform_version, required) {
                return Err(PluginError::IncompatiblePlatform {
                    plugin_id: metadata.id.clone(),
                    required: required.to_string(),
                    actual: self.settings.platform_version.clone(),
                });
            }
        }

        let plugins = self.plugins.read();
        for (dependency, range) in metadata.plugin_dependencies() {
            let loaded = plugins.get(dependency).ok_or_else(|| PluginError::MissingDependency {
                plugin_id: metadata.id.clone(),
                dependency: dependency.to_string(),
            })?;

            let found = &loaded.plugin.metadata().version;
            if !version::satisfies(found, range) {
                return Err(PluginError::IncompatibleDependency {
                    plugin_id: metadata.id.clone(),
                    dependency: dependency.to_string(),
                    required: range.to_string(),
                    found: found.clone(),
                });
            }
        }
        Ok(())
    }

    fn plugin_config(&self, plugin_id: &str) -> PluginConfigStore {
        PluginConfigStore::from_values(
            self.settings
                .plugin_settings
                .get(plugin_id)
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// Deactivate a plugin and stop tracking it
    ///
    /// A plugin whose activation is still in flight is not tracked yet and
    /// fails with `NotLoaded`.
    pub async fn unload(&self, plugin_id: &str) -> PluginResult<()> {
        if !self.is_loaded(plugin_id) {
            return Err(PluginError::not_loaded(plugin_id));
        }

        let lock = self.operation_lock(plugin_id);
        let _guard = lock.lock().await;
        self.unload_locked(plugin_id).await
    }

    async fn unload_locked(&self, plugin_id: &str) -> PluginResult<()> {
        let (plugin, context) = {
            let plugins = self.plugins.read();
            let entry = plugins
                .get(plugin_id)
                .ok_or_else(|| PluginError::not_loaded(plugin_id))?;
            (entry.plugin.clone(), entry.context.clone())
        };

        let dependents = self.dependents_of(plugin_id);
        if !dependents.is_empty() {
            warn!("Unloading plugin '{}' still required by: {}", plugin_id, dependents.join(", "));
        }

        match plugin.deactivate(&context).await {
            Ok(()) => {
                let swept = context.release();
                if swept > 0 {
                    debug!("Removed {} extensions left registered by plugin '{}'", swept, plugin_id);
                }
                self.plugins.write().shift_remove(plugin_id);
                info!("Unloaded plugin '{}'", plugin_id);
                Ok(())
            }
            Err(e) => {
                if let Some(entry) = self.plugins.write().get_mut(plugin_id) {
                    entry.state = PluginState::Error;
                    entry.last_error = Some(e.to_string());
                }
                error!("Plugin '{}' failed to deactivate: {}", plugin_id, e);
                Err(PluginError::deactivation_failed(plugin_id, e))
            }
        }
    }

    /// Unload then load the same plugin object
    ///
    /// Not atomic: if the load step fails the plugin is left unloaded.
    pub async fn reload(&self, plugin_id: &str) -> PluginResult<()> {
        let plugin = self
            .get_plugin(plugin_id)
            .ok_or_else(|| PluginError::not_loaded(plugin_id))?;

        let lock = self.operation_lock(plugin_id);
        let _guard = lock.lock().await;

        self.unload_locked(plugin_id).await?;
        if let Err(e) = self.load_locked(plugin).await {
            warn!("Reload of plugin '{}' failed after unload, plugin left unloaded: {}", plugin_id, e);
            return Err(e);
        }

        info!("Reloaded plugin '{}'", plugin_id);
        Ok(())
    }

    /// Unload every plugin, most recently loaded first
    pub async fn unload_all(&self) -> Vec<(String, PluginResult<()>)> {
        let ids: Vec<String> = self.plugins.read().keys().rev().cloned().collect();

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.unload(&id).await;
            results.push((id, result));
        }
        results
    }

    pub fn get_plugin(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(plugin_id).map(|entry| entry.plugin.clone())
    }

    pub fn get_status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.plugins.read().get(plugin_id).map(LoadedPlugin::status)
    }

    /// Tracked plugins in load order
    pub fn list_plugins(&self) -> Vec<PluginStatus> {
        self.plugins.read().values().map(LoadedPlugin::status).collect()
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.plugins.read().contains_key(plugin_id)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Tracked plugins that declare `plugin_id` as a dependency
    pub fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        self.plugins
            .read()
            .values()
            .filter(|entry| {
                entry
                    .plugin
                    .metadata()
                    .plugin_dependencies()
                    .any(|(dependency, _)| dependency == plugin_id)
            })
            .map(|entry| entry.plugin.id().to_string())
            .collect()
    }
}
