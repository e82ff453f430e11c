//! Capability Sandbox
//!
//! Gates what a plugin can do through its context. Each shared service is
//! wrapped in an explicit guarded type that checks the plugin's allow-list
//! before delegating; a denied call fails with `PermissionDenied` and never
//! reaches the wrapped service.
//!
//! Resource ceilings are declared and validated here. Only the timeout is
//! enforced in-process (by the lifecycle manager around activation); memory
//! and CPU ceilings are for an external isolation mechanism to apply.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use crate::plugin::context::{HostServices, PluginConfigStore, PluginContext};
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::events::{EventBus, EventListener, SubscriptionId};
use crate::plugin::extension::{ExtensionPointInfo, ExtensionRegistry, ExtensionType};
use crate::plugin::logger::PluginLogger;
use crate::plugin::storage::GlobalStorage;

/// API names checked by the guarded wrappers
pub mod api {
    pub const REGISTRY_DEFINE_POINT: &str = "registry.definePoint";
    pub const REGISTRY_GET_POINT: &str = "registry.getPoint";
    pub const REGISTRY_LIST_POINTS: &str = "registry.listPoints";
    pub const REGISTRY_REGISTER: &str = "registry.register";
    pub const REGISTRY_UNREGISTER: &str = "registry.unregister";
    pub const REGISTRY_GET_ALL: &str = "registry.getAll";
    pub const STORAGE_GET: &str = "storage.get";
    pub const STORAGE_SET: &str = "storage.set";
    pub const STORAGE_DELETE: &str = "storage.delete";
    pub const STORAGE_KEYS: &str = "storage.keys";
    pub const EVENTS_SUBSCRIBE: &str = "events.subscribe";
    pub const EVENTS_UNSUBSCRIBE: &str = "events.unsubscribe";
    pub const EVENTS_EMIT: &str = "events.emit";

    /// Every gated API
    pub const ALL: &[&str] = &[
        REGISTRY_DEFINE_POINT,
        REGISTRY_GET_POINT,
        REGISTRY_LIST_POINTS,
        REGISTRY_REGISTER,
        REGISTRY_UNREGISTER,
        REGISTRY_GET_ALL,
        STORAGE_GET,
        STORAGE_SET,
        STORAGE_DELETE,
        STORAGE_KEYS,
        EVENTS_SUBSCRIBE,
        EVENTS_UNSUBSCRIBE,
        EVENTS_EMIT,
    ];
}

/// Replacement for redacted log values
pub const REDACTED: &str = "[REDACTED]";

// Compared after lowercasing and dropping '_' and '-'
const SENSITIVE_KEYS: &[&str] = &[
    "apikey",
    "password",
    "token",
    "secret",
    "accesstoken",
    "refreshtoken",
    "privatekey",
    "authorization",
];

fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

/// Copy of `value` with sensitive keys replaced at any depth
pub fn redact_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact_sensitive(value))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive).collect()),
        other => other.clone(),
    }
}

/// Declared sandbox for one plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Permitted API names. `None` means the plugin is not sandboxed and its
    /// context may call every API; `Some` denies anything not listed, so an
    /// empty list denies everything. Entries ending in `.*` grant a whole
    /// namespace.
    #[serde(default, rename = "allowedAPIs", skip_serializing_if = "Option::is_none")]
    pub allowed_apis: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SandboxConfig {
    /// No restrictions and no ceilings
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Allow-list with nothing on it
    pub fn deny_all() -> Self {
        Self {
            allowed_apis: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Allow-list with the given APIs
    pub fn allow<I, S>(apis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_apis: Some(apis.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_max_cpu(mut self, percent: f64) -> Self {
        self.max_cpu_percent = Some(percent);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Activation time bound, if declared
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Reject ceilings that are zero, negative or not finite
    pub fn validate(&self) -> PluginResult<()> {
        if self.max_memory_bytes == Some(0) {
            return Err(PluginError::resource_limit_invalid("maxMemory", "must be greater than zero"));
        }
        if let Some(cpu) = self.max_cpu_percent {
            if !cpu.is_finite() || cpu <= 0.0 {
                return Err(PluginError::resource_limit_invalid(
                    "maxCPU",
                    format!("must be a positive number, got {}", cpu),
                ));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(PluginError::resource_limit_invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// Permission set derived from the allow-list
    pub fn permissions(&self) -> ApiPermissions {
        match &self.allowed_apis {
            None => ApiPermissions::Unrestricted,
            Some(apis) => ApiPermissions::AllowList(apis.iter().cloned().collect()),
        }
    }
}

/// Which APIs a context may call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPermissions {
    Unrestricted,
    AllowList(HashSet<String>),
}

impl ApiPermissions {
    pub fn allows(&self, api: &str) -> bool {
        match self {
            ApiPermissions::Unrestricted => true,
            ApiPermissions::AllowList(allowed) => {
                allowed.contains(api)
                    || api
                        .split_once('.')
                        .is_some_and(|(namespace, _)| allowed.contains(&format!("{}.*", namespace)))
            }
        }
    }
}

/// Permission check bound to one plugin
#[derive(Debug)]
pub struct SandboxGuard {
    plugin_id: String,
    permissions: ApiPermissions,
}

impl SandboxGuard {
    pub fn new<S: Into<String>>(plugin_id: S, permissions: ApiPermissions) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            permissions,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self.permissions, ApiPermissions::Unrestricted)
    }

    /// Fail with `PermissionDenied` unless `api` is granted
    pub fn check_permission(&self, api: &str) -> PluginResult<()> {
        if self.permissions.allows(api) {
            Ok(())
        } else {
            warn!("Sandbox denied {} for plugin '{}'", api, self.plugin_id);
            Err(PluginError::permission_denied(&self.plugin_id, api))
        }
    }
}

/// Registration made through a guarded registry, kept for rollback
struct Registration {
    point: String,
    address: usize,
    remove: Box<dyn Fn() -> bool + Send + Sync>,
}

fn extension_address<T: ?Sized>(extension: &Arc<T>) -> usize {
    Arc::as_ptr(extension).cast::<()>() as usize
}

/// Extension registry view that checks permissions before delegating
pub struct GuardedRegistry {
    guard: Arc<SandboxGuard>,
    inner: Arc<ExtensionRegistry>,
    registrations: Mutex<Vec<Registration>>,
}

impl GuardedRegistry {
    pub fn new(guard: Arc<SandboxGuard>, inner: Arc<ExtensionRegistry>) -> Self {
        Self {
            guard,
            inner,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Define a new extension point
    pub fn define_point<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        extension_type: ExtensionType,
        description: &str,
    ) -> PluginResult<()> {
        self.guard.check_permission(api::REGISTRY_DEFINE_POINT)?;
        self.inner.define_point::<T>(name, extension_type, description).map(|_| ())
    }

    /// Summary of one point
    pub fn get_point(&self, name: &str) -> PluginResult<ExtensionPointInfo> {
        self.guard.check_permission(api::REGISTRY_GET_POINT)?;
        self.inner
            .list_points()
            .into_iter()
            .find(|info| info.name == name)
            .ok_or_else(|| PluginError::PointNotFound { name: name.to_string() })
    }

    pub fn list_points(&self) -> PluginResult<Vec<ExtensionPointInfo>> {
        self.guard.check_permission(api::REGISTRY_LIST_POINTS)?;
        Ok(self.inner.list_points())
    }

    /// Register an extension into a point
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, point: &str, extension: Arc<T>) -> PluginResult<()> {
        self.guard.check_permission(api::REGISTRY_REGISTER)?;
        let target = self.inner.point::<T>(point)?;
        target.register(extension.clone());

        let address = extension_address(&extension);
        self.registrations.lock().push(Registration {
            point: point.to_string(),
            address,
            remove: Box::new(move || target.unregister(&extension)),
        });
        debug!("Plugin '{}' registered into '{}'", self.guard.plugin_id(), point);
        Ok(())
    }

    /// Remove an extension from a point; absent extensions are not an error
    pub fn unregister<T: ?Sized + Send + Sync + 'static>(&self, point: &str, extension: &Arc<T>) -> PluginResult<bool> {
        self.guard.check_permission(api::REGISTRY_UNREGISTER)?;
        let removed = self.inner.point::<T>(point)?.unregister(extension);

        if removed {
            let address = extension_address(extension);
            let mut registrations = self.registrations.lock();
            if let Some(index) = registrations
                .iter()
                .position(|r| r.point == point && r.address == address)
            {
                registrations.remove(index);
            }
        }
        Ok(removed)
    }

    /// Snapshot of a point's extensions
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self, point: &str) -> PluginResult<Vec<Arc<T>>> {
        self.guard.check_permission(api::REGISTRY_GET_ALL)?;
        Ok(self.inner.point::<T>(point)?.get_all())
    }

    /// Number of registrations made through this view and still held
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Undo every registration made through this view, newest first
    pub(crate) fn rollback(&self) -> usize {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        registrations
            .into_iter()
            .rev()
            .filter(|registration| (registration.remove)())
            .count()
    }
}

/// Global storage view that checks permissions before delegating
pub struct GuardedStorage {
    guard: Arc<SandboxGuard>,
    inner: Arc<dyn GlobalStorage>,
}

impl GuardedStorage {
    pub fn new(guard: Arc<SandboxGuard>, inner: Arc<dyn GlobalStorage>) -> Self {
        Self { guard, inner }
    }

    pub async fn get(&self, key: &str) -> PluginResult<Option<Value>> {
        self.guard.check_permission(api::STORAGE_GET)?;
        self.inner.get(key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> PluginResult<()> {
        self.guard.check_permission(api::STORAGE_SET)?;
        self.inner.set(key, value).await
    }

    pub async fn delete(&self, key: &str) -> PluginResult<bool> {
        self.guard.check_permission(api::STORAGE_DELETE)?;
        self.inner.delete(key).await
    }

    pub async fn keys(&self) -> PluginResult<Vec<String>> {
        self.guard.check_permission(api::STORAGE_KEYS)?;
        self.inner.keys().await
    }
}

/// Event bus view that checks permissions and tracks subscriptions
pub struct GuardedEvents {
    guard: Arc<SandboxGuard>,
    inner: Arc<dyn EventBus>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl GuardedEvents {
    pub fn new(guard: Arc<SandboxGuard>, inner: Arc<dyn EventBus>) -> Self {
        Self {
            guard,
            inner,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, event: &str, listener: Arc<dyn EventListener>) -> PluginResult<SubscriptionId> {
        self.guard.check_permission(api::EVENTS_SUBSCRIBE)?;
        let id = self.inner.subscribe(event, listener);
        self.subscriptions.lock().push(id);
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> PluginResult<bool> {
        self.guard.check_permission(api::EVENTS_UNSUBSCRIBE)?;
        self.subscriptions.lock().retain(|sub| *sub != id);
        Ok(self.inner.unsubscribe(id))
    }

    pub async fn emit(&self, event: &str, payload: Value) -> PluginResult<usize> {
        self.guard.check_permission(api::EVENTS_EMIT)?;
        Ok(self.inner.emit(event, payload).await)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Drop every subscription made through this view
    pub(crate) fn release(&self) -> usize {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        subscriptions
            .into_iter()
            .filter(|id| self.inner.unsubscribe(*id))
            .count()
    }
}

/// Builds sandboxed plugin contexts over the host's shared services
#[derive(Clone)]
pub struct Sandbox {
    services: HostServices,
}

impl Sandbox {
    pub fn new(services: HostServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Build the context handed to `plugin_id` at activation
    pub fn create_context(
        &self,
        plugin_id: &str,
        config: &SandboxConfig,
        storage_path: PathBuf,
        settings: PluginConfigStore,
    ) -> PluginResult<PluginContext> {
        config.validate()?;

        let guard = Arc::new(SandboxGuard::new(plugin_id, config.permissions()));
        if guard.is_restricted() {
            debug!("Plugin '{}' sandboxed with allow-list {:?}", plugin_id, config.allowed_apis);
        }

        Ok(PluginContext::new(
            plugin_id.to_string(),
            GuardedRegistry::new(guard.clone(), self.services.registry.clone()),
            PluginLogger::new(plugin_id, self.services.log_sink.clone()),
            settings,
            storage_path,
            GuardedStorage::new(guard.clone(), self.services.storage.clone()),
            GuardedEvents::new(guard, self.services.events.clone()),
            config.clone(),
        ))
    }
}
