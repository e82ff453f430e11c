//! Extension Point Registry
//!
//! Named, typed slots that plugins register capabilities into. The registry
//! is built once by the host and shared by `Arc`; each point guards its own
//! extension list so registrations from different plugins never contend on a
//! single lock.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use indexmap::IndexMap;
use log::debug;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use crate::plugin::capabilities::{AiProvider, Command, EventHandler, Middleware, Tool, UiComponent};
use crate::plugin::error::{PluginError, PluginResult};

/// Built-in point names
pub mod points {
    pub const TOOLS: &str = "tools";
    pub const COMMANDS: &str = "commands";
    pub const PROVIDERS: &str = "providers";
    pub const MIDDLEWARE: &str = "middleware";
    pub const EVENT_HANDLERS: &str = "event-handlers";
    pub const UI_COMPONENTS: &str = "ui-components";
}

/// Category of an extension point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionType {
    Tool,
    Command,
    Provider,
    Middleware,
    EventHandler,
    UiComponent,
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtensionType::Tool => "TOOL",
            ExtensionType::Command => "COMMAND",
            ExtensionType::Provider => "PROVIDER",
            ExtensionType::Middleware => "MIDDLEWARE",
            ExtensionType::EventHandler => "EVENT_HANDLER",
            ExtensionType::UiComponent => "UI_COMPONENT",
        };
        f.write_str(label)
    }
}

/// Ordered bucket of extensions of one type
pub struct ExtensionPoint<T: ?Sized> {
    name: String,
    extension_type: ExtensionType,
    description: String,
    extensions: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionPoint<T> {
    /// Create an empty point
    pub fn new<N: Into<String>, D: Into<String>>(name: N, extension_type: ExtensionType, description: D) -> Self {
        Self {
            name: name.into(),
            extension_type,
            description: description.into(),
            extensions: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension_type(&self) -> ExtensionType {
        self.extension_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Append an extension; duplicates are kept
    pub fn register(&self, extension: Arc<T>) {
        self.extensions.write().push(extension);
    }

    /// Remove the first instance identical to `extension`
    ///
    /// Returns whether an instance was removed. Absent extensions are not an
    /// error.
    pub fn unregister(&self, extension: &Arc<T>) -> bool {
        let mut extensions = self.extensions.write();
        match extensions.iter().position(|e| Arc::ptr_eq(e, extension)) {
            Some(index) => {
                extensions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the registered extensions
    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.extensions.read().clone()
    }

    /// Remove every extension
    pub fn clear(&self) {
        self.extensions.write().clear();
    }

    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    /// Summary of this point
    pub fn info(&self) -> ExtensionPointInfo {
        ExtensionPointInfo {
            name: self.name.clone(),
            extension_type: self.extension_type,
            description: self.description.clone(),
            extension_count: self.len(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ExtensionPoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoint")
            .field("name", &self.name)
            .field("extension_type", &self.extension_type)
            .field("extensions", &self.extensions.read().len())
            .finish()
    }
}

/// Summary of an extension point, independent of its element type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointInfo {
    pub name: String,
    pub extension_type: ExtensionType,
    pub description: String,
    pub extension_count: usize,
}

/// Type-erased view of an extension point
trait ErasedPoint: Send + Sync {
    fn info(&self) -> ExtensionPointInfo;
    fn clear(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: ?Sized + Send + Sync + 'static> ErasedPoint for ExtensionPoint<T> {
    fn info(&self) -> ExtensionPointInfo {
        ExtensionPoint::info(self)
    }

    fn clear(&self) {
        ExtensionPoint::clear(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Registry of named extension points
#[derive(Default)]
pub struct ExtensionRegistry {
    points: RwLock<IndexMap<String, Arc<dyn ErasedPoint>>>,
}

impl ExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the six built-in points defined
    pub fn with_default_points() -> Self {
        let registry = Self::new();
        registry.define_defaults();
        registry
    }

    fn define_defaults(&self) {
        // Fresh registry, names cannot collide
        let _ = self.define_point::<dyn Tool>(points::TOOLS, ExtensionType::Tool, "Tools callable by the assistant");
        let _ = self.define_point::<dyn Command>(points::COMMANDS, ExtensionType::Command, "User-invocable commands");
        let _ = self.define_point::<dyn AiProvider>(points::PROVIDERS, ExtensionType::Provider, "AI model providers");
        let _ = self.define_point::<dyn Middleware>(points::MIDDLEWARE, ExtensionType::Middleware, "Request/response middleware");
        let _ = self.define_point::<dyn EventHandler>(points::EVENT_HANDLERS, ExtensionType::EventHandler, "Handlers for host events");
        let _ = self.define_point::<dyn UiComponent>(points::UI_COMPONENTS, ExtensionType::UiComponent, "Renderable UI components");
    }

    /// Define a new named point
    pub fn define_point<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        extension_type: ExtensionType,
        description: &str,
    ) -> PluginResult<Arc<ExtensionPoint<T>>> {
        let mut points = self.points.write();
        if points.contains_key(name) {
            return Err(PluginError::DuplicatePointName { name: name.to_string() });
        }

        let point = Arc::new(ExtensionPoint::<T>::new(name, extension_type, description));
        points.insert(name.to_string(), point.clone());
        debug!("Defined extension point '{}' ({})", name, extension_type);
        Ok(point)
    }

    /// Look up a point by name and element type
    pub fn point<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> PluginResult<Arc<ExtensionPoint<T>>> {
        let erased = self
            .points
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::PointNotFound { name: name.to_string() })?;

        erased
            .as_any()
            .downcast::<ExtensionPoint<T>>()
            .map_err(|_| PluginError::PointTypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>().to_string(),
            })
    }

    /// Whether a point with this name exists
    pub fn has_point(&self, name: &str) -> bool {
        self.points.read().contains_key(name)
    }

    /// Summaries of all points in definition order
    pub fn list_points(&self) -> Vec<ExtensionPointInfo> {
        self.points.read().values().map(|p| p.info()).collect()
    }

    /// Empty every point, keeping the definitions
    pub fn reset(&self) {
        for point in self.points.read().values() {
            point.clear();
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("points", &self.points.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
