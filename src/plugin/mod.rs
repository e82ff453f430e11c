//! Plugin System Module
//!
//! Hosts third-party plugins: validates and version-checks them, activates
//! each one inside a capability sandbox, and lets them contribute typed
//! extensions to named extension points.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use plughost::plugin::{HostServices, ManagerSettings, PluginManager};
//!
//! # async fn run(plugin: Arc<dyn plughost::plugin::Plugin>) -> plughost::plugin::PluginResult<()> {
//! let manager = PluginManager::new(HostServices::default(), ManagerSettings::new("/tmp/plughost"));
//! manager.load(plugin).await?;
//! for status in manager.list_plugins() {
//!     println!("{} {}", status.metadata.id, status.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod version;
pub mod traits;
pub mod extension;
pub mod capabilities;
pub mod storage;
pub mod events;
pub mod logger;
pub mod sandbox;
pub mod context;
pub mod manager;
pub mod discovery;

#[cfg(test)]
pub mod tests;

// Re-export core types for easier access
pub use traits::{Plugin, PluginAuthor, PluginDependencies, PluginMetadata, PluginState, PluginStatus};
pub use error::{PluginError, PluginResult};
pub use context::{HostServices, PluginConfigStore, PluginContext};

// Extension points
pub use extension::{points, ExtensionPoint, ExtensionPointInfo, ExtensionRegistry, ExtensionType};
pub use capabilities::{AiProvider, Command, EventHandler, Middleware, Tool, UiComponent};

// Sandbox and shared services
pub use sandbox::{api, redact_sensitive, ApiPermissions, Sandbox, SandboxConfig, REDACTED};
pub use storage::{GlobalStorage, MemoryStorage};
pub use events::{EventBus, EventListener, FnListener, InMemoryEventBus, SubscriptionId};
pub use logger::{FacadeSink, LogSink, MemorySink, PluginLogEntry, PluginLogger};

// Lifecycle and discovery
pub use manager::{ManagerSettings, PluginManager};
pub use discovery::{ManifestDiscovery, PluginDiscovery, PluginFactory, PluginManifest};
pub use version::{Version, VersionConstraint};
