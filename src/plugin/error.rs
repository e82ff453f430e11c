//! Plugin Error Types
//!
//! Structured errors for every plugin host operation. Each variant carries the
//! identifiers involved so a host can log, alert or present messages without
//! parsing strings.

use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Error kinds raised by the version comparator, extension registry,
/// capability sandbox and lifecycle manager
#[derive(Error, Debug, Clone)]
pub enum PluginError {
    /// Required metadata missing or malformed
    #[error("Invalid metadata for plugin '{plugin_id}': {message}")]
    InvalidMetadata { plugin_id: String, message: String },

    /// Version string is not a semantic version triple
    #[error("Invalid version format: '{version}'")]
    InvalidVersionFormat { version: String },

    /// Plugin id is already tracked by the manager
    #[error("Plugin already loaded: {plugin_id}")]
    AlreadyLoaded { plugin_id: String },

    /// Plugin id is not tracked by the manager
    #[error("Plugin not loaded: {plugin_id}")]
    NotLoaded { plugin_id: String },

    /// Platform version does not satisfy the plugin's constraint
    #[error("Plugin '{plugin_id}' requires platform {required} but platform is {actual}")]
    IncompatiblePlatform {
        plugin_id: String,
        required: String,
        actual: String,
    },

    /// Declared plugin dependency is not loaded
    #[error("Plugin '{plugin_id}' requires dependency '{dependency}' which is not loaded")]
    MissingDependency { plugin_id: String, dependency: String },

    /// Loaded dependency version does not satisfy the declared range
    #[error("Plugin '{plugin_id}' requires {dependency} {required} but found version {found}")]
    IncompatibleDependency {
        plugin_id: String,
        dependency: String,
        required: String,
        found: String,
    },

    /// Plugin activation raised an error
    #[error("Activation of plugin '{plugin_id}' failed: {source}")]
    ActivationFailed {
        plugin_id: String,
        #[source]
        source: Box<PluginError>,
    },

    /// Plugin activation did not complete in time
    #[error("Activation of plugin '{plugin_id}' timed out after {timeout_ms}ms")]
    ActivationTimeout { plugin_id: String, timeout_ms: u64 },

    /// Plugin deactivation raised an error
    #[error("Deactivation of plugin '{plugin_id}' failed: {source}")]
    DeactivationFailed {
        plugin_id: String,
        #[source]
        source: Box<PluginError>,
    },

    /// Sandbox denied an API outside the plugin's allow-list
    #[error("Permission denied: plugin '{plugin_id}' may not call {api}")]
    PermissionDenied { plugin_id: String, api: String },

    /// Sandbox resource ceiling is not a positive value
    #[error("Invalid resource limit {limit}: {message}")]
    ResourceLimitInvalid { limit: String, message: String },

    /// Extension point name collision
    #[error("Extension point already defined: {name}")]
    DuplicatePointName { name: String },

    /// Extension point lookup failed
    #[error("Extension point not found: {name}")]
    PointNotFound { name: String },

    /// Extension point exists but holds a different extension type
    #[error("Extension point '{name}' does not hold {expected}")]
    PointTypeMismatch { name: String, expected: String },

    /// Discovery found a manifest but nothing provides the plugin
    #[error("No plugin exported for '{plugin_id}' (manifest: {source_path})")]
    PluginNotExported { plugin_id: String, source_path: String },

    /// Plugin manifest could not be parsed
    #[error("Manifest parse error: {message}")]
    ManifestParse { message: String },

    /// Plugin discovery failed
    #[error("Discovery error: {message}")]
    Discovery { message: String },

    /// Plugin storage could not be prepared or accessed
    #[error("Storage error for plugin '{plugin_id}': {message}")]
    Storage { plugin_id: String, message: String },

    /// Configuration error
    #[error("Plugin configuration error: {message}")]
    Configuration { message: String },

    /// Capability invocation failed
    #[error("Plugin execution error: {message}")]
    Execution { message: String },

    /// Generic plugin error
    #[error("Plugin error: {message}")]
    Generic { message: String },
}

impl PluginError {
    /// Create an invalid metadata error
    pub fn invalid_metadata<S: Into<String>, M: Into<String>>(plugin_id: S, message: M) -> Self {
        Self::InvalidMetadata { plugin_id: plugin_id.into(), message: message.into() }
    }

    /// Create an invalid version format error
    pub fn invalid_version<S: Into<String>>(version: S) -> Self {
        Self::InvalidVersionFormat { version: version.into() }
    }

    /// Create an already loaded error
    pub fn already_loaded<S: Into<String>>(plugin_id: S) -> Self {
        Self::AlreadyLoaded { plugin_id: plugin_id.into() }
    }

    /// Create a not loaded error
    pub fn not_loaded<S: Into<String>>(plugin_id: S) -> Self {
        Self::NotLoaded { plugin_id: plugin_id.into() }
    }

    /// Wrap an activation failure
    pub fn activation_failed<S: Into<String>>(plugin_id: S, source: PluginError) -> Self {
        Self::ActivationFailed { plugin_id: plugin_id.into(), source: Box::new(source) }
    }

    /// Wrap a deactivation failure
    pub fn deactivation_failed<S: Into<String>>(plugin_id: S, source: PluginError) -> Self {
        Self::DeactivationFailed { plugin_id: plugin_id.into(), source: Box::new(source) }
    }

    /// Create a permission denied error
    pub fn permission_denied<S: Into<String>, A: Into<String>>(plugin_id: S, api: A) -> Self {
        Self::PermissionDenied { plugin_id: plugin_id.into(), api: api.into() }
    }

    /// Create a resource limit error
    pub fn resource_limit_invalid<S: Into<String>, M: Into<String>>(limit: S, message: M) -> Self {
        Self::ResourceLimitInvalid { limit: limit.into(), message: message.into() }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>, M: Into<String>>(plugin_id: S, message: M) -> Self {
        Self::Storage { plugin_id: plugin_id.into(), message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an execution error
    pub fn execution_failed<S: Into<String>>(message: S) -> Self {
        Self::Execution { message: message.into() }
    }

    /// Create a discovery error
    pub fn discovery_error<S: Into<String>>(message: S) -> Self {
        Self::Discovery { message: message.into() }
    }

    /// Create a manifest parse error
    pub fn manifest_parse<S: Into<String>>(message: S) -> Self {
        Self::ManifestParse { message: message.into() }
    }

    /// Create a generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic { message: message.into() }
    }

    /// Plugin id the error refers to, when there is one
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::InvalidMetadata { plugin_id, .. }
            | Self::AlreadyLoaded { plugin_id }
            | Self::NotLoaded { plugin_id }
            | Self::IncompatiblePlatform { plugin_id, .. }
            | Self::MissingDependency { plugin_id, .. }
            | Self::IncompatibleDependency { plugin_id, .. }
            | Self::ActivationFailed { plugin_id, .. }
            | Self::ActivationTimeout { plugin_id, .. }
            | Self::DeactivationFailed { plugin_id, .. }
            | Self::PermissionDenied { plugin_id, .. }
            | Self::PluginNotExported { plugin_id, .. }
            | Self::Storage { plugin_id, .. } => Some(plugin_id),
            _ => None,
        }
    }

    /// Check if error is a lifecycle precondition or phase failure
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self,
            PluginError::InvalidMetadata { .. } |
            PluginError::AlreadyLoaded { .. } |
            PluginError::NotLoaded { .. } |
            PluginError::ActivationFailed { .. } |
            PluginError::ActivationTimeout { .. } |
            PluginError::DeactivationFailed { .. }
        )
    }

    /// Check if error came from dependency resolution
    pub fn is_dependency_error(&self) -> bool {
        matches!(self,
            PluginError::IncompatiblePlatform { .. } |
            PluginError::MissingDependency { .. } |
            PluginError::IncompatibleDependency { .. }
        )
    }

    /// Check if the caller can reasonably retry the same operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            PluginError::DeactivationFailed { .. } |
            PluginError::ActivationTimeout { .. } |
            PluginError::PermissionDenied { .. } |
            PluginError::MissingDependency { .. } |
            PluginError::Execution { .. }
        )
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::generic(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::manifest_parse(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for PluginError {
    fn from(err: serde_yaml::Error) -> Self {
        PluginError::manifest_parse(format!("YAML error: {}", err))
    }
}
