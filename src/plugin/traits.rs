//! Core Plugin Traits
//!
//! Defines the plugin contract and the metadata every plugin advertises.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use super::context::PluginContext;
use super::error::{PluginError, PluginResult};
use super::sandbox::SandboxConfig;
use super::version::Version;

/// Core plugin interface that all plugins must implement
///
/// Plugins are shared as `Arc<dyn Plugin>`: the manager keeps one handle and
/// hands others out through `get_plugin`, so any state a plugin keeps between
/// activation and deactivation needs interior mutability.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get plugin metadata
    fn metadata(&self) -> &PluginMetadata;

    /// Register capabilities through the context
    async fn activate(&self, context: &PluginContext) -> PluginResult<()>;

    /// Release capabilities registered during activation
    async fn deactivate(&self, _context: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Sandbox this plugin asks to run under; `None` uses the host default
    fn sandbox_config(&self) -> Option<SandboxConfig> {
        None
    }

    /// Convenience accessor for the plugin id
    fn id(&self) -> &str {
        &self.metadata().id
    }
}

/// Plugin author record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAuthor {
    /// Author display name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Platform and inter-plugin requirements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependencies {
    /// Constraint on the host platform version (e.g. `^1.0.0`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Plugin id to required version range
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, String>,
}

/// Plugin identity and compatibility descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Unique plugin identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Semantic version (`MAJOR.MINOR.PATCH[...]`)
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: PluginAuthor,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<PluginDependencies>,

    /// Free-form capability tags
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl PluginMetadata {
    /// Create metadata with the required fields
    pub fn new<I, N, V>(id: I, name: N, version: V) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: PluginAuthor::default(),
            dependencies: None,
            capabilities: BTreeSet::new(),
            keywords: Vec::new(),
        }
    }

    /// Set description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Set author name
    pub fn with_author<S: Into<String>>(mut self, author: S) -> Self {
        self.author.name = author.into();
        self
    }

    /// Require a platform version constraint
    pub fn with_platform<S: Into<String>>(mut self, constraint: S) -> Self {
        self.dependencies
            .get_or_insert_with(PluginDependencies::default)
            .platform = Some(constraint.into());
        self
    }

    /// Add a plugin dependency
    pub fn with_dependency<I: Into<String>, R: Into<String>>(mut self, plugin_id: I, range: R) -> Self {
        self.dependencies
            .get_or_insert_with(PluginDependencies::default)
            .plugins
            .insert(plugin_id.into(), range.into());
        self
    }

    /// Add a capability tag
    pub fn with_capability<S: Into<String>>(mut self, capability: S) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Add a keyword
    pub fn with_keyword<S: Into<String>>(mut self, keyword: S) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Declared platform constraint, if any
    pub fn platform_constraint(&self) -> Option<&str> {
        self.dependencies.as_ref().and_then(|d| d.platform.as_deref())
    }

    /// Declared plugin dependencies (empty when none)
    pub fn plugin_dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies
            .iter()
            .flat_map(|d| d.plugins.iter())
            .map(|(id, range)| (id.as_str(), range.as_str()))
    }

    /// Check the required fields
    ///
    /// The id also scopes the plugin's storage directory, so it must be a
    /// single path component.
    pub fn validate(&self) -> PluginResult<()> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(PluginError::invalid_metadata(&self.id, "id is required"));
        }
        if id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(PluginError::invalid_metadata(
                &self.id,
                "id must not contain path separators or be a relative path",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PluginError::invalid_metadata(&self.id, "name is required"));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::invalid_metadata(&self.id, "version is required"));
        }
        if Version::parse(&self.version).is_err() {
            return Err(PluginError::invalid_metadata(
                &self.id,
                format!("version '{}' is not a semantic version", self.version),
            ));
        }
        Ok(())
    }
}

/// Runtime state of a tracked plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    /// Tracked but not running
    Inactive,

    /// Activation succeeded
    Active,

    /// Deactivation failed; unload may be retried
    Error,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginState::Inactive => "INACTIVE",
            PluginState::Active => "ACTIVE",
            PluginState::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Snapshot of a tracked plugin for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    pub metadata: PluginMetadata,
    pub state: PluginState,
    pub loaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
