//! Plugin Discovery
//!
//! Finds plugin manifests on disk and turns them into plugin objects that can
//! be handed to the lifecycle manager. Manifests only carry metadata; the code
//! behind each plugin id is supplied by a [`PluginFactory`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;
use super::error::{PluginError, PluginResult};
use super::traits::{Plugin, PluginMetadata};

/// Manifest file names recognised during a scan
pub const MANIFEST_FILES: &[&str] = &["plugin.json", "plugin.yaml", "plugin.yml"];

/// Plugin discovery trait for finding plugin manifests
#[async_trait]
pub trait PluginDiscovery: Send + Sync {
    /// Discover all manifests
    async fn discover(&self) -> PluginResult<Vec<PluginManifest>>;

    /// Discover manifests that advertise a capability
    async fn discover_with_capability(&self, capability: &str) -> PluginResult<Vec<PluginManifest>> {
        let manifests = self.discover().await?;
        Ok(manifests
            .into_iter()
            .filter(|m| m.metadata.capabilities.contains(capability))
            .collect())
    }

    /// Root directory being scanned
    fn plugin_directory(&self) -> &Path;
}

/// Parsed manifest and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    pub metadata: PluginMetadata,
    pub path: PathBuf,
}

impl PluginManifest {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

/// Constructor registered for a plugin id
pub type PluginConstructor = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Maps plugin ids to constructors
#[derive(Default, Clone)]
pub struct PluginFactory {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for the id
    pub fn register<S, F>(&mut self, plugin_id: S, constructor: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.constructors.insert(plugin_id.into(), Arc::new(constructor));
        self
    }

    pub fn create(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        self.constructors.get(plugin_id).map(|constructor| constructor())
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.constructors.contains_key(plugin_id)
    }

    /// Registered ids, sorted
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.constructors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactory")
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}

/// File-based manifest discovery
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    plugin_directory: PathBuf,
    excluded_plugins: Vec<String>,
}

impl ManifestDiscovery {
    /// Create a discovery rooted at an existing directory
    pub fn new<P: AsRef<Path>>(plugin_directory: P) -> PluginResult<Self> {
        let path = plugin_directory.as_ref().to_path_buf();

        if !path.exists() {
            return Err(PluginError::discovery_error(format!(
                "Plugin directory does not exist: {}",
                path.display()
            )));
        }

        if !path.is_dir() {
            return Err(PluginError::discovery_error(format!(
                "Plugin path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self {
            plugin_directory: path,
            excluded_plugins: Vec::new(),
        })
    }

    /// Skip manifests with these ids
    pub fn with_excluded(mut self, excluded_plugins: Vec<String>) -> Self {
        self.excluded_plugins = excluded_plugins;
        self
    }

    /// Walk the tree and parse every manifest found
    async fn scan_directory(&self, dir: &Path) -> PluginResult<Vec<PluginManifest>> {
        let mut manifests = Vec::new();
        let mut directories_to_scan = vec![dir.to_path_buf()];

        while let Some(current_dir) = directories_to_scan.pop() {
            let mut entries = fs::read_dir(&current_dir).await.map_err(|e| {
                PluginError::discovery_error(format!("Failed to read directory {}: {}", current_dir.display(), e))
            })?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| PluginError::discovery_error(format!("Failed to read directory entry: {}", e)))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| PluginError::discovery_error(format!("Failed to stat {}: {}", path.display(), e)))?;

                if file_type.is_dir() {
                    directories_to_scan.push(path);
                } else if is_manifest_file(&path) {
                    let manifest = parse_manifest_file(&path).await?;
                    if self.excluded_plugins.iter().any(|id| id == manifest.id()) {
                        debug!("Excluding plugin manifest: {}", manifest.id());
                        continue;
                    }
                    manifests.push(manifest);
                }
            }
        }

        manifests.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(manifests)
    }

    /// Resolve every discovered manifest to a plugin object
    ///
    /// Fails with `PluginNotExported` on the first manifest the factory has no
    /// constructor for.
    pub async fn instantiate(&self, factory: &PluginFactory) -> PluginResult<Vec<Arc<dyn Plugin>>> {
        let manifests = self.discover().await?;
        let mut plugins = Vec::with_capacity(manifests.len());

        for manifest in manifests {
            let plugin = factory.create(manifest.id()).ok_or_else(|| PluginError::PluginNotExported {
                plugin_id: manifest.id().to_string(),
                source_path: manifest.path.display().to_string(),
            })?;

            if plugin.metadata().version != manifest.metadata.version {
                warn!(
                    "Plugin '{}' manifest declares v{} but the constructor provides v{}",
                    manifest.id(),
                    manifest.metadata.version,
                    plugin.metadata().version
                );
            }
            plugins.push(plugin);
        }

        Ok(plugins)
    }
}

#[async_trait]
impl PluginDiscovery for ManifestDiscovery {
    async fn discover(&self) -> PluginResult<Vec<PluginManifest>> {
        let manifests = self.scan_directory(&self.plugin_directory).await?;
        debug!("Discovered {} plugin manifests under {}", manifests.len(), self.plugin_directory.display());
        Ok(manifests)
    }

    fn plugin_directory(&self) -> &Path {
        &self.plugin_directory
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| MANIFEST_FILES.contains(&name))
}

/// Parse and validate a single manifest file
pub async fn parse_manifest_file(path: &Path) -> PluginResult<PluginManifest> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| PluginError::discovery_error(format!("Failed to read file {}: {}", path.display(), e)))?;

    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    let metadata = parse_manifest(&content, is_json)
        .map_err(|e| PluginError::manifest_parse(format!("{}: {}", path.display(), e)))?;
    metadata.validate()?;

    Ok(PluginManifest {
        metadata,
        path: path.to_path_buf(),
    })
}

/// Parse manifest text as JSON or YAML
pub fn parse_manifest(content: &str, json: bool) -> PluginResult<PluginMetadata> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}
