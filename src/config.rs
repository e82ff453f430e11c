//! Host Configuration
//!
//! TOML configuration flattened to `section -> key -> string`, plus typed
//! accessors that build the plugin manager, sandbox and logging settings.
//!
//! ```toml
//! [host]
//! platform-version = "1.0.0"
//! storage-root = "/var/lib/plughost"
//! activation-timeout-ms = 5000
//!
//! [sandbox]
//! allowed-apis = ["registry.*", "storage.get"]
//! max-memory = "128MB"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [plugins.docker]
//! image = "alpine"
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use toml::Value;
use crate::logging::{LogConfig, LogDestination, LogFormat};
use crate::plugin::error::PluginError;
use crate::plugin::manager::ManagerSettings;
use crate::plugin::sandbox::SandboxConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PLUGHOST_CONFIG";

/// Configuration storage - section_name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Configuration manager
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    config: Configuration,
    plugin_values: HashMap<String, HashMap<String, serde_json::Value>>,
    config_file_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a new ConfigManager from a Configuration (primarily for testing)
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse().context("Failed to parse TOML content")?;
        Ok(Self {
            config: flatten_config(&table),
            plugin_values: plugin_sections(&table)?,
            config_file_path: None,
        })
    }

    /// Load configuration using discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from explicit file path
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut manager = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from: {}", path.display());
        manager.config_file_path = Some(path);
        Ok(manager)
    }

    pub fn config_file_path(&self) -> Option<&Path> {
        self.config_file_path.as_deref()
    }

    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        self.config.get(section).and_then(|s| s.get(key))
    }

    /// Get boolean value with type conversion
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>> {
        self.get_value(section, key)
            .map(|value| {
                value
                    .parse::<u64>()
                    .with_context(|| format!("Invalid integer value for {}.{}: {}", section, key, value))
            })
            .transpose()
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Result<Option<f64>> {
        self.get_value(section, key)
            .map(|value| {
                value
                    .parse::<f64>()
                    .with_context(|| format!("Invalid number for {}.{}: {}", section, key, value))
            })
            .transpose()
    }

    /// Get log level value with type conversion
    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    /// Get path value with type conversion
    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(PathBuf::from)
    }

    /// Get a list from a TOML array or a comma separated string
    pub fn get_list(&self, section: &str, key: &str) -> Result<Option<Vec<String>>> {
        match self.get_value(section, key) {
            Some(value) => parse_list(value)
                .with_context(|| format!("Invalid list value for {}.{}", section, key))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Initial configuration values for one plugin (`[plugins.<id>]`)
    pub fn plugin_settings(&self, plugin_id: &str) -> HashMap<String, serde_json::Value> {
        self.plugin_values.get(plugin_id).cloned().unwrap_or_default()
    }

    /// Default sandbox from the `[sandbox]` section
    ///
    /// Without an `allowed-apis` key the sandbox is unrestricted.
    pub fn get_sandbox_config(&self) -> Result<SandboxConfig> {
        let mut config = match self.get_list("sandbox", "allowed-apis")? {
            Some(apis) => SandboxConfig::allow(apis),
            None => SandboxConfig::unrestricted(),
        };

        if let Some(max_memory) = self.get_value("sandbox", "max-memory") {
            let bytes = parse_memory_size(max_memory)
                .with_context(|| format!("Invalid max-memory value in config: {}", max_memory))?;
            config = config.with_max_memory(bytes);
        }
        if let Some(max_cpu) = self.get_f64("sandbox", "max-cpu")? {
            config = config.with_max_cpu(max_cpu);
        }
        if let Some(timeout_ms) = self.get_u64("sandbox", "timeout-ms")? {
            config = config.with_timeout_ms(timeout_ms);
        }

        config
            .validate()
            .with_context(|| "Sandbox configuration validation failed")?;
        Ok(config)
    }

    /// Lifecycle manager settings from `[host]`, `[sandbox]` and `[plugins.*]`
    pub fn get_manager_settings(&self) -> Result<ManagerSettings> {
        let mut settings = ManagerSettings::default();

        if let Some(version) = self.get_value("host", "platform-version") {
            crate::plugin::version::parse(version)
                .with_context(|| format!("Invalid platform-version in config: {}", version))?;
            settings.platform_version = version.clone();
        }
        if let Some(root) = self.get_path("host", "storage-root") {
            settings.storage_root = root;
        }
        if let Some(timeout_ms) = self.get_u64("host", "activation-timeout-ms")? {
            if timeout_ms == 0 {
                return Err(PluginError::resource_limit_invalid("activation-timeout", "must be greater than zero"))
                    .context("Host configuration validation failed");
            }
            settings.activation_timeout = Some(Duration::from_millis(timeout_ms));
        }

        settings.default_sandbox = self.get_sandbox_config()?;
        settings.plugin_settings = self.plugin_values.clone();
        Ok(settings)
    }

    /// Logging configuration from `[logging]`
    pub fn get_log_config(&self) -> Result<LogConfig> {
        let mut config = LogConfig::default();

        if let Some(level) = self.get_log_level("logging", "level")? {
            config.console_level = level;
        }
        if let Some(format) = self.get_value("logging", "format") {
            config.format = format.parse::<LogFormat>().map_err(|e| anyhow!(e))?;
        }
        if let Some(file) = self.get_path("logging", "file") {
            let file_level = self.get_log_level("logging", "file-level")?.unwrap_or(config.console_level);
            config.file_level = Some(file_level);
            config.destination = LogDestination::Both(file);
        }

        Ok(config)
    }
}

/// Discover configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(env_path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("plughost").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".plughost.toml"));
    }

    paths.push(PathBuf::from("./.plughost.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

fn flatten_config(table: &toml::Table) -> Configuration {
    let mut config = Configuration::new();
    flatten_toml_table(table, "", &mut config);
    debug!("Parsed configuration sections: {:?}", config.keys().collect::<Vec<_>>());
    config
}

/// Flatten nested tables into `section.subsection` names
///
/// Scalars and arrays become string values of the nearest enclosing table.
fn flatten_toml_table(table: &toml::Table, prefix: &str, config: &mut Configuration) {
    for (key, value) in table {
        match value {
            Value::Table(subtable) => {
                let section_name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_toml_table(subtable, &section_name, config);
            }
            _ => {
                config
                    .entry(prefix.to_string())
                    .or_default()
                    .insert(key.clone(), toml_value_to_string(value));
            }
        }
    }
}

/// Keep `[plugins.<id>]` values typed for plugin configuration stores
fn plugin_sections(table: &toml::Table) -> Result<HashMap<String, HashMap<String, serde_json::Value>>> {
    let mut sections = HashMap::new();

    let Some(Value::Table(plugins)) = table.get("plugins") else {
        return Ok(sections);
    };

    for (plugin_id, value) in plugins {
        let Value::Table(values) = value else {
            return Err(anyhow!("[plugins.{}] must be a table", plugin_id));
        };
        let mut converted = HashMap::new();
        for (key, value) in values {
            let json = serde_json::to_value(value)
                .with_context(|| format!("Unsupported value for plugins.{}.{}", plugin_id, key))?;
            converted.insert(key.clone(), json);
        }
        sections.insert(plugin_id.clone(), converted);
    }
    Ok(sections)
}

/// Convert TOML Value to string representation
fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn parse_list(value: &str) -> Result<Vec<String>> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        let table: toml::Table = format!("list = {}", trimmed).parse()?;
        match table.get("list") {
            Some(Value::Array(items)) => Ok(items.iter().map(toml_value_to_string).collect()),
            _ => Err(anyhow!("Expected an array: {}", value)),
        }
    } else {
        Ok(trimmed
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Parse a memory size such as `1024`, `512K`, `128MB` or `1GB` into bytes
pub fn parse_memory_size(input: &str) -> Result<u64> {
    let input = input.trim().to_uppercase();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: u64 = number
        .parse()
        .with_context(|| format!("Invalid memory size format: {}", input))?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        other => return Err(anyhow!("Invalid memory unit: {}", other)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Memory size too large: {}", input))
}
