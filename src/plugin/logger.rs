//! Plugin Logger
//!
//! Logger handed to each plugin through its context. Every entry is tagged
//! with the plugin id and structured payloads are redacted before they reach
//! any sink.

use std::fmt;
use std::sync::Arc;
use log::Level;
use parking_lot::Mutex;
use serde_json::Value;
use crate::plugin::sandbox::redact_sensitive;

/// One log entry emitted by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct PluginLogEntry {
    pub plugin_id: String,
    pub level: Level,
    pub message: String,
    /// Already redacted
    pub payload: Option<Value>,
}

impl PluginLogEntry {
    /// `[plugin-id] message {payload}`
    pub fn render(&self) -> String {
        match &self.payload {
            Some(payload) => format!("[{}] {} {}", self.plugin_id, self.message, payload),
            None => format!("[{}] {}", self.plugin_id, self.message),
        }
    }
}

impl fmt::Display for PluginLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Destination for plugin log entries
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &PluginLogEntry);
}

/// Forwards entries to the `log` facade with target `plugin::<id>`
#[derive(Debug, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn write(&self, entry: &PluginLogEntry) {
        let target = format!("plugin::{}", entry.plugin_id);
        log::log!(target: target.as_str(), entry.level, "{}", entry.render());
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<PluginLogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PluginLogEntry> {
        self.entries.lock().clone()
    }

    /// Every entry rendered as it would be printed
    pub fn rendered(&self) -> Vec<String> {
        self.entries.lock().iter().map(PluginLogEntry::render).collect()
    }

    /// Whether any rendered entry contains `text`
    pub fn contains(&self, text: &str) -> bool {
        self.entries.lock().iter().any(|e| e.render().contains(text))
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &PluginLogEntry) {
        self.entries.lock().push(entry.clone());
    }
}

/// Logger scoped to one plugin
#[derive(Clone)]
pub struct PluginLogger {
    plugin_id: String,
    sink: Arc<dyn LogSink>,
}

impl PluginLogger {
    pub fn new<S: Into<String>>(plugin_id: S, sink: Arc<dyn LogSink>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            sink,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Emit a message with an optional structured payload
    pub fn log(&self, level: Level, message: &str, payload: Option<&Value>) {
        let entry = PluginLogEntry {
            plugin_id: self.plugin_id.clone(),
            level,
            message: message.to_string(),
            payload: payload.map(redact_sensitive),
        };
        self.sink.write(&entry);
    }

    pub fn trace(&self, message: &str) {
        self.log(Level::Trace, message, None);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message, None);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message, None);
    }

    pub fn debug_with(&self, message: &str, payload: &Value) {
        self.log(Level::Debug, message, Some(payload));
    }

    pub fn info_with(&self, message: &str, payload: &Value) {
        self.log(Level::Info, message, Some(payload));
    }

    pub fn warn_with(&self, message: &str, payload: &Value) {
        self.log(Level::Warn, message, Some(payload));
    }

    pub fn error_with(&self, message: &str, payload: &Value) {
        self.log(Level::Error, message, Some(payload));
    }
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger").field("plugin_id", &self.plugin_id).finish()
    }
}
