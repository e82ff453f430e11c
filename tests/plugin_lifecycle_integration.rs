//! Integration Tests for the Plugin Lifecycle
//!
//! Drives the public API end to end: plugins contributing tools and commands,
//! consuming them through the registry, host events and shared storage,
//! sandboxed plugins and teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use plughost::plugin::{
    points, Command, EventListener, HostServices, ManagerSettings, MemorySink, Plugin, PluginContext,
    PluginError, PluginManager, PluginMetadata, PluginResult, PluginState, SandboxConfig, Tool,
};

struct WordCount;

#[async_trait]
impl Tool for WordCount {
    fn name(&self) -> &str {
        "word-count"
    }

    fn description(&self) -> &str {
        "Counts words in the `text` parameter"
    }

    async fn execute(&self, params: Value) -> PluginResult<Value> {
        let text = params["text"].as_str().unwrap_or_default();
        Ok(json!({ "words": text.split_whitespace().count() }))
    }
}

struct Greet;

#[async_trait]
impl Command for Greet {
    fn name(&self) -> &str {
        "greet"
    }

    fn description(&self) -> &str {
        "Says hello"
    }

    async fn run(&self, args: &[String]) -> PluginResult<String> {
        Ok(format!("hello {}", args.join(" ")))
    }
}

struct Counter {
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl EventListener for Counter {
    async fn on_event(&self, _event: &str, _payload: &Value) -> PluginResult<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plugin contributing a tool, a command and a session listener
struct TextPlugin {
    metadata: PluginMetadata,
    tool: Mutex<Option<Arc<dyn Tool>>>,
    command: Mutex<Option<Arc<dyn Command>>>,
    sessions: Arc<AtomicUsize>,
}

impl TextPlugin {
    fn new() -> Self {
        Self {
            metadata: PluginMetadata::new("text", "Text Utilities", "1.3.0")
                .with_platform("^1.0.0")
                .with_capability("tools")
                .with_capability("commands"),
            tool: Mutex::new(None),
            command: Mutex::new(None),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Plugin for TextPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn activate(&self, context: &PluginContext) -> PluginResult<()> {
        let tool: Arc<dyn Tool> = Arc::new(WordCount);
        let command: Arc<dyn Command> = Arc::new(Greet);
        context.registry().register(points::TOOLS, tool.clone())?;
        context.registry().register(points::COMMANDS, command.clone())?;
        context.events().subscribe(
            "session.start",
            Arc::new(Counter { seen: self.sessions.clone() }),
        )?;
        context.global_storage().set("text.version", json!(self.metadata.version)).await?;
        context.logger().info_with("ready", &json!({"token": "do-not-print"}));

        *self.tool.lock() = Some(tool);
        *self.command.lock() = Some(command);
        Ok(())
    }

    async fn deactivate(&self, context: &PluginContext) -> PluginResult<()> {
        if let Some(tool) = self.tool.lock().take() {
            context.registry().unregister(points::TOOLS, &tool)?;
        }
        if let Some(command) = self.command.lock().take() {
            context.registry().unregister(points::COMMANDS, &command)?;
        }
        Ok(())
    }
}

/// Plugin confined to reading the registry
struct ReadOnlyPlugin {
    metadata: PluginMetadata,
}

#[async_trait]
impl Plugin for ReadOnlyPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn activate(&self, context: &PluginContext) -> PluginResult<()> {
        let tools = context.registry().get_all::<dyn Tool>(points::TOOLS)?;
        context.logger().info(&format!("sees {} tools", tools.len()));
        context.global_storage().set("sneaky", json!(true)).await
    }

    fn sandbox_config(&self) -> Option<SandboxConfig> {
        Some(SandboxConfig::allow(["registry.getAll", "registry.listPoints"]))
    }
}

fn host() -> (PluginManager, Arc<MemorySink>, TempDir) {
    let sink = Arc::new(MemorySink::new());
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let services = HostServices::default().with_log_sink(sink.clone());
    let manager = PluginManager::new(services, ManagerSettings::new(temp_dir.path()).with_platform_version("1.0.0"));
    (manager, sink, temp_dir)
}

#[tokio::test]
async fn test_contributed_capabilities_are_consumable() {
    let (manager, _sink, _temp_dir) = host();
    manager.load(Arc::new(TextPlugin::new())).await.unwrap();

    let tools = manager.registry().point::<dyn Tool>(points::TOOLS).unwrap().get_all();
    assert_eq!(tools.len(), 1);
    let result = tools[0].execute(json!({"text": "one two three"})).await.unwrap();
    assert_eq!(result["words"], 3);

    let commands = manager.registry().point::<dyn Command>(points::COMMANDS).unwrap().get_all();
    assert_eq!(commands[0].run(&["world".to_string()]).await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_shared_services_are_wired_through() {
    let (manager, sink, _temp_dir) = host();
    let plugin = Arc::new(TextPlugin::new());
    manager.load(plugin.clone()).await.unwrap();

    let delivered = manager.services().events.emit("session.start", json!({})).await;
    assert_eq!(delivered, 1);
    assert_eq!(plugin.sessions.load(Ordering::SeqCst), 1);

    let stored = manager.services().storage.get("text.version").await.unwrap();
    assert_eq!(stored, Some(json!("1.3.0")));

    assert!(sink.contains("[text] ready"));
    assert!(!sink.contains("do-not-print"));
}

#[tokio::test]
async fn test_unload_withdraws_capabilities_and_listeners() {
    let (manager, _sink, _temp_dir) = host();
    let plugin = Arc::new(TextPlugin::new());
    manager.load(plugin.clone()).await.unwrap();
    manager.unload("text").await.unwrap();

    assert!(manager.registry().point::<dyn Tool>(points::TOOLS).unwrap().is_empty());
    assert!(manager.registry().point::<dyn Command>(points::COMMANDS).unwrap().is_empty());
    assert_eq!(manager.services().events.emit("session.start", json!({})).await, 0);
}

#[tokio::test]
async fn test_sandboxed_plugin_cannot_escape_allow_list() {
    let (manager, sink, _temp_dir) = host();
    manager.load(Arc::new(TextPlugin::new())).await.unwrap();

    let reader = Arc::new(ReadOnlyPlugin {
        metadata: PluginMetadata::new("reader", "Reader", "0.1.0"),
    });
    let err = manager.load(reader).await.unwrap_err();

    match err {
        PluginError::ActivationFailed { plugin_id, source } => {
            assert_eq!(plugin_id, "reader");
            assert!(matches!(*source, PluginError::PermissionDenied { ref api, .. } if api == "storage.set"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(sink.contains("[reader] sees 1 tools"));
    assert_eq!(manager.services().storage.get("sneaky").await.unwrap(), None);
    assert!(!manager.is_loaded("reader"));
}

#[tokio::test]
async fn test_status_listing_and_shutdown() {
    let (manager, _sink, _temp_dir) = host();
    manager.load(Arc::new(TextPlugin::new())).await.unwrap();

    let statuses = manager.list_plugins();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, PluginState::Active);
    assert_eq!(statuses[0].metadata.version, "1.3.0");

    let serialized = serde_json::to_value(&statuses[0]).unwrap();
    assert_eq!(serialized["state"], "ACTIVE");

    let results = manager.unload_all().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());
    assert_eq!(manager.plugin_count(), 0);
}
