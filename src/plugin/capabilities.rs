//! Capability Traits
//!
//! Element types of the built-in extension points. Plugins implement these and
//! register `Arc<dyn ...>` instances; the rest of the assistant consumes them
//! through the registry.

use async_trait::async_trait;
use serde_json::Value;
use crate::plugin::error::PluginResult;

/// Tool callable by the assistant
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters
    fn parameters_schema(&self) -> Value {
        Value::Object(Default::default())
    }

    async fn execute(&self, params: Value) -> PluginResult<Value>;
}

/// User-invocable command
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Alternative names the command answers to
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, args: &[String]) -> PluginResult<String>;
}

/// AI model provider
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn models(&self) -> Vec<String>;

    async fn complete(&self, model: &str, prompt: &str) -> PluginResult<String>;
}

/// Transformation applied to requests flowing through the assistant
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, request: Value) -> PluginResult<Value>;
}

/// Handler bound to a host event name
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event(&self) -> &str;

    async fn handle(&self, payload: &Value) -> PluginResult<()>;
}

/// Renderable UI component
pub trait UiComponent: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self) -> String;
}
