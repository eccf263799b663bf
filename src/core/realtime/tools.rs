//! Tool registry for server-initiated function calls.
//!
//! Every registered tool pairs a [`ToolDefinition`] (advertised to the server
//! in `session.update`) with a [`ToolHandler`] that runs when the model calls
//! the function. The advertised list is always regenerated from the registry
//! so the two cannot drift apart.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{RealtimeError, RealtimeResult};

/// Function tool advertised to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default)]
    pub description: String,
    /// JSON schema for parameters
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Identifies the call a handler is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallContext {
    pub call_id: String,
    pub name: String,
}

/// A handler's result could not be encoded as JSON.
#[derive(Debug, thiserror::Error)]
#[error("failed to serialize tool output: {0}")]
pub struct ToolOutputError(#[source] pub serde_json::Error);

/// Handler invoked with the parsed JSON arguments of a function call.
///
/// The returned value is serialized into the `function_call_output` item; an
/// error becomes `{"error": message}`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, context: ToolCallContext) -> anyhow::Result<Value>;
}

/// Closures may return any serializable value. Encoding failures surface as
/// [`ToolOutputError`].
#[async_trait]
impl<F, Fut, T> ToolHandler for F
where
    F: Fn(Value, ToolCallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    async fn call(&self, arguments: Value, context: ToolCallContext) -> anyhow::Result<Value> {
        let output = (self)(arguments, context).await?;
        Ok(serde_json::to_value(output).map_err(ToolOutputError)?)
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Name to handler map.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    // Registration order, so the advertised list is stable.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is empty or already taken.
    pub fn add(&mut self, mut definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> RealtimeResult<()> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(RealtimeError::ToolRegistration(
                "tool name must not be empty".to_string(),
            ));
        }
        if self.tools.contains_key(&name) {
            return Err(RealtimeError::ToolRegistration(format!(
                "tool \"{}\" already added, remove it first",
                name
            )));
        }
        definition.name = name.clone();
        self.order.push(name.clone());
        self.tools.insert(name, RegisteredTool { definition, handler });
        Ok(())
    }

    /// Remove a tool by name.
    pub fn remove(&mut self, name: &str) -> RealtimeResult<()> {
        if self.tools.remove(name).is_none() {
            return Err(RealtimeError::ToolRegistration(format!(
                "tool \"{}\" does not exist",
                name
            )));
        }
        self.order.retain(|n| n != name);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tools.clear();
        self.order.clear();
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|tool| Arc::clone(&tool.handler))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions of every registered tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.order).finish()
    }
}
