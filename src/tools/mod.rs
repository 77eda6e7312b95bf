//! Tool registry.
//!
//! The gateway only needs two things from the tool side: the declarations
//! to send upstream, and a way to run a finalized tool call by name. The
//! `Tool` trait and `ToolRouter` provide both; where tools come from (an
//! MCP session, built-ins) is up to whoever registers them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::types::{ChatMessage, ToolCall, ToolCallStatus, ToolDefinition};

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "search").
    fn name(&self) -> &str;

    /// What the tool does. The model reads this to decide when to use it.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with parsed arguments.
    async fn execute(&self, arguments: &Map<String, Value>) -> Result<String>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// Routes tool calls to the registered implementation.
pub struct ToolRouter {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    /// Declarations for the outbound request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> Result<String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .with_context(|| format!("Unknown tool: {}", name))?;
        tool.execute(arguments).await
    }

    /// Run a finalized tool call and produce the tool-result message to
    /// send back upstream.
    ///
    /// The call moves to `Running`, then `Success` or `Error`. Failures are
    /// reported to the model as the result text rather than raised.
    pub async fn invoke(&self, call: &mut ToolCall) -> ChatMessage {
        call.status = ToolCallStatus::Running;
        let result = match call.raw_arguments() {
            Some(raw) => Err(anyhow::anyhow!(
                "Invalid JSON arguments for tool '{}': {}",
                call.name,
                raw
            )),
            None => self.execute(&call.name, &call.arguments).await,
        };

        let content = match result {
            Ok(output) => {
                call.status = ToolCallStatus::Success;
                output
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool invocation failed");
                call.status = ToolCallStatus::Error;
                format!("Error: {:#}", e)
            }
        };
        ChatMessage::tool_result(&call.id, content)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}
