//! Core data types used throughout chatgate.
//!
//! This module defines the normalized message model, tool call
//! structures, requests, and the provider-independent stream delta that
//! flow between the registry, translator, aggregator and gateway.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::registry::ProviderId;

// --- Message Roles ---

/// The role of a message in the conversation.
///
/// - `System`: instructions to the model
/// - `User`: the human's input
/// - `Assistant`: the model's response
/// - `Tool`: the result of a tool execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// --- Tool Call ---

/// Lifecycle of a tool call.
///
/// The gateway moves a call from `Pending` to `Success` when the stream
/// finalizes it; `Running` and `Error` belong to whoever invokes the tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier used to match the tool result back to this call
    pub id: String,
    /// Name of the tool to invoke (e.g. "search")
    pub name: String,
    /// Parsed arguments. Text that was not a JSON object is kept as `{"raw": text}`.
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// The unparsed argument text, if finalization had to wrap it.
    pub fn raw_arguments(&self) -> Option<&str> {
        if self.arguments.len() != 1 {
            return None;
        }
        self.arguments.get("raw").and_then(Value::as_str)
    }
}

// --- Tool Definition ---

/// Describes a tool's interface to the model via JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters
    pub input_schema: Value,
}

// --- Messages ---

/// A single turn in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Private deliberation some providers emit alongside the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// If the assistant wants to call tools, this will be non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool result messages, this links back to the tool call ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Model name, provider, token counts, finish reason
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            reasoning_content: None,
            tool_calls: vec![],
            tool_call_id: None,
            metadata: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create an assistant message that includes tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Token usage recorded in metadata, if the upstream reported it.
    pub fn usage(&self) -> Option<TokenUsage> {
        let input_tokens = self.metadata.get("input_tokens")?.as_u64()?;
        let output_tokens = self.metadata.get("output_tokens")?.as_u64()?;
        Some(TokenUsage {
            input_tokens,
            output_tokens,
        })
    }
}

// --- Chat Request ---

/// A normalized request to send to a provider.
///
/// The translator converts this into the provider's wire format.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Target model; the binding's default model when absent
    pub model: Option<String>,
    /// Bypass model-name inference and use this provider
    pub provider: Option<ProviderId>,
    pub temperature: Option<f32>,
    /// Maximum tokens in the response
    pub max_tokens: Option<u32>,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

// --- Token Usage ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// --- Stream Delta ---

/// One incremental update of a streaming completion, already lifted out of
/// the provider's wire format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    /// `tool_calls` marks the end of tool-call fragments
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self {
            reasoning_content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A piece of one tool call, merged with its siblings by `index`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}
