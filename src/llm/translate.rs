//! Conversion between the normalized message model and the
//! OpenAI-compatible Chat Completions wire format.
//!
//! Every supported provider speaks this format, so one set of wire types
//! covers them all:
//! - **Outbound**: `ChatRequest` -> `ApiRequest`. Tool call arguments are
//!   always sent as a JSON-encoded string, never a nested object.
//! - **Inbound**: `ApiResponse` -> `ChatMessage` for one-shot calls, and
//!   `StreamResponseChunk` -> `StreamDelta` for streaming calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::registry::ProviderId;
use crate::error::GatewayError;
use crate::types::{
    ChatMessage, ChatRequest, Role, StreamDelta, TokenUsage, ToolCall, ToolCallFragment,
    ToolCallStatus, ToolDefinition,
};

// --- API Request Types ---

#[derive(Serialize, Debug, Clone)]
pub struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ApiTool>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<ApiStreamOptions>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiTool {
    pub r#type: String,
    pub function: ApiFunction,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiStreamOptions {
    pub include_usage: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiToolCall {
    pub id: String,
    #[serde(default = "function_type")]
    pub r#type: String,
    pub function: ApiToolCallFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiToolCallFunction {
    pub name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

// --- API Response Types ---

#[derive(Deserialize, Debug)]
pub struct ApiResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Deserialize, Debug)]
pub struct ApiChoice {
    pub message: ApiResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ApiResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct ApiUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl From<ApiUsage> for TokenUsage {
    fn from(u: ApiUsage) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        }
    }
}

// --- Streaming Response Types ---

#[derive(Deserialize, Debug)]
pub struct StreamResponseChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: ApiStreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ApiStreamDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
pub struct StreamToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
pub struct StreamFunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// --- Outbound ---

/// Build the wire request for `request`, addressed to `model`.
///
/// Fails when a tool-role message has no `tool_call_id`: sending an empty
/// reference upstream would only produce a confusing provider error.
pub fn build_api_request(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<ApiRequest, GatewayError> {
    let messages = request
        .messages
        .iter()
        .enumerate()
        .map(|(position, msg)| to_api_message(position, msg))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiRequest {
        model: model.to_string(),
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        tools: api_tools(&request.tools),
        stream,
        stream_options: stream.then_some(ApiStreamOptions {
            include_usage: true,
        }),
    })
}

fn to_api_message(position: usize, msg: &ChatMessage) -> Result<ApiMessage, GatewayError> {
    let api_message = match msg.role {
        Role::System | Role::User => ApiMessage {
            role: role_name(msg.role).to_string(),
            content: Some(msg.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Assistant => {
            let tool_calls = if msg.tool_calls.is_empty() {
                None
            } else {
                Some(msg.tool_calls.iter().map(to_api_tool_call).collect())
            };
            ApiMessage {
                role: "assistant".to_string(),
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content.clone())
                },
                tool_calls,
                tool_call_id: None,
            }
        }
        Role::Tool => {
            let tool_call_id = msg
                .tool_call_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .ok_or(GatewayError::MalformedToolResultReference { position })?;
            ApiMessage {
                role: "tool".to_string(),
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.to_string()),
            }
        }
    };
    Ok(api_message)
}

fn to_api_tool_call(tc: &ToolCall) -> ApiToolCall {
    ApiToolCall {
        id: tc.id.clone(),
        r#type: function_type(),
        function: ApiToolCallFunction {
            name: tc.name.clone(),
            arguments: Value::Object(tc.arguments.clone()).to_string(),
        },
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Wire form of tool declarations.
pub fn api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
    tools
        .iter()
        .map(|t| ApiTool {
            r#type: function_type(),
            function: ApiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

// --- Inbound ---

/// Convert a one-shot reply into an assistant message.
pub fn parse_response(
    api_response: ApiResponse,
    provider: ProviderId,
) -> Result<ChatMessage, GatewayError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::upstream(provider, "empty response: no choices returned"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            arguments: parse_arguments(&tc.function.name, &tc.function.arguments),
            id: tc.id,
            name: tc.function.name,
            status: ToolCallStatus::Success,
        })
        .collect();

    let mut message =
        ChatMessage::assistant_with_tool_calls(choice.message.content.unwrap_or_default(), tool_calls);
    message.reasoning_content = choice.message.reasoning_content.filter(|r| !r.is_empty());
    message
        .metadata
        .insert("provider".to_string(), provider.as_str().into());
    if let Some(model) = api_response.model {
        message.metadata.insert("model".to_string(), model.into());
    }
    if let Some(reason) = choice.finish_reason {
        message
            .metadata
            .insert("finish_reason".to_string(), reason.into());
    }
    if let Some(usage) = api_response.usage {
        record_usage(&mut message.metadata, usage.into());
    }
    Ok(message)
}

/// Lift the first choice of a wire chunk into a normalized delta.
pub fn delta_from_chunk(chunk: StreamResponseChunk) -> StreamDelta {
    let usage = chunk.usage.map(TokenUsage::from);
    let Some(choice) = chunk.choices.into_iter().next() else {
        return StreamDelta {
            usage,
            ..StreamDelta::default()
        };
    };

    let tool_calls = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallFragment {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    StreamDelta {
        content: choice.delta.content,
        reasoning_content: choice.delta.reasoning_content,
        tool_calls,
        finish_reason: choice.finish_reason,
        usage,
    }
}

pub(crate) fn record_usage(metadata: &mut Map<String, Value>, usage: TokenUsage) {
    metadata.insert("input_tokens".to_string(), usage.input_tokens.into());
    metadata.insert("output_tokens".to_string(), usage.output_tokens.into());
}

/// Parse accumulated tool call argument text into a JSON object.
///
/// Anything that is not a JSON object (truncated text, a bare string, an
/// array) comes back as `{"raw": text}` so the call is never lost.
pub fn parse_arguments(tool: &str, text: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        parsed => {
            let reason = match parsed {
                Ok(_) => "not a JSON object".to_string(),
                Err(e) => e.to_string(),
            };
            // Tools without parameters often stream no argument text at all
            if text.trim().is_empty() {
                tracing::debug!(tool = %tool, "tool call has no argument text");
            } else {
                tracing::warn!(tool = %tool, reason = %reason, "tool call arguments kept as raw text");
            }
            let mut raw = Map::new();
            raw.insert("raw".to_string(), Value::String(text.to_string()));
            raw
        }
    }
}
