//! chatgate: a streaming chat-completion gateway for OpenAI-compatible
//! providers.
//!
//! Entry point is [`gateway::Gateway`]: `chat` for one-shot replies,
//! `stream_chat` for incremental text, reasoning and tool-call events.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod tools;
pub mod types;

pub use error::GatewayError;
pub use gateway::Gateway;
pub use llm::aggregator::StreamSink;
pub use llm::registry::{ProviderId, ProviderRegistry};
pub use types::{ChatMessage, ChatRequest, Role, ToolCall, ToolCallStatus};
