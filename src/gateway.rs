//! Gateway - the public entry point.
//!
//! The Gateway binds provider resolution, request translation and stream
//! aggregation into the two calls client code makes:
//!
//! ```text
//! ChatRequest
//!     |
//!     v
//! +----------+     +-----------+     +----------+
//! | Registry |---->| Translate |---->| Provider |
//! +----------+     +-----------+     +----------+
//!                                         |
//!                      one-shot reply     |     delta stream
//!                  +----------------------+--------------------+
//!                  v                                           v
//!             ChatMessage                     StreamAggregator -> StreamSink
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::llm::aggregator::{self, StreamSink};
use crate::llm::registry::{ProviderBinding, ProviderRegistry};
use crate::llm::translate::{self, ApiRequest};
use crate::tools::ToolRouter;
use crate::types::{ChatMessage, ChatRequest, ToolCall};

/// Fallback sampling settings applied when a request leaves them unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestDefaults {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    /// Declares tools for requests that bring none of their own
    tools: Option<Arc<ToolRouter>>,
    defaults: RequestDefaults,
}

impl Gateway {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            tools: None,
            defaults: RequestDefaults::default(),
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRouter>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolve a binding and build the wire request for it.
    fn prepare(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<(ProviderBinding, ApiRequest), GatewayError> {
        let binding = self
            .registry
            .resolve(request.provider, request.model.as_deref())?;
        let model = request
            .model
            .as_deref()
            .unwrap_or(binding.default_model.as_str());

        let mut api_request = translate::build_api_request(request, model, stream)?;
        api_request.temperature = api_request.temperature.or(self.defaults.temperature);
        api_request.max_tokens = api_request.max_tokens.or(self.defaults.max_tokens);
        if api_request.tools.is_empty() {
            if let Some(tools) = &self.tools {
                api_request.tools = translate::api_tools(&tools.definitions());
            }
        }

        tracing::debug!(
            provider = %binding.id,
            model = %api_request.model,
            messages = api_request.messages.len(),
            stream,
            "dispatching chat request"
        );
        Ok((binding, api_request))
    }

    /// One-shot completion: wait for the whole reply.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, GatewayError> {
        let (binding, api_request) = self.prepare(request, false)?;
        let response = binding.client.chat_completion(&api_request).await?;
        translate::parse_response(response, binding.id)
    }

    /// Streaming completion: forward every event to `sink` as it happens.
    ///
    /// Errors returned here happen before any event is emitted (resolution,
    /// translation, opening the stream). Once the stream is open, failures
    /// are delivered through `sink.on_error` and this returns `Ok(())`.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        sink: &mut dyn StreamSink,
    ) -> Result<(), GatewayError> {
        let (binding, api_request) = self.prepare(request, true)?;
        let deltas = binding.client.chat_completion_stream(&api_request).await?;

        let mut forwarding = ProviderTagging { inner: sink, binding: &binding };
        aggregator::drive(deltas, &api_request.model, &mut forwarding).await;
        Ok(())
    }
}

/// Adds the serving provider to the completed message's metadata.
struct ProviderTagging<'a> {
    inner: &'a mut dyn StreamSink,
    binding: &'a ProviderBinding,
}

#[async_trait]
impl<'a> StreamSink for ProviderTagging<'a> {
    async fn on_text_chunk(&mut self, text: &str, chunk: u64) {
        self.inner.on_text_chunk(text, chunk).await
    }

    async fn on_reasoning_chunk(&mut self, text: &str, chunk: u64) {
        self.inner.on_reasoning_chunk(text, chunk).await
    }

    async fn on_tool_call(&mut self, call: &ToolCall) {
        self.inner.on_tool_call(call).await
    }

    async fn on_complete(&mut self, message: &ChatMessage) {
        let mut message = message.clone();
        message
            .metadata
            .insert("provider".to_string(), self.binding.id.as_str().into());
        self.inner.on_complete(&message).await
    }

    async fn on_error(&mut self, error: &GatewayError) {
        self.inner.on_error(error).await
    }
}
