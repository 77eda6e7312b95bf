//! LLM client module.
//!
//! This module defines the `LlmProvider` trait that abstracts over the
//! upstream completion APIs, plus the pieces the gateway composes around
//! it:
//!
//! - **registry**: which provider serves a request
//! - **translate**: normalized model <-> OpenAI-compatible wire format
//! - **aggregator**: rebuilds a full message from streamed deltas
//! - **openai_compatible**: the HTTP + SSE client

pub mod aggregator;
pub mod openai_compatible;
pub mod registry;
pub mod translate;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::GatewayError;
use crate::types::StreamDelta;
use translate::{ApiRequest, ApiResponse};

/// Ordered deltas of one streaming completion.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, GatewayError>> + Send>>;

/// Trait that all upstream providers implement.
///
/// Requests arrive already translated to wire format, so an implementation
/// only moves bytes: it never sees the normalized message model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the entire response.
    async fn chat_completion(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError>;

    /// Open a streaming completion.
    ///
    /// Connection and HTTP status failures are returned here; failures
    /// after the stream is open arrive as stream items.
    async fn chat_completion_stream(&self, request: &ApiRequest)
        -> Result<DeltaStream, GatewayError>;

    /// Return the provider's display name (for logging).
    fn name(&self) -> &str;
}
