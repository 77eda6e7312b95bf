//! Error types for gateway operations.

use thiserror::Error;

use crate::llm::registry::ProviderId;

/// Errors surfaced by the gateway and its components.
///
/// Tool argument parse failures are deliberately absent: they are
/// recovered inside the aggregator by wrapping the raw text.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No binding is installed that could serve the request
    #[error("no provider configured")]
    NoProviderConfigured,

    /// A specific provider was requested (or inferred) but has no binding
    #[error("provider not configured: {provider}")]
    ProviderNotBound { provider: ProviderId },

    /// A binding was configured with an empty credential
    #[error("missing credential for provider {provider}")]
    MissingCredential { provider: ProviderId },

    /// A tool-role message has no `tool_call_id`
    #[error("tool result message at position {position} has no tool_call_id")]
    MalformedToolResultReference { position: usize },

    /// Transport, HTTP status or decoding failure talking to a provider
    #[error("upstream request to {provider} failed: {message}")]
    UpstreamRequestFailed { provider: ProviderId, message: String },
}

impl GatewayError {
    pub fn upstream(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::UpstreamRequestFailed {
            provider,
            message: message.into(),
        }
    }
}
