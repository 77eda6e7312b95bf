//! Provider identities, model-name inference, and the binding registry.
//!
//! Every upstream the gateway can talk to is a variant of [`ProviderId`].
//! The registry keeps one binding slot per variant, so resolution is a
//! plain array lookup and adding a provider is a compile-checked change.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::openai_compatible::OpenAiCompatibleProvider;
use super::LlmProvider;
use crate::error::GatewayError;

/// Upstream providers the gateway knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    DeepSeek,
    OpenRouter,
    Qwen,
}

impl ProviderId {
    /// All providers, in slot order.
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::DeepSeek,
        ProviderId::OpenRouter,
        ProviderId::Qwen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Qwen => "qwen",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "https://api.openai.com/v1",
            ProviderId::DeepSeek => "https://api.deepseek.com/v1",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "gpt-4o-mini",
            ProviderId::DeepSeek => "deepseek-chat",
            ProviderId::OpenRouter => "openai/gpt-4o-mini",
            ProviderId::Qwen => "qwen-plus",
        }
    }

    /// Environment variable consulted when no key is configured.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OPENAI_API_KEY",
            ProviderId::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderId::OpenRouter => "OPENROUTER_API_KEY",
            ProviderId::Qwen => "DASHSCOPE_API_KEY",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str() == needle)
            .ok_or_else(|| {
                format!(
                    "unknown provider '{}'. Supported: openai, deepseek, openrouter, qwen",
                    s
                )
            })
    }
}

// --- Model-name inference ---

/// A test against a lowercased model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPattern {
    Contains(&'static str),
    Prefix(&'static str),
}

impl ModelPattern {
    pub fn matches(self, model: &str) -> bool {
        match self {
            ModelPattern::Contains(needle) => model.contains(needle),
            ModelPattern::Prefix(prefix) => model.starts_with(prefix),
        }
    }
}

/// Ordered inference rules; the first matching pattern wins.
///
/// A `/` means vendor-qualified naming (`anthropic/claude-3.5-sonnet`),
/// which only the aggregator accepts, so it is checked first.
pub const MODEL_INFERENCE_RULES: &[(ModelPattern, ProviderId)] = &[
    (ModelPattern::Contains("/"), ProviderId::OpenRouter),
    (ModelPattern::Prefix("deepseek"), ProviderId::DeepSeek),
    (ModelPattern::Prefix("qwen"), ProviderId::Qwen),
    (ModelPattern::Prefix("qwq"), ProviderId::Qwen),
    (ModelPattern::Prefix("gpt-"), ProviderId::OpenAi),
    (ModelPattern::Prefix("chatgpt"), ProviderId::OpenAi),
    (ModelPattern::Prefix("o1"), ProviderId::OpenAi),
    (ModelPattern::Prefix("o3"), ProviderId::OpenAi),
    (ModelPattern::Prefix("o4"), ProviderId::OpenAi),
];

/// Infer the provider serving `model` from its name alone.
pub fn infer_provider(model: &str) -> Option<ProviderId> {
    let model = model.trim().to_ascii_lowercase();
    MODEL_INFERENCE_RULES
        .iter()
        .find(|(pattern, _)| pattern.matches(&model))
        .map(|&(_, provider)| provider)
}

// --- Bindings ---

/// A live handle to one upstream provider.
#[derive(Clone)]
pub struct ProviderBinding {
    pub id: ProviderId,
    /// Model used when a request names none
    pub default_model: String,
    pub client: Arc<dyn LlmProvider>,
}

impl ProviderBinding {
    pub fn new(id: ProviderId, client: Arc<dyn LlmProvider>) -> Self {
        Self {
            id,
            default_model: id.default_model().to_string(),
            client,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("id", &self.id)
            .field("default_model", &self.default_model)
            .field("client", &self.client.name())
            .finish()
    }
}

#[derive(Default)]
struct BindingTable {
    slots: [Option<ProviderBinding>; ProviderId::ALL.len()],
    default: Option<ProviderId>,
}

/// Holds the currently usable provider bindings and picks one per request.
///
/// Bindings are replaced whole under a write lock; readers clone the
/// `Arc` out, so a resolve never observes a half-installed binding.
pub struct ProviderRegistry {
    table: RwLock<BindingTable>,
    fallback_to_default: bool,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(BindingTable::default()),
            fallback_to_default: true,
        }
    }

    /// Whether an explicit or inferred provider without a binding falls
    /// back to the default binding (`true`) or fails (`false`).
    pub fn with_fallback_to_default(mut self, enabled: bool) -> Self {
        self.fallback_to_default = enabled;
        self
    }

    /// Install or replace the binding for `id` using the provider's
    /// default endpoint. The credential is not checked until first use.
    pub fn configure(&self, id: ProviderId, credential: &str) -> Result<(), GatewayError> {
        self.configure_endpoint(id, credential, None, None)
    }

    /// Like [`configure`](Self::configure), with optional endpoint and
    /// default-model overrides.
    pub fn configure_endpoint(
        &self,
        id: ProviderId,
        credential: &str,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Result<(), GatewayError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(GatewayError::MissingCredential { provider: id });
        }

        let client = OpenAiCompatibleProvider::new(id, credential.to_string(), api_base);
        let mut binding = ProviderBinding::new(id, Arc::new(client));
        if let Some(model) = default_model {
            binding = binding.with_default_model(model);
        }
        self.install(binding);
        Ok(())
    }

    /// Install a prebuilt binding. The first binding ever installed
    /// becomes the default.
    pub fn install(&self, binding: ProviderBinding) {
        let id = binding.id;
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.slots[id.slot()] = Some(binding);
        if table.default.is_none() {
            table.default = Some(id);
        }
        drop(table);
        tracing::debug!(provider = %id, "provider binding installed");
    }

    pub fn set_default(&self, id: ProviderId) -> Result<(), GatewayError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.slots[id.slot()].is_none() {
            return Err(GatewayError::ProviderNotBound { provider: id });
        }
        table.default = Some(id);
        Ok(())
    }

    pub fn default_provider(&self) -> Option<ProviderId> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default
    }

    /// Pick the binding for a request.
    ///
    /// Order: explicit provider, provider inferred from `model`, default.
    pub fn resolve(
        &self,
        explicit: Option<ProviderId>,
        model: Option<&str>,
    ) -> Result<ProviderBinding, GatewayError> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let bound = |id: ProviderId| table.slots[id.slot()].clone();

        if let Some(id) = explicit {
            if let Some(binding) = bound(id) {
                return Ok(binding);
            }
            if !self.fallback_to_default {
                return Err(GatewayError::ProviderNotBound { provider: id });
            }
            tracing::debug!(provider = %id, "requested provider not bound, falling back");
        }

        if let Some(id) = model.and_then(infer_provider) {
            if let Some(binding) = bound(id) {
                return Ok(binding);
            }
            if !self.fallback_to_default {
                return Err(GatewayError::ProviderNotBound { provider: id });
            }
            tracing::debug!(provider = %id, "inferred provider not bound, falling back");
        }

        table
            .default
            .and_then(bound)
            .ok_or(GatewayError::NoProviderConfigured)
    }

    /// Identities that currently have a binding, in slot order.
    pub fn list_available(&self) -> Vec<ProviderId> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        ProviderId::ALL
            .into_iter()
            .filter(|id| table.slots[id.slot()].is_some())
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
