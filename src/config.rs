//! Configuration management for chatgate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gateway::RequestDefaults;
use crate::llm::registry::{ProviderId, ProviderRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider used when neither the request nor the model name picks one.
    /// Defaults to the first provider with a credential.
    #[serde(default)]
    pub default_provider: Option<ProviderId>,
    /// Serve requests for an unconfigured provider with the default one
    #[serde(default = "bool_true")]
    pub fallback_to_default: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn bool_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            fallback_to_default: true,
            max_tokens: Some(4096),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key; the provider's standard one when unset
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Default model for this provider
    #[serde(default)]
    pub model: Option<String>,
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".chatgate").join("config.toml"))
    }

    /// Load the user config (or defaults when absent) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Self::default()
        };

        if let Ok(provider) = std::env::var("CHATGATE_DEFAULT_PROVIDER") {
            let provider = provider
                .parse::<ProviderId>()
                .map_err(anyhow::Error::msg)
                .context("Invalid CHATGATE_DEFAULT_PROVIDER")?;
            config.gateway.default_provider = Some(provider);
        }

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// The credential for `id`: the configured key, else its environment variable.
    pub fn api_key(&self, id: ProviderId) -> Option<String> {
        let provider = self.providers.get(&id);
        if let Some(key) = provider.and_then(|p| p.api_key.as_deref()) {
            if !key.trim().is_empty() {
                return Some(key.to_string());
            }
        }
        let env = provider
            .and_then(|p| p.api_key_env.as_deref())
            .unwrap_or(id.api_key_env());
        std::env::var(env).ok().filter(|key| !key.trim().is_empty())
    }

    /// Configure a binding for every provider that has a credential.
    pub fn build_registry(&self) -> Result<ProviderRegistry> {
        let registry =
            ProviderRegistry::new().with_fallback_to_default(self.gateway.fallback_to_default);

        for id in ProviderId::ALL {
            let Some(key) = self.api_key(id) else {
                continue;
            };
            let provider = self.providers.get(&id).cloned().unwrap_or_default();
            registry
                .configure_endpoint(id, &key, provider.api_base, provider.model)
                .with_context(|| format!("Failed to configure provider {}", id))?;
        }

        if let Some(id) = self.gateway.default_provider {
            registry.set_default(id).with_context(|| {
                format!(
                    "Default provider '{}' has no API key. Set it in {} or export {}",
                    id,
                    Self::config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    id.api_key_env()
                )
            })?;
        }

        Ok(registry)
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            temperature: self.gateway.temperature,
            max_tokens: self.gateway.max_tokens,
        }
    }

    pub fn save_default() -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let mut default = Self::default();
        for id in ProviderId::ALL {
            default.providers.insert(
                id,
                ProviderConfig {
                    api_key_env: Some(id.api_key_env().to_string()),
                    model: Some(id.default_model().to_string()),
                    ..ProviderConfig::default()
                },
            );
        }
        let content = toml::to_string_pretty(&default).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        Ok(config_path)
    }
}
