//! Provider registry keyed by provider name
//!
//! Model references have the form `provider:model`; the registry resolves
//! the provider half and hands back the bare model name.

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{LlmError, LlmProvider, LlmResult};
use mostrador_core::config::{split_model_ref, ProvidersConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the providers that have an API key configured.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();

        match &config.anthropic.api_key {
            Some(key) => {
                let mut provider = AnthropicProvider::new(key.clone());
                if let Some(url) = &config.anthropic.base_url {
                    provider = provider.with_base_url(url.clone());
                }
                registry.insert("anthropic", Arc::new(provider));
            }
            None => warn!("ANTHROPIC_API_KEY not set; anthropic models unavailable"),
        }

        match &config.openai.api_key {
            Some(key) => {
                let mut provider = OpenAiProvider::new(key.clone());
                if let Some(url) = &config.openai.base_url {
                    provider = provider.with_base_url(url.clone());
                }
                registry.insert("openai", Arc::new(provider));
            }
            None => warn!("OPENAI_API_KEY not set; openai models unavailable"),
        }

        info!("LLM providers: {:?}", registry.names());
        registry
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.insert(name, provider);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `provider:model` to a provider and the bare model name.
    pub fn resolve(&self, model_ref: &str) -> LlmResult<(Arc<dyn LlmProvider>, String)> {
        let (provider, model) = split_model_ref(model_ref)
            .ok_or_else(|| LlmError::UnknownProvider(model_ref.to_string()))?;
        let handle = self
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| LlmError::UnknownProvider(provider.to_string()))?;
        Ok((handle, model.to_string()))
    }
}
