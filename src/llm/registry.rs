//! Provider registry: resolves model bindings to clients.
//!
//! The registry is the explicitly passed context object that owns provider
//! credentials and rate-limit state. Clients are built lazily from
//! [`Settings`] the first time a provider is needed; tests register mock
//! clients up front instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use super::anthropic::{AnthropicClient, AnthropicConfig};
use super::binding::ModelBinding;
use super::client::{LlmClient, LlmError};
use super::openai::{OpenAiClient, OpenAiConfig};
use super::retry::{RateLimitState, RetryPolicy, complete_with_retry};
use super::types::{CompletionRequest, CompletionResponse};
use crate::config::Settings;

/// Resolves providers to clients and tracks per-provider rate limits
pub struct ProviderRegistry {
    settings: Settings,
    clients: RwLock<HashMap<String, Arc<dyn LlmClient>>>,
    rate_limits: Mutex<HashMap<String, Arc<Mutex<RateLimitState>>>>,
}

impl ProviderRegistry {
    /// Registry that builds HTTP clients from settings on demand
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            clients: RwLock::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the client for a provider
    pub fn register(&self, provider: impl Into<String>, client: Arc<dyn LlmClient>) {
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(provider.into(), client);
        }
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_client(self, provider: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.register(provider, client);
        self
    }

    /// Client serving a binding's provider, built on first use
    pub fn client_for(&self, binding: &ModelBinding) -> Result<Arc<dyn LlmClient>, LlmError> {
        if let Some(client) = self
            .clients
            .read()
            .ok()
            .and_then(|c| c.get(&binding.provider).cloned())
        {
            return Ok(client);
        }

        let client = self.build_client(&binding.provider)?;
        if let Ok(mut clients) = self.clients.write() {
            let entry = clients
                .entry(binding.provider.clone())
                .or_insert_with(|| client.clone());
            return Ok(entry.clone());
        }
        Ok(client)
    }

    /// Shared rate-limit state for a provider
    pub fn rate_limit_for(&self, provider: &str) -> Arc<Mutex<RateLimitState>> {
        match self.rate_limits.lock() {
            Ok(mut limits) => limits.entry(provider.to_string()).or_default().clone(),
            Err(_) => Arc::new(Mutex::new(RateLimitState::new())),
        }
    }

    /// Run one completion against a binding with bounded retries
    pub async fn complete(
        &self,
        binding: &ModelBinding,
        mut request: CompletionRequest,
        policy: &RetryPolicy,
    ) -> Result<CompletionResponse, LlmError> {
        let client = self.client_for(binding)?;
        let rate_limit = self.rate_limit_for(&binding.provider);
        request.model = binding.model.clone();
        complete_with_retry(client.as_ref(), &request, policy, &rate_limit).await
    }

    fn build_client(&self, provider: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        let provider_settings = self
            .settings
            .providers
            .get(provider)
            .ok_or_else(|| LlmError::UnknownProvider(provider.to_string()))?;

        let api_key = match &provider_settings.api_key_env {
            Some(env_var) => Some(std::env::var(env_var).map_err(|_| LlmError::MissingApiKey {
                env_var: env_var.clone(),
            })?),
            None => None,
        };

        let timeout = Duration::from_millis(self.settings.llm.timeout_ms);
        log::debug!("Building client for provider {}", provider);

        if provider == "anthropic" {
            let key = api_key.unwrap_or_default();
            let config = AnthropicConfig {
                base_url: provider_settings.base_url.clone(),
                timeout,
                ..Default::default()
            };
            return Ok(Arc::new(AnthropicClient::with_api_key(key, config)?));
        }

        let config = OpenAiConfig::new(provider, &provider_settings.base_url).with_timeout(timeout);
        Ok(Arc::new(OpenAiClient::new(api_key, config)?))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<String> = self
            .clients
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ProviderRegistry")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_registered_client_is_used() {
        let mock = Arc::new(MockLlmClient::new().with_reply("buyer", "hello"));
        let registry = ProviderRegistry::new(Settings::default()).with_client("mock", mock.clone());

        let binding = ModelBinding::new("mock", "buyer");
        let response = registry
            .complete(&binding, CompletionRequest::default(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(mock.calls()[0].model, "buyer");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new(Settings::default());
        let result = registry.client_for(&ModelBinding::new("nowhere", "m"));
        assert!(matches!(result, Err(LlmError::UnknownProvider(_))));
    }

    #[test]
    fn test_missing_api_key() {
        let mut settings = Settings::default();
        settings.providers.insert(
            "custom".to_string(),
            ProviderSettings {
                base_url: "http://localhost:1".to_string(),
                api_key_env: Some("MARBLE_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            },
        );
        let registry = ProviderRegistry::new(settings);
        let result = registry.client_for(&ModelBinding::new("custom", "m"));
        assert!(matches!(result, Err(LlmError::MissingApiKey { .. })));
    }

    #[test]
    fn test_keyless_provider_builds() {
        let registry = ProviderRegistry::new(Settings::default());
        let client = registry.client_for(&ModelBinding::new("ollama", "llama3")).unwrap();
        assert_eq!(client.provider(), "ollama");
    }

    #[test]
    fn test_rate_limit_state_is_shared_per_provider() {
        let registry = ProviderRegistry::new(Settings::default());
        let a = registry.rate_limit_for("openai");
        let b = registry.rate_limit_for("openai");
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.rate_limit_for("deepseek");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
