//! LLM Provider Abstraction
//!
//! Defines the LlmProvider trait for plain-text completion.
//! All providers return `Completion` with token usage for cost tracking.
//!
//! ## Model strings
//!
//! Models are addressed as `provider/model`, or `provider/upstream/model`
//! for aggregator providers that route to an upstream vendor. The provider
//! segment selects the HTTP client; the rest is passed through as the model
//! id.

mod circuit_breaker;
mod ollama;
mod openai;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{AtlasError, Result};

// =============================================================================
// Model References
// =============================================================================

/// A parsed model string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    /// Provider key selecting the HTTP client ("openai", "ollama", ...)
    pub provider: String,
    /// Upstream vendor for aggregator providers, when present
    pub upstream: Option<String>,
    /// Model id as the provider expects it
    pub model: String,
}

impl ModelRef {
    /// Parse `provider/model` or `provider/upstream/model`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            [provider, model] if !provider.is_empty() && !model.is_empty() => Ok(Self {
                provider: provider.to_string(),
                upstream: None,
                model: model.to_string(),
            }),
            [provider, upstream, model]
                if !provider.is_empty() && !upstream.is_empty() && !model.is_empty() =>
            {
                Ok(Self {
                    provider: provider.to_string(),
                    upstream: Some(upstream.to_string()),
                    model: model.to_string(),
                })
            }
            _ => Err(AtlasError::Config(format!(
                "invalid model string '{}': expected provider/model or provider/upstream/model",
                raw
            ))),
        }
    }

    /// Model id sent on the wire. Aggregators receive `upstream/model`.
    pub fn wire_model(&self) -> String {
        match &self.upstream {
            Some(upstream) => format!("{}/{}", upstream, self.model),
            None => self.model.clone(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.upstream {
            Some(upstream) => write!(f, "{}/{}/{}", self.provider, upstream, self.model),
            None => write!(f, "{}/{}", self.provider, self.model),
        }
    }
}

// =============================================================================
// Requests and Completions
// =============================================================================

/// One completion request as the provider sees it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model id on the wire
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Completion text with usage metrics.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// API processing time reported by the provider, when available
    pub api_ms: Option<u64>,
}

/// Shared LLM provider type for concurrent access across pipeline stages.
pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// Provider Trait
// =============================================================================

/// LLM Provider trait for text completion with usage metrics
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion. Implementations classify their own transport
    /// errors into [`crate::types::LlmError`] categories.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Provider name for logging and circuit breaker keys
    fn name(&self) -> &str;

    /// Check if the provider is available
    async fn health_check(&self) -> Result<bool>;
}

/// Settings handed to a concrete provider. No Debug impl so the key can
/// never reach logs through a stray format call.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

/// Create a provider from its key. Unknown keys are rejected so that a
/// mistyped model string fails before any request leaves the process.
pub fn create_provider(provider: &str, settings: &ProviderSettings) -> Result<SharedProvider> {
    match provider {
        "openai" | "openrouter" | "azure" => {
            Ok(Arc::new(OpenAiProvider::new(provider, settings)?))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(settings)?)),
        _ => Err(AtlasError::Config(format!(
            "Unknown provider: {}. Supported: openai, openrouter, azure, ollama",
            provider
        ))),
    }
}
