//! OpenAI-Compatible Provider
//!
//! Chat Completions client covering OpenAI itself plus aggregators (Azure,
//! OpenRouter) that speak the same protocol behind a different base URL.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Completion, CompletionRequest, LlmProvider, ProviderSettings};
use crate::types::{AtlasError, ErrorCategory, ErrorClassifier, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// OpenAI-compatible provider with secure API key handling
pub struct OpenAiProvider {
    name: String,
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(name: &str, settings: &ProviderSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                AtlasError::Llm(LlmError::with_provider(
                    ErrorCategory::Auth,
                    "API key not found. Set CODEATLAS_LLM_API_KEY or provide llm.api_key",
                    name,
                ))
            })?;

        let api_base = settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let timeout = if settings.timeout_secs > 0 {
            settings.timeout_secs
        } else {
            DEFAULT_TIMEOUT_SECS
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| {
                AtlasError::Config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            name: name.to_string(),
            api_key: SecretString::from(api_key),
            api_base,
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        debug!(
            provider = %self.name,
            model = %request.model,
            temperature = request.temperature,
            "sending chat completion request"
        );

        let start_time = Instant::now();
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(request.prompt.clone()),
            }],
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
        };

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::Unknown
                };
                AtlasError::Llm(LlmError::with_provider(category, e.to_string(), &self.name))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(AtlasError::Llm(ErrorClassifier::classify_http_status(
                status, &text, &self.name,
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            AtlasError::Llm(LlmError::with_provider(
                ErrorCategory::Invalid,
                format!("failed to parse response: {}", e),
                &self.name,
            ))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                AtlasError::Llm(LlmError::with_provider(
                    ErrorCategory::Invalid,
                    "no content in response",
                    &self.name,
                ))
            })?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            api_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.api_base);
        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(provider = %self.name, status = %resp.status(), "health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(provider = %self.name, error = %e, "health check failed");
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
