//! Ollama Provider
//!
//! Local model serving via Ollama's /api/generate endpoint. No API key;
//! availability is probed through /api/tags.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Completion, CompletionRequest, LlmProvider, ProviderSettings};
use crate::types::{AtlasError, ErrorCategory, ErrorClassifier, LlmError, Result};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Ollama local provider
#[derive(Debug)]
pub struct OllamaProvider {
    api_base: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
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
            .map_err(|e| AtlasError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { api_base, client })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        debug!(model = %request.model, "sending ollama generate request");

        let start_time = Instant::now();
        let body = GenerateRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens as i64,
            },
        };

        let url = format!("{}/api/generate", self.api_base);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::Unknown
                };
                AtlasError::Llm(LlmError::with_provider(category, e.to_string(), "ollama"))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(AtlasError::Llm(ErrorClassifier::classify_http_status(
                status, &text, "ollama",
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            AtlasError::Llm(LlmError::with_provider(
                ErrorCategory::Invalid,
                format!("failed to parse response: {}", e),
                "ollama",
            ))
        })?;

        Ok(Completion {
            text: parsed.response,
            input_tokens: parsed.prompt_eval_count.unwrap_or(0),
            output_tokens: parsed.eval_count.unwrap_or(0),
            api_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.api_base);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = %resp.status(), "ollama health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "ollama unreachable");
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i64,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}
