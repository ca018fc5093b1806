//! LLM Call Layer
//!
//! Provider-agnostic text generation behind a single entry point,
//! [`LlmClient::generate`]. Responsibilities, in order:
//!
//! 1. Build the full prompt (task instruction + language directive + context)
//! 2. Token budgeting: trim context from the tail to fit `max_input_tokens`
//! 3. Cache lookup by stable content hash
//! 4. Model selection: per-node override → task preference → global model
//! 5. Invoke the provider under the global concurrency bound
//! 6. Retry transient failures with exponential backoff and jitter
//! 7. Walk the fallback chain after the primary exhausts its retries
//! 8. Validate the response shape
//! 9. Store in the cache on success
//! 10. Return text plus call metadata

mod cache;
pub mod provider;
mod tokenizer;
mod validate;

pub use cache::{CacheEntry, CacheEntryMetadata, LlmCache};
pub use provider::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Completion, CompletionRequest,
    LlmProvider, ModelRef, OllamaProvider, OpenAiProvider, ProviderSettings, SharedProvider,
    create_provider,
};
pub use tokenizer::{TokenCounter, TokenEstimator};
pub use validate::{ExpectedShape, extract_json_payload, validate_response};

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::constants;
use crate::types::{AtlasError, ErrorCategory, LlmError, Result};

// =============================================================================
// Task Types
// =============================================================================

/// What kind of work a call performs; selects instruction, temperature,
/// and preferred models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskType {
    /// Derive core modules and an architecture summary from structure
    UnderstandCode,
    /// Condense history or analysis artifacts into prose
    Summarize,
    /// Produce a documentation section
    #[default]
    GenerateContent,
    /// Score generated content against quality dimensions
    EvaluateQuality,
    /// Repair an invalid Mermaid chart
    FixMermaid,
}

impl TaskType {
    /// Stable key used in configuration (`llm.task_models`)
    pub fn key(&self) -> &'static str {
        match self {
            Self::UnderstandCode => "understand_code",
            Self::Summarize => "summarize",
            Self::GenerateContent => "generate_content",
            Self::EvaluateQuality => "evaluate_quality",
            Self::FixMermaid => "fix_mermaid",
        }
    }

    /// Analytical tasks run cold, creative tasks run warm.
    pub fn default_temperature(&self) -> f32 {
        match self {
            Self::GenerateContent => constants::llm::CREATIVE_TEMPERATURE,
            _ => constants::llm::ANALYTICAL_TEMPERATURE,
        }
    }

    /// Instruction prepended to every prompt of this task type.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::UnderstandCode => {
                "You are analyzing a codebase. Identify its core modules and describe \
                 the overall architecture."
            }
            Self::Summarize => {
                "Summarize the following material faithfully and concisely."
            }
            Self::GenerateContent => {
                "You are writing technical documentation for a codebase. Produce \
                 well-structured Markdown."
            }
            Self::EvaluateQuality => {
                "You are reviewing generated documentation. Score it on the requested \
                 dimensions and justify each score briefly."
            }
            Self::FixMermaid => {
                "You are repairing an invalid Mermaid diagram. Return only the corrected \
                 diagram inside a ```mermaid fence."
            }
        }
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Supporting material inlined below the prompt; trimmed to budget
    pub context: Option<String>,
    pub task_type: TaskType,
    /// Node name used for per-node model overrides
    pub node_name: Option<String>,
    /// Require a JSON payload in the response
    pub expect_json: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn task(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn for_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// Call metadata returned alongside the text.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GenerationMeta {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    /// Total attempts across retries and fallbacks; 0 for cache hits
    pub attempt: u32,
    pub from_cache: bool,
    pub fallback_used: bool,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub meta: GenerationMeta,
}

/// Run-wide token accounting for the report.
#[derive(Debug, Default, serde::Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub cache_hits: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    /// Rough blended cost estimate; providers do not return real cost.
    pub fn estimated_cost_usd(&self) -> f64 {
        const INPUT_PER_1K: f64 = 0.0025;
        const OUTPUT_PER_1K: f64 = 0.01;
        (self.input_tokens as f64 / 1000.0) * INPUT_PER_1K
            + (self.output_tokens as f64 / 1000.0) * OUTPUT_PER_1K
    }
}

// =============================================================================
// Client
// =============================================================================

/// Process-wide LLM client: one instance per run, shared by every node.
pub struct LlmClient {
    config: Arc<Config>,
    cache: LlmCache,
    providers: DashMap<String, SharedProvider>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    /// Global bound on in-flight provider calls
    semaphore: Arc<Semaphore>,
    counter: TokenCounter,
    calls: AtomicU64,
    cache_hits: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl LlmClient {
    pub fn new(config: Arc<Config>) -> Self {
        let cache = LlmCache::new(
            &config.llm.cache_dir,
            config.llm.cache_ttl_secs,
            config.llm.cache_enabled,
        );
        let semaphore = Arc::new(Semaphore::new(config.general.max_concurrent_llm_calls));
        Self {
            config,
            cache,
            providers: DashMap::new(),
            breakers: DashMap::new(),
            semaphore,
            counter: TokenCounter::default(),
            calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Register a pre-built provider under a key. Used for local providers
    /// and for stubbing in tests; later lookups for the key skip creation.
    pub fn register_provider(&self, key: impl Into<String>, provider: SharedProvider) {
        self.providers.insert(key.into(), provider);
    }

    /// Token usage accumulated over the run.
    pub fn usage(&self) -> UsageTotals {
        UsageTotals {
            calls: self.calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }

    /// Ordered model candidates for a request: primary first, then the
    /// fallback chain (task preference list minus the primary).
    fn model_candidates(&self, request: &GenerateRequest) -> Vec<String> {
        let task_list = self
            .config
            .llm
            .task_models
            .get(request.task_type.key())
            .cloned()
            .unwrap_or_default();

        let primary = match &request.node_name {
            Some(node) => self.config.model_for_node(node),
            None => task_list
                .first()
                .cloned()
                .unwrap_or_else(|| self.config.llm.model.clone()),
        };

        let mut candidates = vec![primary.clone()];
        for model in task_list {
            if model != primary {
                candidates.push(model);
            }
        }
        candidates
    }

    fn provider_for(&self, model: &ModelRef) -> Result<SharedProvider> {
        if let Some(existing) = self.providers.get(&model.provider) {
            return Ok(existing.clone());
        }

        let settings = ProviderSettings {
            api_key: self.config.llm.api_key.clone(),
            base_url: self.config.llm.base_url.clone(),
            timeout_secs: 0,
        };
        let provider = create_provider(&model.provider, &settings)?;
        self.providers
            .insert(model.provider.clone(), provider.clone());
        Ok(provider)
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_defaults(provider)))
            .clone()
    }

    /// Build the full prompt and trim the context to the input budget.
    fn build_prompt(&self, request: &GenerateRequest) -> Result<String> {
        let language = &self.config.general.target_language;
        let directive = format!(
            "Respond in {}; preserve code identifiers verbatim.",
            language
        );
        let fixed = format!(
            "{}\n\n{}\n\n{}",
            request.task_type.instruction(),
            request.prompt,
            directive
        );

        let full = match &request.context {
            Some(context) => {
                let trimmed = self
                    .counter
                    .trim_context_to_fit(&fixed, context, self.config.llm.max_input_tokens)
                    .ok_or_else(|| {
                        AtlasError::Llm(LlmError::new(
                            ErrorCategory::InputTooLarge,
                            format!(
                                "prompt alone exceeds max_input_tokens ({})",
                                self.config.llm.max_input_tokens
                            ),
                        ))
                    })?;
                if trimmed.is_empty() {
                    fixed
                } else {
                    format!("{}\n\n---\n\n{}", fixed, trimmed)
                }
            }
            None => {
                if !self
                    .counter
                    .fits_budget(&fixed, self.config.llm.max_input_tokens)
                {
                    return Err(AtlasError::Llm(LlmError::new(
                        ErrorCategory::InputTooLarge,
                        format!(
                            "prompt exceeds max_input_tokens ({})",
                            self.config.llm.max_input_tokens
                        ),
                    )));
                }
                fixed
            }
        };

        Ok(full)
    }

    fn temperature_for(&self, task_type: TaskType) -> f32 {
        self.config
            .llm
            .temperature
            .unwrap_or_else(|| task_type.default_temperature())
    }

    fn backoff_delay(&self, attempt: u32, error: &LlmError) -> Duration {
        let base = Duration::from_millis(constants::llm::BASE_DELAY_MS);
        let factor = constants::llm::BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
        let computed = base.mul_f32(factor);
        let capped = computed.min(Duration::from_secs(constants::llm::MAX_DELAY_SECS));
        let chosen = capped.max(error.recommended_delay());
        let jitter = rand::thread_rng().gen_range(0..250);
        chosen + Duration::from_millis(jitter)
    }

    /// The single entry point. See the module docs for the step order.
    #[instrument(skip(self, request), fields(task = request.task_type.key()))]
    pub async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let candidates = self.model_candidates(&request);
        let full_prompt = self.build_prompt(&request)?;
        let temperature = self.temperature_for(request.task_type);
        let max_tokens = self.config.llm.max_tokens;

        // Cache lookup keys on the primary model; fallback responses are
        // cached under the same key so reruns stay stable.
        let cache_key = LlmCache::key(&full_prompt, &candidates[0], temperature, max_tokens);
        if let Some(entry) = self.cache.get(&cache_key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Generation {
                text: entry.response,
                meta: GenerationMeta {
                    provider: entry.metadata.provider,
                    model: entry.metadata.model,
                    input_tokens: entry.metadata.input_tokens,
                    output_tokens: entry.metadata.output_tokens,
                    latency_ms: 0,
                    attempt: 0,
                    from_cache: true,
                    fallback_used: false,
                },
            });
        }

        let shape = if request.expect_json {
            ExpectedShape::Json
        } else {
            ExpectedShape::Text
        };

        let mut attempt: u32 = 0;
        let mut last_error: Option<AtlasError> = None;

        'models: for (model_index, raw_model) in candidates.iter().enumerate() {
            let model = match ModelRef::parse(raw_model) {
                Ok(model) => model,
                Err(err) => {
                    warn!(model = %raw_model, error = %err, "skipping unparseable model");
                    last_error = Some(err);
                    continue;
                }
            };

            let provider = match self.provider_for(&model) {
                Ok(provider) => provider,
                Err(err) => {
                    warn!(model = %raw_model, error = %err, "provider unavailable");
                    last_error = Some(err);
                    continue;
                }
            };
            let breaker = self.breaker_for(&model.provider);

            let mut model_attempts: u8 = 0;
            while model_attempts < self.config.llm.retry_count {
                if attempt as usize >= constants::llm::MAX_TOTAL_ATTEMPTS {
                    break 'models;
                }

                if !breaker.allow_request() {
                    debug!(provider = %model.provider, "circuit open, falling back");
                    last_error = Some(AtlasError::Llm(LlmError::with_provider(
                        ErrorCategory::ProviderDown,
                        "circuit breaker open",
                        &model.provider,
                    )));
                    continue 'models;
                }

                attempt += 1;
                model_attempts += 1;

                let completion_request = CompletionRequest {
                    model: model.wire_model(),
                    prompt: full_prompt.clone(),
                    temperature,
                    max_tokens,
                };

                let started = Instant::now();
                let outcome = {
                    let _permit = self
                        .semaphore
                        .acquire()
                        .await
                        .expect("llm semaphore never closed");
                    self.calls.fetch_add(1, Ordering::Relaxed);
                    provider.complete(&completion_request).await
                };
                let latency_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(completion) => {
                        if let Err(invalid) = validate_response(&completion.text, shape) {
                            warn!(
                                model = %raw_model,
                                attempt,
                                error = %invalid,
                                "response failed validation, re-prompting"
                            );
                            last_error = Some(AtlasError::Llm(invalid));
                            continue;
                        }

                        breaker.record_success();
                        self.input_tokens
                            .fetch_add(completion.input_tokens as u64, Ordering::Relaxed);
                        self.output_tokens
                            .fetch_add(completion.output_tokens as u64, Ordering::Relaxed);

                        self.cache
                            .put(
                                &cache_key,
                                &completion.text,
                                CacheEntryMetadata {
                                    provider: model.provider.clone(),
                                    model: raw_model.clone(),
                                    input_tokens: completion.input_tokens,
                                    output_tokens: completion.output_tokens,
                                },
                            )
                            .await;

                        info!(
                            model = %raw_model,
                            attempt,
                            latency_ms,
                            "generation succeeded"
                        );
                        return Ok(Generation {
                            text: completion.text,
                            meta: GenerationMeta {
                                provider: model.provider.clone(),
                                model: raw_model.clone(),
                                input_tokens: completion.input_tokens,
                                output_tokens: completion.output_tokens,
                                latency_ms,
                                attempt,
                                from_cache: false,
                                fallback_used: model_index > 0,
                            },
                        });
                    }
                    Err(AtlasError::Llm(llm_err)) => {
                        if llm_err.category != ErrorCategory::Invalid {
                            breaker.record_failure();
                        }

                        if llm_err.category.is_fatal() {
                            return Err(AtlasError::Llm(llm_err));
                        }

                        if llm_err.should_fallback() {
                            warn!(
                                model = %raw_model,
                                error = %llm_err,
                                "falling back to next model"
                            );
                            last_error = Some(AtlasError::Llm(llm_err));
                            continue 'models;
                        }

                        let delay = self.backoff_delay(model_attempts as u32, &llm_err);
                        warn!(
                            model = %raw_model,
                            attempt,
                            error = %llm_err,
                            "transient failure, retrying in {:?}",
                            delay
                        );
                        last_error = Some(AtlasError::Llm(llm_err));
                        tokio::time::sleep(delay).await;
                    }
                    Err(other) => {
                        breaker.record_failure();
                        last_error = Some(other);
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AtlasError::Llm(LlmError::new(
                ErrorCategory::Unknown,
                "all model candidates exhausted",
            ))
        }))
    }
}

// =============================================================================
// Test Stub
// =============================================================================
