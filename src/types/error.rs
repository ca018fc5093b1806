//! Unified Error Type System
//!
//! Centralized error types for the entire pipeline.
//! Provides error classification for retry, fallback, and regeneration
//! decisions.
//!
//! ## Error Categories
//!
//! - **RateLimit**: API rate limiting (wait and retry)
//! - **InputTooLarge**: prompt + context exceed the input budget (trim and retry)
//! - **Auth**: authentication failures (fail fast)
//! - **Network**: connectivity issues (retry with backoff)
//! - **ProviderDown**: provider unavailable (fallback to next model)
//! - **Invalid**: response failed validation (re-prompt)
//!
//! ## Design Principles
//!
//! - Single unified error type (AtlasError) for the entire application
//! - Structured error variants with context for better debugging
//! - Category-based routing for retry and fallback decisions
//! - No panic/unwrap - all errors are recoverable

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Unified error categories for retry and fallback routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry same model
    RateLimit,
    /// Input exceeds the token budget - trim context or fallback
    InputTooLarge,
    /// Authentication failed - fail fast, don't retry
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Provider unavailable - fallback to next model
    ProviderDown,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Response failed validation - re-prompt
    Invalid,
    /// Temporary server issues - retry same model
    Transient,
    /// Unknown error - conservative retry
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::InputTooLarge => write!(f, "INPUT_TOO_LARGE"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::ProviderDown => write!(f, "PROVIDER_DOWN"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::Invalid => write!(f, "INVALID"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is retryable on the same model
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::Invalid
        )
    }

    /// Check if this category should trigger fallback to the next model
    pub fn should_fallback(&self) -> bool {
        matches!(self, Self::InputTooLarge | Self::ProviderDown)
    }

    /// Check if this category halts the branch immediately
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth | Self::BadRequest)
    }

    /// Get recommended retry delay for this category
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(30),
            Self::Network => Duration::from_secs(5),
            Self::Transient => Duration::from_secs(2),
            Self::Invalid => Duration::from_secs(1),
            _ => Duration::from_millis(500),
        }
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// Unified LLM error with category, context, and retry hints
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// Suggested wait time before retry (if applicable)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    /// Create a new LLM error
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    /// Create error with provider context
    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    /// Add provider context to existing error
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Check if error is retryable on the same model
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Check if error should trigger fallback to the next model
    pub fn should_fallback(&self) -> bool {
        self.category.should_fallback()
    }

    /// Get recommended retry delay
    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.category.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Error classifier for intelligent error routing
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        // Rate limiting patterns
        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        // Token/context limit patterns
        if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
            || lower.contains("context too long")
            || lower.contains("too large")
        {
            return LlmError::with_provider(ErrorCategory::InputTooLarge, message, provider);
        }

        // Authentication patterns
        if lower.contains("auth")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("invalid key")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        // Network patterns
        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider)
                .retry_after(Duration::from_secs(5));
        }

        // Provider unavailable patterns
        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("service unavailable")
            || lower.contains("not found")
            || lower.contains("model unavailable")
        {
            return LlmError::with_provider(ErrorCategory::ProviderDown, message, provider);
        }

        // Transient server-side patterns
        if lower.contains("500")
            || lower.contains("internal error")
            || lower.contains("server error")
            || lower.contains("temporary")
            || lower.contains("overloaded")
        {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(2));
        }

        // Bad request patterns
        if lower.contains("400")
            || lower.contains("bad request")
            || lower.contains("malformed")
        {
            return LlmError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        // Validation patterns
        if lower.contains("parse") || lower.contains("json") || lower.contains("unexpected token") {
            return LlmError::with_provider(ErrorCategory::Invalid, message, provider)
                .retry_after(Duration::from_secs(1));
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        match status {
            429 => LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => LlmError::with_provider(ErrorCategory::Auth, message, provider),
            400 => LlmError::with_provider(ErrorCategory::BadRequest, message, provider),
            413 => LlmError::with_provider(ErrorCategory::InputTooLarge, message, provider),
            // 500 series are transient - can retry
            500 | 502 | 504 => LlmError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(5)),
            503 => LlmError::with_provider(ErrorCategory::ProviderDown, message, provider),
            404 => LlmError::with_provider(ErrorCategory::ProviderDown, message, provider),
            _ => LlmError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // LLM Errors
    // -------------------------------------------------------------------------
    /// Structured LLM error with category and retry hints
    #[error("LLM error: {0}")]
    Llm(LlmError),

    // -------------------------------------------------------------------------
    // Flow Errors
    // -------------------------------------------------------------------------
    /// Node lifecycle error with recovery context
    #[error("Node '{node}' failed: {message}")]
    Node {
        node: String,
        message: String,
        recoverable: bool,
    },

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Flow cancelled cooperatively
    #[error("Flow cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Git {operation} failed: {message}")]
    Git { operation: String, message: String },

    #[error("Repository error: {0}")]
    Repo(String),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Assembly error: {0}")]
    Assembly(String),
}

impl From<LlmError> for AtlasError {
    fn from(err: LlmError) -> Self {
        AtlasError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl AtlasError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a node error
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            recoverable: false,
        }
    }

    /// Create a recoverable node error
    pub fn node_recoverable(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            recoverable: true,
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an LLM error with category
    pub fn llm(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Llm(LlmError::new(category, message))
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable(),
            Self::Node { recoverable, .. } => *recoverable,
            Self::Timeout { .. } => true,
            Self::Git { .. } => true,
            _ => false,
        }
    }

    /// Check if this error should trigger fallback to another model
    pub fn should_fallback(&self) -> bool {
        match self {
            Self::Llm(e) => e.should_fallback(),
            _ => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::InputTooLarge.to_string(), "INPUT_TOO_LARGE");
        assert_eq!(ErrorCategory::Auth.to_string(), "AUTH");
    }

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::Invalid.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::BadRequest.is_retryable());
    }

    #[test]
    fn test_error_category_fallback() {
        assert!(ErrorCategory::InputTooLarge.should_fallback());
        assert!(ErrorCategory::ProviderDown.should_fallback());
        assert!(!ErrorCategory::RateLimit.should_fallback());
        assert!(!ErrorCategory::Auth.should_fallback());
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = ErrorClassifier::classify("Rate limit exceeded, please retry", "openai");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.is_retryable());
        assert!(!err.should_fallback());
    }

    #[test]
    fn test_classify_input_too_large() {
        let err = ErrorClassifier::classify("Token limit exceeded: 150000 > 128000", "openai");
        assert_eq!(err.category, ErrorCategory::InputTooLarge);
        assert!(!err.is_retryable());
        assert!(err.should_fallback());
    }

    #[test]
    fn test_classify_auth() {
        let err = ErrorClassifier::classify("Invalid API key provided", "openai");
        assert_eq!(err.category, ErrorCategory::Auth);
        assert!(!err.is_retryable());
        assert!(!err.should_fallback());
        assert!(err.category.is_fatal());
    }

    #[test]
    fn test_classify_network() {
        let err = ErrorClassifier::classify("Connection timed out after 30s", "ollama");
        assert_eq!(err.category, ErrorCategory::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_provider_down() {
        let err = ErrorClassifier::classify("Service unavailable (503)", "openai");
        assert_eq!(err.category, ErrorCategory::ProviderDown);
        assert!(err.should_fallback());
    }

    #[test]
    fn test_classify_http_status() {
        let rate_limit = ErrorClassifier::classify_http_status(429, "Rate limited", "test");
        assert_eq!(rate_limit.category, ErrorCategory::RateLimit);

        let auth = ErrorClassifier::classify_http_status(401, "Unauthorized", "test");
        assert_eq!(auth.category, ErrorCategory::Auth);

        let server_error = ErrorClassifier::classify_http_status(500, "Server error", "test");
        assert_eq!(server_error.category, ErrorCategory::Transient);

        let oversize = ErrorClassifier::classify_http_status(413, "Payload too large", "test");
        assert_eq!(oversize.category, ErrorCategory::InputTooLarge);
    }

    #[test]
    fn test_recommended_delay() {
        let rate_limit = LlmError::new(ErrorCategory::RateLimit, "test");
        assert!(rate_limit.recommended_delay() >= Duration::from_secs(30));

        let custom =
            LlmError::new(ErrorCategory::Unknown, "test").retry_after(Duration::from_secs(100));
        assert_eq!(custom.recommended_delay(), Duration::from_secs(100));
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::RateLimit, "Too many requests", "openai");
        assert_eq!(err.to_string(), "[openai:RATE_LIMIT] Too many requests");
    }

    #[test]
    fn test_atlas_error_recoverable() {
        assert!(AtlasError::node_recoverable("gen", "retry me").is_recoverable());
        assert!(!AtlasError::node("gen", "broken").is_recoverable());
        assert!(AtlasError::timeout("clone", Duration::from_secs(1)).is_recoverable());
        assert!(!AtlasError::Config("bad".into()).is_recoverable());
    }
}
