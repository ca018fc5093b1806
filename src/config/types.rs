//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/codeatlas/) and project (.codeatlas/) level
//! configuration plus `CODEATLAS_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::constants;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Run-wide settings
    pub general: GeneralConfig,

    /// LLM call layer settings
    pub llm: LlmConfig,

    /// Repository fetch settings
    pub repo: RepoConfig,

    /// Source parsing settings
    pub parse: ParseConfig,

    /// Content quality gate settings
    pub quality: QualityConfig,

    /// Mermaid validation settings
    pub mermaid: MermaidConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            general: GeneralConfig::default(),
            llm: LlmConfig::default(),
            repo: RepoConfig::default(),
            parse: ParseConfig::default(),
            quality: QualityConfig::default(),
            mermaid: MermaidConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `AtlasError::Config` on validation failure.
    pub fn validate(&self) -> crate::types::Result<()> {
        if let Some(temperature) = self.llm.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(crate::types::AtlasError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }

        if self.llm.max_tokens == 0 {
            return Err(crate::types::AtlasError::Config(
                "LLM max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.llm.max_input_tokens == 0 {
            return Err(crate::types::AtlasError::Config(
                "LLM max_input_tokens must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.quality.overall_threshold) {
            return Err(crate::types::AtlasError::Config(format!(
                "quality overall_threshold must be in [0, 1], got {}",
                self.quality.overall_threshold
            )));
        }

        for (section, generator) in &self.quality.generators {
            if let Some(threshold) = generator.overall_threshold
                && !(0.0..=1.0).contains(&threshold)
            {
                return Err(crate::types::AtlasError::Config(format!(
                    "quality.generators.{} overall_threshold must be in [0, 1], got {}",
                    section, threshold
                )));
            }
        }

        if self.general.max_workers == 0 || self.general.max_concurrent_llm_calls == 0 {
            return Err(crate::types::AtlasError::Config(
                "max_workers and max_concurrent_llm_calls must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the model for a node: per-node override first (config, then
    /// `CODEATLAS_MODEL_<NODE>` process variable), else the global model.
    pub fn model_for_node(&self, node_name: &str) -> String {
        if let Some(model) = self.llm.node_models.get(node_name) {
            return model.clone();
        }
        let env_key = format!("CODEATLAS_MODEL_{}", node_name.to_uppercase());
        if let Ok(model) = std::env::var(&env_key)
            && !model.is_empty()
        {
            return model;
        }
        self.llm.model.clone()
    }
}

// =============================================================================
// General Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// ISO short code for generated prose ("en", "zh", ...)
    pub target_language: String,

    /// Root directory for the generated documentation tree
    pub output_dir: PathBuf,

    /// Whether fan-out stages run on the parallel runner
    pub parallel_enabled: bool,

    /// Worker pool width for parallel stages
    pub max_workers: usize,

    /// Global bound on concurrent LLM calls
    pub max_concurrent_llm_calls: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            output_dir: PathBuf::from("docs"),
            parallel_enabled: true,
            max_workers: constants::flow::MAX_WORKERS,
            max_concurrent_llm_calls: constants::flow::MAX_CONCURRENT_LLM_CALLS,
        }
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model string: `provider/model` or `provider/upstream/model`
    pub model: String,

    /// API key. Never serialized back out; usually supplied via
    /// `CODEATLAS_LLM_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Unified base URL override for the selected provider
    pub base_url: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: usize,

    /// Input budget; oversize context is trimmed from the tail
    pub max_input_tokens: usize,

    /// Sampling temperature override; task-type defaults apply when unset
    pub temperature: Option<f32>,

    /// Retries per model before the fallback chain advances
    pub retry_count: u8,

    /// Whether the on-disk response cache is consulted
    pub cache_enabled: bool,

    /// Cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Cache root; LLM entries live under `<cache_dir>/llm/`
    pub cache_dir: PathBuf,

    /// Per-node model overrides: node name -> model string
    pub node_models: BTreeMap<String, String>,

    /// Per-task preferred models: task key -> ordered candidates.
    /// The first entry is the task's primary; the rest form the fallback
    /// chain tried after the primary exhausts its retries.
    pub task_models: BTreeMap<String, Vec<String>>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            max_input_tokens: 24_000,
            temperature: None,
            retry_count: constants::llm::DEFAULT_RETRY_COUNT,
            cache_enabled: true,
            cache_ttl_secs: constants::cache::LLM_TTL_SECS,
            cache_dir: PathBuf::from(".cache/codeatlas"),
            node_models: BTreeMap::new(),
            task_models: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Repository Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Branch cloned when the source does not pin one
    pub default_branch: String,

    /// Clone cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Skip the clone cache entirely
    pub force_clone: bool,

    /// Maximum commits read from history
    pub max_commits: usize,

    /// Abort when the working tree exceeds this many bytes
    pub max_repo_size: u64,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            cache_ttl_secs: constants::cache::REPO_TTL_SECS,
            force_clone: false,
            max_commits: constants::repo::MAX_COMMITS,
            max_repo_size: constants::repo::MAX_REPO_SIZE,
        }
    }
}

// =============================================================================
// Parse Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Glob patterns excluded from the walk (in addition to .gitignore)
    pub ignore_patterns: Vec<String>,

    /// Extensions treated as binary without sniffing
    pub binary_extensions: Vec<String>,

    /// Maximum files scanned
    pub max_files: usize,

    /// Files per parse batch
    pub batch_size: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![
                "node_modules".to_string(),
                "target".to_string(),
                ".git".to_string(),
                "dist".to_string(),
                "build".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
            ],
            binary_extensions: vec![
                "png", "jpg", "jpeg", "gif", "ico", "pdf", "zip", "tar", "gz", "exe", "dll", "so",
                "dylib", "class", "pyc", "woff", "woff2", "ttf", "eot", "mp3", "mp4", "wasm",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_files: constants::parse::MAX_FILES,
            batch_size: constants::parse::BATCH_SIZE,
        }
    }
}

// =============================================================================
// Quality Configuration
// =============================================================================

/// Per-generator overrides, keyed by section under `[quality.generators]`.
/// Unset fields fall back to the global knobs; the model third of the triad
/// lives in `llm.node_models`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Section-specific quality threshold in [0, 1]
    pub overall_threshold: Option<f32>,

    /// Section-specific cap on regeneration attempts
    pub max_regeneration_attempts: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Weighted-mean score below which regeneration kicks in
    pub overall_threshold: f32,

    /// Whether failing sections are regenerated with critique guidance
    pub auto_regenerate: bool,

    /// Cap on regeneration attempts per section
    pub max_regeneration_attempts: u8,

    /// Optional per-dimension floors: dimension name -> minimum score in [0, 1]
    pub dimension_thresholds: BTreeMap<String, f32>,

    /// Per-section overrides: section key -> generator block
    pub generators: BTreeMap<String, GeneratorConfig>,

    /// Maximum modules per detail batch
    pub max_modules_per_batch: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            overall_threshold: constants::quality::OVERALL_THRESHOLD,
            auto_regenerate: true,
            max_regeneration_attempts: constants::quality::MAX_REGENERATION_ATTEMPTS,
            dimension_thresholds: BTreeMap::new(),
            generators: BTreeMap::new(),
            max_modules_per_batch: constants::quality::MAX_MODULES_PER_BATCH,
        }
    }
}

impl QualityConfig {
    /// Effective quality threshold for a section.
    pub fn threshold_for(&self, section: &str) -> f32 {
        self.generators
            .get(section)
            .and_then(|g| g.overall_threshold)
            .unwrap_or(self.overall_threshold)
    }

    /// Effective regeneration cap for a section.
    pub fn max_attempts_for(&self, section: &str) -> u8 {
        self.generators
            .get(section)
            .and_then(|g| g.max_regeneration_attempts)
            .unwrap_or(self.max_regeneration_attempts)
    }
}

// =============================================================================
// Mermaid Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MermaidConfig {
    /// Whether the validation engine runs at all
    pub enabled: bool,

    /// Try an external renderer binary before the rule validator
    pub use_external_renderer: bool,

    /// Fall back to rule-based checks when the renderer is absent
    pub fallback_to_rules: bool,

    /// Write a sibling `.bak` before modifying a document
    pub backup_files: bool,

    /// Cap on regeneration attempts per invalid chart
    pub max_regeneration_attempts: u8,

    /// Chart types accepted by the rule validator
    pub supported_chart_types: Vec<String>,

    /// Template used to re-prompt for an invalid chart.
    /// Placeholders: {chart}, {errors}
    pub regeneration_prompt_template: Option<String>,
}

impl Default for MermaidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_external_renderer: false,
            fallback_to_rules: true,
            backup_files: false,
            max_regeneration_attempts: constants::mermaid::MAX_REGENERATION_ATTEMPTS,
            supported_chart_types: constants::mermaid::SUPPORTED_CHART_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            regeneration_prompt_template: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut config = Config::default();
        config.llm.temperature = Some(3.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.general.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_model_override_from_config() {
        let mut config = Config::default();
        config
            .llm
            .node_models
            .insert("generate_glossary".to_string(), "openai/gpt-4o".to_string());
        assert_eq!(config.model_for_node("generate_glossary"), "openai/gpt-4o");
        assert_eq!(config.model_for_node("generate_timeline"), config.llm.model);
    }

    #[test]
    fn test_generator_block_overrides_global_knobs() {
        let mut config = Config::default();
        config.quality.generators.insert(
            "overall_architecture".to_string(),
            GeneratorConfig {
                overall_threshold: Some(0.85),
                max_regeneration_attempts: Some(4),
            },
        );
        config.quality.generators.insert(
            "glossary".to_string(),
            GeneratorConfig {
                overall_threshold: Some(0.5),
                max_regeneration_attempts: None,
            },
        );

        assert!((config.quality.threshold_for("overall_architecture") - 0.85).abs() < 1e-6);
        assert_eq!(config.quality.max_attempts_for("overall_architecture"), 4);
        // Partial block: unset fields fall back to the global knobs
        assert!((config.quality.threshold_for("glossary") - 0.5).abs() < 1e-6);
        assert_eq!(
            config.quality.max_attempts_for("glossary"),
            config.quality.max_regeneration_attempts
        );
        // No block at all
        assert!(
            (config.quality.threshold_for("timeline") - config.quality.overall_threshold).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_generator_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.quality.generators.insert(
            "quick_look".to_string(),
            GeneratorConfig {
                overall_threshold: Some(1.5),
                max_regeneration_attempts: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
