//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/codeatlas/config.toml)
//! 3. Project config (.codeatlas/config.toml)
//! 4. Environment variables (CODEATLAS_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{AtlasError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. CODEATLAS_LLM_MODEL -> llm.model
        figment = figment.merge(Env::prefixed("CODEATLAS_").split("_").lowercase(true));

        let mut config: Config = figment
            .extract()
            .map_err(|e| AtlasError::Config(format!("Configuration error: {}", e)))?;

        Self::apply_process_variables(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only (plus defaults)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| AtlasError::Config(format!("Configuration error: {}", e)))?;

        Self::apply_process_variables(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Fold sensitive values and dispatch knobs from process variables into
    /// the config. The unified base URL wins over provider-specific overrides
    /// kept for backward compatibility.
    fn apply_process_variables(config: &mut Config) {
        if config.llm.api_key.is_none()
            && let Ok(key) = env::var("CODEATLAS_LLM_API_KEY")
            && !key.is_empty()
        {
            config.llm.api_key = Some(key);
        }

        if config.llm.base_url.is_none() {
            let unified = env::var("CODEATLAS_LLM_BASE_URL").ok().filter(|v| !v.is_empty());
            let provider_specific = env::var("OPENAI_BASE_URL")
                .or_else(|_| env::var("OLLAMA_BASE_URL"))
                .ok()
                .filter(|v| !v.is_empty());
            config.llm.base_url = unified.or(provider_specific);
        }
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/codeatlas/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("codeatlas"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".codeatlas/config.toml")
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| AtlasError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    /// Show config file paths
    pub fn show_paths() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[general]\ntarget_language = \"zh\"\n\n[llm]\nmodel = \"ollama/llama3\""
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.general.target_language, "zh");
        assert_eq!(config.llm.model, "ollama/llama3");
        // Untouched sections keep their defaults
        assert_eq!(config.repo.default_branch, "main");
    }

    #[test]
    fn test_load_from_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_from_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.general.target_language, "en");
    }
}
