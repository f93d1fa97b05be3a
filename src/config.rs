use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("MISTRAL_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("Failed to read prompts file {path}: {source}")]
    PromptsRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse prompts file {path}: {source}")]
    PromptsParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Chat model requested from the Mistral API.
    pub model: String,
    /// API origin, without the /v1 suffix.
    pub base_url: String,
    pub memory_file: PathBuf,
    pub stats_file: PathBuf,
    pub prompts_file: PathBuf,
    /// Compact the conversation once its serialized size exceeds this.
    pub memory_threshold_kb: f64,
    /// How many recent messages survive a compaction.
    pub memory_keep_last_n: usize,
    /// Upper bound on tool round-trips within a single turn.
    pub max_tool_rounds: usize,
    /// Minimum gap between consecutive API calls.
    pub min_api_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "mistral-small-latest".to_string(),
            base_url: "https://api.mistral.ai".to_string(),
            memory_file: PathBuf::from("memory.json"),
            stats_file: PathBuf::from("stats.json"),
            prompts_file: PathBuf::from("prompts.yaml"),
            memory_threshold_kb: 50.0,
            memory_keep_last_n: 10,
            max_tool_rounds: 5,
            min_api_interval_ms: 1_000,
        }
    }
}

impl AppConfig {
    /// Loads the first parseable config.toml from the usual locations.
    /// Falls back to defaults when none is found so a fresh checkout
    /// runs without any setup beyond the API key.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from("config.toml"));
        paths.push(
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polyglot-coach/config.toml"),
        );
        paths.push(
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".polyglot-coach/config.toml"),
        );

        for path in paths {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => match toml::from_str(&content) {
                        Ok(config) => {
                            tracing::info!("Loaded config from {}", path.display());
                            return config;
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse config at {}: {}", path.display(), e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to read config at {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::default()
    }
}

/// Prompt templates the agent cannot run without.
#[derive(Debug, Deserialize, Clone)]
pub struct Prompts {
    pub system_prompt: String,
    /// Must contain a `{conversation}` placeholder.
    pub summarization_prompt: String,
}

impl Prompts {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::PromptsRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::PromptsParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

pub fn api_key_from_env() -> Result<String, ConfigError> {
    match std::env::var("MISTRAL_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingApiKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.model, "mistral-small-latest");
        assert_eq!(config.memory_threshold_kb, 50.0);
        assert_eq!(config.memory_keep_last_n, 10);
        assert_eq!(config.max_tool_rounds, 5);
        assert_eq!(config.min_api_interval_ms, 1_000);
    }

    #[test]
    fn explicit_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "model = \"mistral-large-latest\"\nmemory_threshold_kb = 25.0\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path));
        assert_eq!(config.model, "mistral-large-latest");
        assert_eq!(config.memory_threshold_kb, 25.0);
        // untouched keys keep their defaults
        assert_eq!(config.memory_keep_last_n, 10);
    }

    #[test]
    fn prompts_load_requires_both_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.yaml");
        fs::write(
            &path,
            "system_prompt: |\n  You can call tools.\nsummarization_prompt: |\n  Summarize:\n  {conversation}\n",
        )
        .unwrap();

        let prompts = Prompts::load(&path).unwrap();
        assert!(prompts.system_prompt.to_lowercase().contains("tools"));
        assert!(prompts.summarization_prompt.contains("{conversation}"));

        fs::write(&path, "system_prompt: only one\n").unwrap();
        assert!(matches!(
            Prompts::load(&path),
            Err(ConfigError::PromptsParse { .. })
        ));
    }

    #[test]
    fn prompts_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            Prompts::load(&missing),
            Err(ConfigError::PromptsRead { .. })
        ));
    }

    #[test]
    #[serial]
    fn api_key_comes_from_environment() {
        std::env::set_var("MISTRAL_API_KEY", "test-key-123");
        assert_eq!(api_key_from_env().unwrap(), "test-key-123");

        std::env::set_var("MISTRAL_API_KEY", "   ");
        assert!(matches!(api_key_from_env(), Err(ConfigError::MissingApiKey)));

        std::env::remove_var("MISTRAL_API_KEY");
        assert!(matches!(api_key_from_env(), Err(ConfigError::MissingApiKey)));
    }
}
