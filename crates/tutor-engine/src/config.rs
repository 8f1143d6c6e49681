//! Configuration types for the tutoring service.
//!
//! This module provides the configuration structures that control request
//! quotas, the overview cache, the text-generation collaborator and where the
//! practice content is loaded from.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};
use crate::session::Language;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default path of the source catalog file.
fn default_sources_path() -> String {
    "sources.json".to_string()
}

/// Default maximum length of a learner utterance, in characters.
const fn default_max_utterance_chars() -> usize {
    1000
}

/// Default rate-limit window in seconds.
const fn default_window_seconds() -> u64 {
    60
}

/// Default quota for session lifecycle operations (start, complete, analyze, review).
const fn default_lifecycle_limit() -> u32 {
    10
}

/// Default quota for in-conversation turns.
const fn default_turn_limit() -> u32 {
    30
}

/// Default quota for overview requests.
const fn default_overview_limit() -> u32 {
    20
}

/// Default time-to-live for cached overviews in seconds.
const fn default_overview_ttl() -> u64 {
    3600
}

/// Default chat-completions endpoint.
fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default model name.
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default environment variable holding the generator API key.
fn default_api_key_env() -> String {
    "TUTOR_API_KEY".to_string()
}

/// Default timeout for a single generation call in seconds.
const fn default_generation_timeout() -> u64 {
    30
}

/// Default sampling temperature.
const fn default_temperature() -> f32 {
    0.7
}

/// Main configuration for the tutoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the JSON file listing practice texts and dialogs.
    #[serde(default = "default_sources_path")]
    pub sources_path: String,

    /// Language used when neither the request nor the source names one.
    #[serde(default)]
    pub default_language: Language,

    /// Maximum accepted length of a learner utterance, in characters.
    #[serde(default = "default_max_utterance_chars")]
    pub max_utterance_chars: usize,

    /// Per-operation request quotas.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Overview cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Text-generation collaborator settings.
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources_path: default_sources_path(),
            default_language: Language::default(),
            max_utterance_chars: default_max_utterance_chars(),
            rate_limits: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or values.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` inside a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or values.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `TutorError::ConfigValidationError` if the configuration values
    /// are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.sources_path.trim().is_empty() {
            return Err(TutorError::config_validation(
                "sourcesPath must not be empty",
                "Point sourcesPath at your source catalog JSON file in tutor.json",
            ));
        }

        if self.max_utterance_chars == 0 {
            return Err(TutorError::config_validation(
                "maxUtteranceChars must be greater than 0",
                "Set maxUtteranceChars to at least 1 in tutor.json",
            ));
        }

        self.rate_limits.validate()?;
        self.generator.validate()?;

        Ok(())
    }
}

/// Per-operation request quotas over a fixed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Window duration in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Quota for start, complete, analyze and review.
    #[serde(default = "default_lifecycle_limit")]
    pub lifecycle: u32,

    /// Quota for turns and transcript reads.
    #[serde(default = "default_turn_limit")]
    pub turn: u32,

    /// Quota for overview requests.
    #[serde(default = "default_overview_limit")]
    pub overview: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            lifecycle: default_lifecycle_limit(),
            turn: default_turn_limit(),
            overview: default_overview_limit(),
        }
    }
}

impl RateLimitConfig {
    /// Returns the window as a `Duration`.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.window_seconds == 0 {
            return Err(TutorError::config_validation(
                "rateLimits.windowSeconds must be greater than 0",
                "Set rateLimits.windowSeconds to at least 1 in tutor.json",
            ));
        }

        for (name, limit) in [
            ("lifecycle", self.lifecycle),
            ("turn", self.turn),
            ("overview", self.overview),
        ] {
            if limit == 0 {
                return Err(TutorError::config_validation(
                    format!("rateLimits.{name} must be greater than 0"),
                    format!("Set rateLimits.{name} to at least 1 in tutor.json"),
                ));
            }
        }

        Ok(())
    }
}

/// Overview cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Seconds a cached overview stays valid; `0` disables expiry.
    #[serde(default = "default_overview_ttl")]
    pub overview_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            overview_ttl_seconds: default_overview_ttl(),
        }
    }
}

impl CacheConfig {
    /// Returns the overview TTL, or `None` when expiry is disabled.
    #[must_use]
    pub const fn overview_ttl(&self) -> Option<Duration> {
        if self.overview_ttl_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.overview_ttl_seconds))
        }
    }
}

/// Settings for the chat-completions text generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable the API key is read from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single generation call in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_generation_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl GeneratorConfig {
    /// Returns the per-call timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TutorError::config_validation(
                "generator.endpoint must not be empty",
                "Set generator.endpoint to the base URL of an OpenAI-compatible API",
            ));
        }

        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "generator.model must not be empty",
                "Set generator.model in tutor.json",
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(TutorError::config_validation(
                "generator.timeoutSeconds must be greater than 0",
                "Set generator.timeoutSeconds to at least 1 in tutor.json",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TutorError::config_validation(
                format!(
                    "generator.temperature must be between 0 and 2 (got {})",
                    self.temperature
                ),
                "Use a temperature between 0.0 and 2.0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.sources_path, "sources.json");
        assert_eq!(config.default_language, Language::Spanish);
        assert_eq!(config.max_utterance_chars, 1000);
        assert_eq!(config.rate_limits.window_seconds, 60);
        assert_eq!(config.rate_limits.lifecycle, 10);
        assert_eq!(config.rate_limits.turn, 30);
        assert_eq!(config.rate_limits.overview, 20);
        assert_eq!(config.cache.overview_ttl_seconds, 3600);
        assert_eq!(config.generator.timeout_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sources_path, "sources.json");
        assert_eq!(config.rate_limits.turn, 30);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "defaultLanguage": "FR",
            "rateLimits": { "turn": 5 },
            "cache": { "overviewTtlSeconds": 0 },
            "generator": { "model": "local-model", "endpoint": "http://localhost:8080/v1" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.default_language, Language::French);
        assert_eq!(config.rate_limits.turn, 5);
        assert_eq!(config.rate_limits.lifecycle, 10);
        assert!(config.cache.overview_ttl().is_none());
        assert_eq!(config.generator.model, "local-model");
        assert_eq!(config.generator.api_key_env, "TUTOR_API_KEY");
    }

    #[test]
    fn test_invalid_language_error() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"defaultLanguage": "klingon"}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid language"));
        assert!(err.contains("klingon"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.rate_limits.turn = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TutorError::ConfigValidationError { .. }));
        assert!(err.to_string().contains("rateLimits.turn"));

        let mut config = Config::default();
        config.rate_limits.window_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_utterance_chars = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generator.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.generator.temperature = 3.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_load_from_file_missing_returns_default() {
        let path = std::env::temp_dir().join("tutor_missing_config_does_not_exist.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.rate_limits.lifecycle, 10);
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let path = temp_file(
            "tutor_config_valid.json",
            r#"{"sourcesPath": "content/sources.json", "maxUtteranceChars": 280}"#,
        );
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.sources_path, "content/sources.json");
        assert_eq!(config.max_utterance_chars, 280);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let path = temp_file("tutor_config_invalid.json", "{ not json");
        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, TutorError::ConfigParseError { .. }));
        std::fs::remove_file(&path).ok();
    }
}
