//! Configuration management for Kotoba.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Kotoba";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Placeholder value for unconfigured API keys.
const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inference API configuration.
    pub api: ApiConfig,

    /// Chunking and retry behaviour.
    pub translation: TranslationConfig,

    /// Glossary extraction settings.
    pub glossary: GlossaryConfig,

    /// Emotion preservation settings.
    pub emotion: EmotionConfig,

    /// Job scheduling settings.
    pub job: JobConfig,

    /// Archive input limits.
    pub archive: ArchiveConfig,

    /// Source language detection.
    pub language: LanguageConfig,

    /// LLM prompts.
    pub prompts: PromptsConfig,

    /// File paths.
    pub paths: PathsConfig,
}

/// API configuration for LLM endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API key (required).
    pub key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Model identifier.
    pub model: String,

    /// Whether the endpoint tolerates concurrent requests.
    pub concurrent_requests: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: API_KEY_PLACEHOLDER.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            concurrent_requests: true,
        }
    }
}

impl ApiConfig {
    /// Checks if the API key is configured (not placeholder).
    pub fn is_configured(&self) -> bool {
        !self.key.is_empty() && self.key != API_KEY_PLACEHOLDER
    }
}

/// Chunking and inference call behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Maximum characters per translation chunk.
    pub chunk_size_chars: usize,

    /// Attempts per inference call before giving up.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles after every failure.
    pub backoff_base_ms: u64,

    /// Hard timeout for a single inference call in seconds.
    pub call_timeout_sec: u64,

    /// Delay between API requests in seconds.
    pub delay_between_requests_sec: f64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: 2000,
            max_attempts: 3,
            backoff_base_ms: 1000,
            call_timeout_sec: 60,
            delay_between_requests_sec: 0.0,
        }
    }
}

impl TranslationConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_sec)
    }
}

/// Glossary extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossaryConfig {
    /// Occurrences within one chunk before a capitalized phrase is a candidate.
    pub min_occurrences: usize,

    /// Minimum candidate length in characters.
    pub min_term_chars: usize,

    /// Optional JSON file of pre-committed `{"term": "translation"}` pairs.
    pub seed_file: Option<PathBuf>,
}

impl Default for GlossaryConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            min_term_chars: 3,
            seed_file: None,
        }
    }
}

/// How emotion labels are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionMode {
    /// Ask the API to classify.
    Api,
    /// Local keyword lexicon.
    #[default]
    Lexicon,
}

/// Emotion preservation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Run the emotion pass at all.
    pub enabled: bool,

    /// Classifier used by the chat backend.
    pub mode: EmotionMode,

    /// Re-translation attempts after a divergent first translation.
    pub max_retranslations: u32,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: EmotionMode::Lexicon,
            max_retranslations: 2,
        }
    }
}

/// Job scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Chapters processed concurrently. 1 keeps glossary order fully deterministic.
    pub workers: usize,

    /// Optional wall-clock limit for the whole job in seconds.
    pub deadline_sec: Option<u64>,

    /// Emit the source text for chapters that failed outright.
    pub keep_failed_source: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            deadline_sec: None,
            keep_failed_source: true,
        }
    }
}

/// Archive input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Ceiling for both the container size and its total uncompressed size.
    pub max_archive_bytes: u64,

    /// File extensions treated as chapters (lowercase, no dot).
    pub extensions: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: 50 * 1024 * 1024,
            extensions: vec!["txt".to_string(), "text".to_string(), "md".to_string()],
        }
    }
}

/// Source language detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Language assumed when detection is not confident.
    pub default_source: String,

    /// Detection confidence below this is treated as unknown.
    pub detection_threshold: f32,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            default_source: "en".to_string(),
            detection_threshold: 0.5,
        }
    }
}

/// LLM system prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Prompt for content translation. `{source}` and `{target}` are substituted.
    pub content_translation: String,

    /// Prompt for emotion classification in API mode.
    pub emotion_classification: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            content_translation: "You are a literary translator. Translate the following {source} novel text into {target}, preserving the author's style, tone and paragraph breaks. Keep character and place names consistent. Provide only the translation.".to_string(),
            emotion_classification: r#"Classify the dominant emotion of the text.
Return ONLY JSON with this shape:
{"label":"joy|sadness|anger|fear|surprise|disgust|neutral","score":<0.0-1.0>}
No explanations."#.to_string(),
        }
    }
}

/// File path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for translated output.
    pub output_directory: PathBuf,

    /// Directory for resumable job state.
    pub state_directory: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            state_directory: None,
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.is_configured() {
            return Err(ConfigError::MissingValue(
                "api.key (set your API key in config file)".to_string(),
            ));
        }

        url::Url::parse(&self.api.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "api.base_url".to_string(),
            message: e.to_string(),
        })?;

        let positive = [
            ("translation.chunk_size_chars", self.translation.chunk_size_chars),
            ("translation.max_attempts", self.translation.max_attempts as usize),
            ("translation.call_timeout_sec", self.translation.call_timeout_sec as usize),
            ("job.workers", self.job.workers),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if !(0.0..=1.0).contains(&self.language.detection_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "language.detection_threshold".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if crate::language::validate_language_code(&self.language.default_source).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "language.default_source".to_string(),
                message: format!("unknown language code '{}'", self.language.default_source),
            });
        }

        Ok(())
    }

    /// Returns the effective job state directory, using config or default.
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.paths.state_directory {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("jobs")),
        }
    }
}
