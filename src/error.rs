//! Error types for the Kotoba translation pipeline.
//!
//! Uses `thiserror` for structured error definitions. Only input-level and
//! archive-level errors ever abort work; inference failures degrade into
//! chunk warnings further up the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while splitting text into chunks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Text is empty or whitespace only.
    #[error("Input text is empty")]
    EmptyInput,

    /// A zero chunk size can never make progress.
    #[error("Chunk size must be greater than 0")]
    InvalidLimit,
}

/// Errors from the translation / emotion inference capability.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// HTTP request to the API failed
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// A single call exceeded the hard per-call timeout
    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),

    /// The model declined to answer
    #[error("Request refused: {0}")]
    Refused(String),

    /// The model returned nothing usable
    #[error("Empty response from model")]
    EmptyResponse,

    /// Failed to parse the model response
    #[error("Failed to parse model response: {0}")]
    Parse(String),

    /// Backend is misconfigured; retrying cannot help
    #[error("Invalid inference configuration: {0}")]
    InvalidConfig(String),

    /// All retry attempts exhausted
    #[error("{operation} unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },
}

impl InferenceError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Api { status, .. } => {
                matches!(*status, 408 | 429) || *status >= 500 || *status == 0
            }
            InferenceError::InvalidConfig(_) | InferenceError::Unavailable { .. } => false,
            _ => true,
        }
    }
}

/// Errors from the archive collaborator.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Failed to read or write the container file
    #[error("Archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Container is unreadable
    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    /// Container exceeds the configured ceiling
    #[error("Archive too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// No text files left after filtering
    #[error("No chapter files found in archive")]
    NoChapters,
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::Corrupt(other.to_string()),
        }
    }
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Missing required configuration value
    #[error("Missing required config value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Error type for glossary persistence.
#[derive(Error, Debug)]
pub enum GlossaryError {
    /// Failed to read glossary file
    #[error("Failed to read glossary: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse JSON
    #[error("Failed to parse glossary JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to write glossary file
    #[error("Failed to save glossary: {0}")]
    Write(String),
}

/// Error type for persisted job state.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Job store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or snapshot could not be (de)serialized
    #[error("Job store data invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored glossary snapshot unusable
    #[error(transparent)]
    Glossary(#[from] GlossaryError),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
