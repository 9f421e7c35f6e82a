//! Error types for the library seams.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single call to the inference endpoint.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AnalysisError::Image { .. })
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalysisError::Timeout
        } else if err.is_decode() {
            AnalysisError::MalformedBody(err.to_string())
        } else {
            AnalysisError::Network(err)
        }
    }
}

/// Rename guard and filesystem failures.
#[derive(Debug, Error)]
pub enum RenameError {
    #[error("new file name is empty")]
    EmptyName,

    #[error("file name contains illegal characters: {0}")]
    IllegalCharacters(String),

    #[error("source file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("source is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize rename log: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Out-of-range or unparsable settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: u32,
        max: u32,
        value: u32,
    },

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("at least one video extension is required")]
    NoExtensions,
}

/// Errors that abort a whole run before any file is touched.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("inference endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("failed to build analysis client: {0}")]
    Client(#[from] AnalysisError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
