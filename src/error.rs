use thiserror::Error;

use crate::llm::ApiError;

#[derive(Debug, Error)]
pub enum LocflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Invalid work source line {line}: {message}")]
    Source { line: usize, message: String },

    #[error("LLM API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LocflowError {
    /// Errors that end the whole run rather than a single item.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, LocflowError::Config(_) | LocflowError::Checkpoint(_))
    }
}
