use super::cache::CacheError;
use super::config::ConfigError;
use super::surrogate::TrainingError;
use crate::core::error::ValidationError;
use crate::core::io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error("Representation cache error: {source}")]
    Cache {
        #[from]
        source: CacheError,
    },

    #[error("Model training failed: {source}")]
    Training {
        #[from]
        source: TrainingError,
    },

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("I/O failed: {source}")]
    Io {
        #[from]
        source: IoError,
    },

    #[error("Cannot {action} while the campaign is {phase}")]
    InvalidTransition { phase: String, action: &'static str },

    #[error("{count} selected variant(s) are still awaiting labels")]
    PendingLabels { count: usize },

    #[error("Variant {variant} is already labeled")]
    AlreadyLabeled { variant: String },

    #[error("Label for variant {variant} is not a finite number ({score})")]
    InvalidLabel { variant: String, score: f64 },

    #[error("Variant {variant} appears more than once in the same label batch")]
    DuplicateLabel { variant: String },

    #[error("Round history is inconsistent: {0}")]
    InconsistentHistory(String),

    #[error("No candidate could be embedded ({failures} embedding failure(s))")]
    NoScorableCandidates { failures: usize },

    #[error("Round was cancelled")]
    Cancelled,

    #[error("Internal logic error: {0}")]
    Internal(String),
}
