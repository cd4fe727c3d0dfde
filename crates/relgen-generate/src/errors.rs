use thiserror::Error;

use relgen_config::ValidationReport;

use crate::sink::SinkError;

/// Errors emitted by the generation engine.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid configuration:\n{0}")]
    ConfigValidation(ValidationReport),
    #[error("load error for '{entity}': {message}")]
    Load { entity: String, message: String },
    #[error("reference pool for '{0}' is empty")]
    EmptyPool(String),
    #[error("requested {requested} distinct references from '{entity}' but only {available} exist")]
    BatchTooLarge {
        entity: String,
        requested: usize,
        available: usize,
    },
    #[error("sampling error: {0}")]
    Sampling(String),
    #[error("worker error: {0}")]
    Worker(String),
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("faker error: {0}")]
    Faker(String),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("record error: {0}")]
    Core(#[from] relgen_core::Error),
}

impl GenerationError {
    pub(crate) fn load(entity: &str, message: impl Into<String>) -> Self {
        GenerationError::Load {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}
