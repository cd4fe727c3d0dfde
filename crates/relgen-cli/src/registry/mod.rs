//! Run directories: config snapshot, JSON log stream and generated topics.

mod run;

pub use run::{RunContext, RunOptions, init_run_logging, start_run};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot prepare '{path}': {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write run config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot install run logging: {0}")]
    Logging(String),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
