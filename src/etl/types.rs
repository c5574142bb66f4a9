use std::path::PathBuf;

use crate::dataset::DatasetError;
use crate::steps::extract::ExtractError;
use crate::steps::sql::SqlError;

/// Errors that stop a task before or outside of pipeline execution.
#[derive(Debug, thiserror::Error)]
pub enum ETLError {
    /// A stage cannot be built: unknown handler, missing required argument,
    /// out-of-range parameter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read task catalog '{path}': {source}")]
    TaskCatalog {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raised inside a stage body.
///
/// The pipeline turns these into `error` log rows; they never escape a run.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}
