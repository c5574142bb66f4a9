use thiserror::Error;

/// Errors raised by [`Dataset`](super::Dataset) operations.
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    /// A row or dataset does not have the expected number of columns.
    #[error("expected {expected} column(s), got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
}
