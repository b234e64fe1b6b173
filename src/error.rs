//! Error types for the import stage.

use thiserror::Error;

/// Reasons an input file cannot be turned into rows at all.
///
/// Individual malformed rows never produce an `ImportError`; they are counted
/// and skipped.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("import file is empty")]
    EmptyInput,

    #[error("import file has no header row")]
    MissingHeader,

    #[error("failed to parse CSV ({errors} row errors, no readable rows)")]
    Unparseable { errors: usize },

    #[error("failed to read CSV header: {0}")]
    Header(#[source] csv::Error),

    #[error("failed to read import file: {0}")]
    Io(#[from] std::io::Error),
}
