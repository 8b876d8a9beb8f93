//! Error types for simsim.

use std::path::Path;

use thiserror::Error;

/// Errors surfaced while loading inputs, accumulating pairs or writing outputs.
///
/// Input format faults carry the offending path and a detail message naming
/// the byte offset, line or row; they are fatal at load. Numerical
/// degeneracies during scoring are not errors, they are counted and surfaced
/// in the run report.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {detail}")]
    InvalidFormat { path: String, detail: String },

    #[error("{path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("memory ceiling of {ceiling} bytes exceeded after {entries} accumulator entries")]
    MemoryCeilingExceeded { ceiling: usize, entries: usize },
}

impl SimError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn format(path: &Path, detail: impl Into<String>) -> Self {
        SimError::InvalidFormat {
            path: path.display().to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        SimError::Csv {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;
