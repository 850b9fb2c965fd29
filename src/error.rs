//! Error types for the search core.
//!
//! Each variant names the failing file so a fatal error at any phase of
//! the pipeline carries enough context to be actionable without a
//! backtrace.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the index, query, and output paths of the search core.
#[derive(Debug, Error)]
pub enum SiftError {
    /// An IBF part could not be opened or deserialized.
    #[error("failed to read index part {}: {source:#}", .path.display())]
    IndexRead { path: PathBuf, source: anyhow::Error },

    /// The query reader failed mid-stream.
    #[error("failed to read queries from {}: {source:#}", .path.display())]
    QueryRead { path: PathBuf, source: anyhow::Error },

    /// A write to the results file failed.
    #[error("failed to write results to {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A search parameter violates its invariant. Raised before any I/O.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// A threshold cache file exists but could not be read.
    /// Cache write failures are logged, never raised.
    #[error("failed to load threshold cache {}: {source:#}", .path.display())]
    ThresholdCache { path: PathBuf, source: anyhow::Error },
}
