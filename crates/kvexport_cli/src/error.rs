//! CLI error type.

use kvexport_core::ExportError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// The export itself failed.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Reading the source or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source dump or an output record could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A command-line value is malformed.
    #[error("invalid argument `{arg}`: {reason}")]
    InvalidArgument {
        /// The offending option.
        arg: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
