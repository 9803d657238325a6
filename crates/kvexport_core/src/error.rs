//! Error types for split planning and paginated reads.

use thiserror::Error;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// A failure reported by the remote store for a single call.
///
/// The variants are the store's own vocabulary; [`RemoteError::is_transient`]
/// decides which of them the retry engine may absorb.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The store rejected the call because the request rate is too high.
    #[error("request throttled: {0}")]
    Throttled(String),

    /// Provisioned throughput for the table or index was exceeded.
    #[error("provisioned capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The call did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The store answered with a temporary server-side failure.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The caller is not allowed to read the resource.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The request was malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The table or index does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Any other failure.
    #[error("remote failure: {0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true if the call may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Throttled(_)
                | RemoteError::CapacityExceeded(_)
                | RemoteError::Timeout(_)
                | RemoteError::ServiceUnavailable(_)
        )
    }
}

/// Errors that can occur while planning or reading an export.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A required setting is missing or has an invalid value.
    #[error("invalid configuration for `{setting}`: {reason}")]
    Configuration {
        /// Name of the offending setting.
        setting: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A filter condition is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A transient failure persisted through every allowed retry.
    #[error("retries exhausted after {retries} retries, last failure: {last}")]
    ExhaustedRetries {
        /// Retries consumed before giving up.
        retries: u32,
        /// The last transient failure observed.
        #[source]
        last: RemoteError,
    },

    /// A non-retryable failure from the remote store.
    #[error("fatal remote error: {0}")]
    Remote(#[source] RemoteError),

    /// A segment reached its terminal failed state.
    #[error("segment {segment} failed: {source}")]
    SegmentFailed {
        /// The segment whose read failed.
        segment: u32,
        /// The fatal error that ended the segment.
        #[source]
        source: Box<ExportError>,
    },

    /// The read was cancelled between pages.
    #[error("read cancelled")]
    Cancelled,

    /// A read manager was driven from a state that does not allow it.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A checkpoint could not be encoded or decoded.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl ExportError {
    /// Creates a configuration error for `setting`.
    pub fn configuration(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    /// Creates the error for a required setting that was not provided.
    pub fn missing_setting(setting: impl Into<String>) -> Self {
        Self::configuration(setting, "required job config not found")
    }

    /// Returns true for configuration-class errors, which are detected
    /// before any remote call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExportError::Configuration { .. } | ExportError::InvalidFilter(_)
        )
    }

    /// Returns the setting named by a configuration error, looking through
    /// segment failures.
    pub fn setting(&self) -> Option<&str> {
        match self {
            ExportError::Configuration { setting, .. } => Some(setting),
            ExportError::SegmentFailed { source, .. } => source.setting(),
            _ => None,
        }
    }
}
