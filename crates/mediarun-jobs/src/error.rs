//! Error types for mediarun-jobs.

use crate::ids::JobId;
use crate::status::JobStatus;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the job registry and service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No job with this id (never existed or already evicted).
    #[error("job not found: {id}")]
    NotFound { id: JobId },

    /// The job's artifact was requested before the job finished successfully.
    #[error("job {id} is not done (status={status})")]
    NotReady { id: JobId, status: JobStatus },

    /// A status change the lifecycle does not allow.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The external tool failed.
    #[error(transparent)]
    Tool(#[from] mediarun_av::Error),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::NotReady { .. } => 409,
            Error::InvalidTransition { .. } => 409,
            Error::Tool(_) => 502,
            Error::Io { .. } => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(id: JobId) -> Self {
        Error::NotFound { id }
    }
}
