//! Job runner error types.

use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::reference::InvalidReference;
use crate::store::StoreError;

/// Errors raised by job bookkeeping operations.
///
/// A runner that fails is not an error here; see `RunOutcome`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job run {0} not found")]
    RunNotFound(Uuid),

    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),

    #[error("no runner registered for '{0}'")]
    UnknownRunner(String),

    #[error("failed to dispatch job {job_id}: {reason}")]
    Dispatch { job_id: Uuid, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::JobNotFound(_) | JobError::RunNotFound(_) | JobError::UnknownRunner(_) => {
                ErrorKind::NotFound
            }
            JobError::InvalidReference(_) => ErrorKind::Validation,
            JobError::Dispatch { .. } | JobError::Store(_) => ErrorKind::Internal,
        }
    }
}
