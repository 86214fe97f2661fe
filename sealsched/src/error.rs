//! Scheduler error types

use thiserror::Error;

use crate::domain::{SchedId, WorkerId};

/// Errors returned by scheduler operations
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("scheduler closing")]
    Closing,

    #[error("request cancelled by caller")]
    Cancelled,

    #[error("scheduling request {0} not found")]
    RequestNotFound(SchedId),

    #[error("scheduling request removed")]
    RequestRemoved,

    #[error("unknown assigner '{0}'")]
    UnknownAssigner(String),

    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("worker {worker}: {message}")]
    Worker { worker: WorkerId, message: String },

    #[error("call store: {0}")]
    Store(#[from] callstore::StoreError),

    /// Error produced by a prepare or work action, passed through untouched
    #[error("{0:#}")]
    Execution(eyre::Report),
}

impl SchedError {
    /// Whether the caller gave up or the scheduler went away
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SchedError::Closing | SchedError::Cancelled)
    }

    /// Whether a removal found nothing to remove
    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedError::RequestNotFound(_))
    }

    /// Unwrap the action error, if this is one
    pub fn into_execution(self) -> Option<eyre::Report> {
        match self {
            SchedError::Execution(report) => Some(report),
            _ => None,
        }
    }
}
