//! Message types for the scheduler loop

use tokio::sync::oneshot;

use crate::domain::{SchedId, WorkerId};
use crate::error::SchedError;

use super::diag::SchedDiagInfo;
use super::request::WorkerRequest;
use super::window::{SchedWindow, SchedWindowRequest};

/// Callback run by the loop before a disable is acknowledged
pub type DisableCleanup = Box<dyn FnOnce() + Send>;

/// Requests to the scheduler loop
pub(crate) enum SchedRequest {
    /// New request to enqueue
    Schedule(WorkerRequest),

    /// A worker offers to take a window
    WindowRequest(SchedWindowRequest),

    /// A worker's resources or capabilities may have changed
    WorkerChanged,

    /// Stop offering work to a worker and requeue what it has not started
    Disable {
        worker: WorkerId,
        windows: Vec<SchedWindow>,
        cleanup: Option<DisableCleanup>,
        ack: oneshot::Sender<()>,
    },

    /// Remove a still-queued request
    Remove {
        id: SchedId,
        reply: oneshot::Sender<Result<(), SchedError>>,
    },

    /// Caller gave up waiting; drop quietly if still queued
    Cancelled { id: SchedId },

    /// Snapshot of queue and windows
    Info { reply: oneshot::Sender<SchedDiagInfo> },
}

impl SchedRequest {
    /// Whether the message should trigger an assignment pass
    pub(crate) fn triggers_pass(&self) -> bool {
        matches!(
            self,
            SchedRequest::Schedule(_)
                | SchedRequest::WindowRequest(_)
                | SchedRequest::WorkerChanged
                | SchedRequest::Disable { .. }
        )
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            SchedRequest::Schedule(_) => "schedule",
            SchedRequest::WindowRequest(_) => "window-request",
            SchedRequest::WorkerChanged => "worker-changed",
            SchedRequest::Disable { .. } => "disable",
            SchedRequest::Remove { .. } => "remove",
            SchedRequest::Cancelled { .. } => "cancelled",
            SchedRequest::Info { .. } => "info",
        }
    }
}
