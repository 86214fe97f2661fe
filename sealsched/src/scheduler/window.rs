//! Execution windows

use tokio::sync::oneshot;

use crate::domain::{Resources, WorkerId};

use super::request::WorkerRequest;

/// Capacity granted to one worker, with the requests bound into it
#[derive(Debug, Default)]
pub struct SchedWindow {
    /// Sum of the footprints of `todo`
    pub allocated: Resources,
    /// Bound requests in the order they should start
    pub todo: Vec<WorkerRequest>,
}

impl SchedWindow {
    pub fn is_empty(&self) -> bool {
        self.todo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.todo.len()
    }
}

/// A worker's offer to take one more window
#[derive(Debug)]
pub struct SchedWindowRequest {
    pub worker: WorkerId,
    pub done: oneshot::Sender<SchedWindow>,
}
