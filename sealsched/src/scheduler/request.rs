//! Scheduling requests

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{Priority, Resources, SchedId, SectorRef, TaskType};
use crate::error::SchedError;
use crate::selector::WorkerSelector;
use crate::worker::WorkerAction;

/// Caller-side options for one `schedule` call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    priority: Priority,
    cancel: CancellationToken,
    sched_id: Option<SchedId>,
    bypass_limits: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Abort the call when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a caller-chosen scheduling id, e.g. to remove the request later
    pub fn with_sched_id(mut self, sched_id: SchedId) -> Self {
        self.sched_id = Some(sched_id);
        self
    }

    /// Let the request exceed worker capacity
    pub fn bypass_limits(mut self) -> Self {
        self.bypass_limits = true;
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn sched_id(&self) -> Option<SchedId> {
        self.sched_id
    }
}

/// One pending unit of work, from submission until it is started or removed
pub struct WorkerRequest {
    sched_id: SchedId,
    sector: SectorRef,
    task: TaskType,
    priority: Priority,
    pub(crate) seq: u64,
    need: Resources,
    bypass_limits: bool,
    selector: Arc<dyn WorkerSelector>,
    prepare: WorkerAction,
    work: WorkerAction,
    cancel: CancellationToken,
    submitted_at: Instant,
    ret: oneshot::Sender<Result<(), SchedError>>,
}

/// Fields needed to build a request
pub(crate) struct RequestParts {
    pub sector: SectorRef,
    pub task: TaskType,
    pub need: Resources,
    pub selector: Arc<dyn WorkerSelector>,
    pub prepare: WorkerAction,
    pub work: WorkerAction,
}

impl WorkerRequest {
    pub(crate) fn new(
        ctx: &RequestContext,
        parts: RequestParts,
        ret: oneshot::Sender<Result<(), SchedError>>,
    ) -> Self {
        Self {
            sched_id: ctx.sched_id.unwrap_or_default(),
            sector: parts.sector,
            task: parts.task,
            priority: ctx.priority,
            seq: 0,
            need: parts.need,
            bypass_limits: ctx.bypass_limits,
            selector: parts.selector,
            prepare: parts.prepare,
            work: parts.work,
            cancel: ctx.cancel.clone(),
            submitted_at: Instant::now(),
            ret,
        }
    }

    pub fn sched_id(&self) -> SchedId {
        self.sched_id
    }

    pub fn sector(&self) -> &SectorRef {
        &self.sector
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Submission sequence number assigned by the queue
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Resource footprint on the worker that runs it
    pub fn need(&self) -> Resources {
        self.need
    }

    pub fn bypass_limits(&self) -> bool {
        self.bypass_limits
    }

    pub fn selector(&self) -> &Arc<dyn WorkerSelector> {
        &self.selector
    }

    pub(crate) fn prepare(&self) -> WorkerAction {
        self.prepare.clone()
    }

    pub(crate) fn work(&self) -> WorkerAction {
        self.work.clone()
    }

    /// Whether the caller stopped waiting for this request
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.ret.is_closed()
    }

    pub fn waiting(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Answer the caller; consumes the request
    pub(crate) fn respond(self, result: Result<(), SchedError>) {
        if self.ret.send(result).is_err() {
            warn!(sched_id = %self.sched_id, sector = %self.sector.id, task = %self.task, "Request response dropped, caller gone");
        }
    }
}

impl std::fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRequest")
            .field("sched_id", &self.sched_id)
            .field("sector", &self.sector.id)
            .field("task", &self.task)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::domain::RegisteredSealProof;
    use crate::selector::TaskSelector;
    use crate::worker::noop_action;

    /// Request with a unit footprint and no-op actions
    pub(crate) fn request(
        priority: i32,
        sector: u64,
    ) -> (WorkerRequest, oneshot::Receiver<Result<(), SchedError>>) {
        let (tx, rx) = oneshot::channel();
        let ctx = RequestContext::new().with_priority(priority);
        let parts = RequestParts {
            sector: SectorRef::new(1000, sector, RegisteredSealProof::StackedDrg2KiBV1_1),
            task: TaskType::PreCommit1,
            need: Resources::new(1, 0, 0, 0),
            selector: Arc::new(TaskSelector::new()),
            prepare: noop_action(),
            work: noop_action(),
        };
        (WorkerRequest::new(&ctx, parts, tx), rx)
    }
}
