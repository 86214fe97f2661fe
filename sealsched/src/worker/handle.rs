//! Per-worker scheduling state

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{ResourceUsage, Resources, TaskType, WorkerId};
use crate::scheduler::{SchedWindow, WorkerRequest};

use super::{Worker, WorkerInfo};

/// Point-in-time copy of a handle's state
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub hostname: String,
    pub address: Option<String>,
    pub enabled: bool,
    pub capacity: Resources,
    pub usage: ResourceUsage,
    /// Footprint of requests sitting in active windows, not yet started
    pub pending: Resources,
    pub pending_tasks: usize,
    pub active_windows: usize,
}

impl WorkerSnapshot {
    /// Reservations plus work already bound to this worker
    pub fn committed(&self) -> Resources {
        self.usage.total() + self.pending
    }
}

/// Outcome of pulling the next request off the active windows
pub(crate) enum Dispatch {
    /// Resources were reserved; the request may start
    Start(WorkerRequest),
    /// The caller already gave up; drop without running
    Abandoned(WorkerRequest),
}

struct HandleState {
    info: WorkerInfo,
    usage: ResourceUsage,
    enabled: bool,
    tasks: HashSet<TaskType>,
    tasks_fetched: Option<Instant>,
    active_windows: VecDeque<SchedWindow>,
    /// Windows sent by the scheduler that the runner has not pushed yet
    in_transit: Resources,
    in_transit_tasks: usize,
}

/// Scheduler-side view of one worker
///
/// All fields live behind one lock. When the registry lock is also needed it
/// must be taken first.
pub struct WorkerHandle {
    id: WorkerId,
    worker: Arc<dyn Worker>,
    tasks_ttl: Duration,
    state: Mutex<HandleState>,
    cleanup: CancellationToken,
    closed: CancellationToken,
    has_runner: AtomicBool,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, worker: Arc<dyn Worker>, info: WorkerInfo, tasks: HashSet<TaskType>, tasks_ttl: Duration) -> Self {
        debug!(%id, hostname = %info.hostname, "WorkerHandle::new: called");
        Self {
            id,
            worker,
            tasks_ttl,
            state: Mutex::new(HandleState {
                info,
                usage: ResourceUsage::default(),
                enabled: true,
                tasks,
                tasks_fetched: Some(Instant::now()),
                active_windows: VecDeque::new(),
                in_transit: Resources::ZERO,
                in_transit_tasks: 0,
            }),
            cleanup: CancellationToken::new(),
            closed: CancellationToken::new(),
            has_runner: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Connection to the underlying worker
    pub fn worker(&self) -> Arc<dyn Worker> {
        self.worker.clone()
    }

    pub async fn info(&self) -> WorkerInfo {
        self.state.lock().await.info.clone()
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.lock().await;
        let mut pending = state.in_transit;
        let mut pending_tasks = state.in_transit_tasks;
        for window in &state.active_windows {
            for req in &window.todo {
                pending += req.need();
                pending_tasks += 1;
            }
        }

        WorkerSnapshot {
            id: self.id,
            hostname: state.info.hostname.clone(),
            address: state.info.address.clone(),
            enabled: state.enabled,
            capacity: state.info.resources,
            usage: state.usage,
            pending,
            pending_tasks,
            active_windows: state.active_windows.len(),
        }
    }

    /// Supported task types, refreshed from the worker when the cache is stale
    pub async fn task_types(&self) -> eyre::Result<HashSet<TaskType>> {
        {
            let state = self.state.lock().await;
            if let Some(fetched) = state.tasks_fetched
                && fetched.elapsed() < self.tasks_ttl
            {
                return Ok(state.tasks.clone());
            }
        }

        debug!(id = %self.id, "WorkerHandle::task_types: cache stale, refreshing");
        let tasks = self.worker.task_types().await?;

        let mut state = self.state.lock().await;
        state.tasks = tasks.clone();
        state.tasks_fetched = Some(Instant::now());
        Ok(tasks)
    }

    pub async fn supports(&self, task: TaskType) -> eyre::Result<bool> {
        Ok(self.task_types().await?.contains(&task))
    }

    /// Re-read info from the worker and drop the capability cache
    pub async fn refresh(&self) -> eyre::Result<WorkerInfo> {
        debug!(id = %self.id, "WorkerHandle::refresh: called");
        let info = self.worker.info().await?;

        let mut state = self.state.lock().await;
        state.info = info.clone();
        state.tasks_fetched = None;
        Ok(info)
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Flip the enabled flag, returning the previous value
    pub async fn set_enabled(&self, enabled: bool) -> bool {
        debug!(id = %self.id, %enabled, "WorkerHandle::set_enabled: called");
        let mut state = self.state.lock().await;
        std::mem::replace(&mut state.enabled, enabled)
    }

    pub async fn usage(&self) -> ResourceUsage {
        self.state.lock().await.usage
    }

    pub async fn utilization(&self) -> f64 {
        let state = self.state.lock().await;
        state.usage.utilization(&state.info.resources)
    }

    /// Reserve `need` in the preparing phase if it fits
    #[cfg(test)]
    pub(crate) async fn try_reserve(&self, need: Resources, bypass: bool) -> bool {
        let mut state = self.state.lock().await;
        let capacity = state.info.resources;
        state.usage.reserve(need, &capacity, bypass)
    }

    /// Move a reservation from preparing to active
    pub async fn promote(&self, need: Resources) {
        self.state.lock().await.usage.promote(need);
    }

    pub async fn release_preparing(&self, need: Resources) {
        self.state.lock().await.usage.release_preparing(need);
    }

    pub async fn release_active(&self, need: Resources) {
        self.state.lock().await.usage.release_active(need);
    }

    /// Number of windows received but not fully started
    pub async fn active_window_count(&self) -> usize {
        self.state.lock().await.active_windows.len()
    }

    pub(crate) async fn push_window(&self, window: SchedWindow) {
        debug!(id = %self.id, todo = window.todo.len(), "WorkerHandle::push_window: called");
        let mut state = self.state.lock().await;
        state.in_transit = state.in_transit.saturating_sub(&window.allocated);
        state.in_transit_tasks = state.in_transit_tasks.saturating_sub(window.len());
        state.active_windows.push_back(window);
    }

    /// Count a window the scheduler is about to send
    pub(crate) async fn window_sent(&self, allocated: Resources, tasks: usize) {
        let mut state = self.state.lock().await;
        state.in_transit += allocated;
        state.in_transit_tasks += tasks;
    }

    /// Undo `window_sent` for a window that never arrived
    pub(crate) async fn window_returned(&self, allocated: Resources, tasks: usize) {
        let mut state = self.state.lock().await;
        state.in_transit = state.in_transit.saturating_sub(&allocated);
        state.in_transit_tasks = state.in_transit_tasks.saturating_sub(tasks);
    }

    /// Forget windows in transit; their requests are being requeued
    pub(crate) async fn clear_in_transit(&self) {
        let mut state = self.state.lock().await;
        state.in_transit = Resources::ZERO;
        state.in_transit_tasks = 0;
    }

    /// Remove every active window, returning its unstarted requests
    pub(crate) async fn take_active_windows(&self) -> Vec<SchedWindow> {
        debug!(id = %self.id, "WorkerHandle::take_active_windows: called");
        self.state.lock().await.active_windows.drain(..).collect()
    }

    /// Pull the next request in window order, reserving its footprint
    ///
    /// Returns None when the windows are empty or the next request does not
    /// fit yet. Requests are started strictly in the order they were bound.
    pub(crate) async fn next_dispatch(&self) -> Option<Dispatch> {
        let mut state = self.state.lock().await;
        loop {
            let window = state.active_windows.front_mut()?;
            if window.todo.is_empty() {
                state.active_windows.pop_front();
                continue;
            }

            if window.todo[0].is_cancelled() {
                let req = window.todo.remove(0);
                return Some(Dispatch::Abandoned(req));
            }

            let need = window.todo[0].need();
            let bypass = window.todo[0].bypass_limits();
            let capacity = state.info.resources;
            if !state.usage.reserve(need, &capacity, bypass) {
                return None;
            }

            let window = state.active_windows.front_mut()?;
            let req = window.todo.remove(0);
            if window.todo.is_empty() {
                state.active_windows.pop_front();
            }
            return Some(Dispatch::Start(req));
        }
    }

    pub(crate) fn set_has_runner(&self) {
        self.has_runner.store(true, Ordering::SeqCst);
    }

    /// Whether a runner task drives this worker's windows
    pub fn has_runner(&self) -> bool {
        self.has_runner.load(Ordering::SeqCst)
    }

    /// Close a worker that has no runner
    pub(crate) async fn close_direct(&self) {
        self.cleanup.cancel();
        if let Err(e) = self.worker.close().await {
            warn!(id = %self.id, error = %e, "Failed to close worker");
        }
        self.mark_closed();
    }

    /// Ask the runner to stop
    pub(crate) fn start_cleanup(&self) {
        self.cleanup.cancel();
    }

    pub(crate) fn cleanup_token(&self) -> CancellationToken {
        self.cleanup.clone()
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Whether the runner has finished its cleanup
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the runner has finished its cleanup
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish_non_exhaustive()
    }
}
