//! The assignment pass shared by every policy

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{Resources, WorkerId};
use crate::scheduler::{RequestQueue, SchedWindow, SchedWindowRequest, WorkerRequest};
use crate::selector::Verdict;
use crate::worker::{WorkerHandle, WorkerRegistry, WorkerSnapshot};

use super::{Assigner, WindowCandidate};

/// Counters from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PassOutcome {
    /// Requests moved from the queue into windows
    pub bound: usize,
    /// Windows handed to workers
    pub delivered: usize,
    /// Requests skipped because selection ran past the timeout
    pub timed_out: usize,
}

/// Workers and per-worker tallies for the duration of one pass
struct PassState {
    handles: HashMap<WorkerId, Arc<WorkerHandle>>,
    snapshots: HashMap<WorkerId, WorkerSnapshot>,
    allocated: HashMap<WorkerId, Resources>,
    assigned: HashMap<WorkerId, usize>,
}

impl PassState {
    fn committed(&self, worker: WorkerId) -> Resources {
        let base = self.snapshots.get(&worker).map(|s| s.committed()).unwrap_or_default();
        base + self.allocated.get(&worker).copied().unwrap_or_default()
    }
}

/// Bind queued requests into open windows
///
/// Requests are considered strictly in queue order. Windows that received
/// work are sent to their worker and removed from `open`.
pub(crate) async fn try_sched(
    assigner: &dyn Assigner,
    queue: &mut RequestQueue,
    open: &mut Vec<SchedWindowRequest>,
    registry: &WorkerRegistry,
    selector_timeout: Duration,
) -> PassOutcome {
    let mut outcome = PassOutcome::default();
    if queue.is_empty() || open.is_empty() {
        return outcome;
    }

    let mut ids: Vec<WorkerId> = open.iter().map(|w| w.worker).collect();
    ids.sort();
    ids.dedup();
    let handles = registry.lookup(&ids).await;

    // Offers from workers that have since been removed
    open.retain(|w| handles.contains_key(&w.worker));

    let mut snapshots = HashMap::with_capacity(handles.len());
    for (id, handle) in &handles {
        snapshots.insert(*id, handle.snapshot().await);
    }

    let mut state = PassState {
        handles,
        snapshots,
        allocated: HashMap::new(),
        assigned: HashMap::new(),
    };
    let mut window_alloc = vec![Resources::ZERO; open.len()];
    let mut assignments: Vec<(usize, usize)> = Vec::new();

    debug!(
        assigner = assigner.name(),
        queued = queue.len(),
        windows = open.len(),
        "try_sched: called"
    );

    for (qi, req) in queue.iter().enumerate() {
        let ranked = match tokio::time::timeout(selector_timeout, rank_windows(req, open, &state)).await {
            Ok(ranked) => ranked,
            Err(_) => {
                warn!(sched_id = %req.sched_id(), task = %req.task(), ?selector_timeout, "Selector timed out, retrying next pass");
                outcome.timed_out += 1;
                continue;
            }
        };
        if ranked.is_empty() {
            continue;
        }

        let need = req.need();
        let candidates: Vec<WindowCandidate> = ranked
            .into_iter()
            .map(|wi| {
                let worker = open[wi].worker;
                let capacity = state.snapshots.get(&worker).map(|s| s.capacity).unwrap_or_default();
                let pending = state.snapshots.get(&worker).map(|s| s.pending_tasks).unwrap_or(0);
                WindowCandidate {
                    window: wi,
                    worker,
                    utilization: (state.committed(worker) + need).utilization(&capacity),
                    bound: pending + state.assigned.get(&worker).copied().unwrap_or(0),
                }
            })
            .collect();

        let Some(pick) = assigner.pick(&candidates) else {
            continue;
        };
        let chosen = &candidates[pick];
        debug!(
            sched_id = %req.sched_id(),
            sector = %req.sector().id,
            task = %req.task(),
            worker = %chosen.worker,
            window = chosen.window,
            "try_sched: bound request"
        );

        window_alloc[chosen.window] += need;
        *state.allocated.entry(chosen.worker).or_default() += need;
        *state.assigned.entry(chosen.worker).or_default() += 1;
        assignments.push((qi, chosen.window));
    }

    if assignments.is_empty() {
        return outcome;
    }
    outcome.bound = assignments.len();

    // Pull bound requests out back to front, then fill windows in queue order
    let mut moved: Vec<(usize, WorkerRequest)> = Vec::with_capacity(assignments.len());
    for (qi, wi) in assignments.iter().rev() {
        if let Some(req) = queue.remove_at(*qi) {
            moved.push((*wi, req));
        }
    }
    moved.reverse();

    let mut windows: Vec<SchedWindow> = window_alloc
        .into_iter()
        .map(|allocated| SchedWindow {
            allocated,
            todo: Vec::new(),
        })
        .collect();
    for (wi, req) in moved {
        windows[wi].todo.push(req);
    }

    for wi in (0..open.len()).rev() {
        if windows[wi].is_empty() {
            continue;
        }
        let offer = open.remove(wi);
        let window = std::mem::take(&mut windows[wi]);
        let (allocated, count) = (window.allocated, window.len());
        let handle = state.handles.get(&offer.worker);
        if let Some(handle) = handle {
            handle.window_sent(allocated, count).await;
        }
        match offer.done.send(window) {
            Ok(()) => outcome.delivered += 1,
            Err(window) => {
                warn!(worker = %offer.worker, count, "Worker dropped window offer, requeueing");
                if let Some(handle) = handle {
                    handle.window_returned(allocated, count).await;
                }
                for req in window.todo {
                    queue.requeue(req);
                }
            }
        }
    }

    outcome
}

/// Open windows acceptable for `req`, best first
async fn rank_windows(req: &WorkerRequest, open: &[SchedWindowRequest], state: &PassState) -> Vec<usize> {
    let need = req.need();
    let selector = req.selector();
    let mut verdicts: HashMap<WorkerId, Option<Verdict>> = HashMap::new();
    let mut acceptable: Vec<(usize, bool)> = Vec::new();

    for (wi, offer) in open.iter().enumerate() {
        let (Some(handle), Some(snap)) = (state.handles.get(&offer.worker), state.snapshots.get(&offer.worker)) else {
            continue;
        };
        if !snap.enabled {
            continue;
        }
        if !req.bypass_limits() && !(state.committed(offer.worker) + need).fits_within(&snap.capacity) {
            continue;
        }

        let verdict = match verdicts.get(&offer.worker) {
            Some(cached) => *cached,
            None => {
                let verdict = match selector.ok(req.task(), req.sector().proof_type, handle).await {
                    Ok(verdict) => Some(verdict),
                    Err(e) => {
                        warn!(worker = %offer.worker, task = %req.task(), error = %e, "Selector failed, skipping worker");
                        None
                    }
                };
                verdicts.insert(offer.worker, verdict);
                verdict
            }
        };

        if let Some(verdict) = verdict
            && verdict.eligible
        {
            acceptable.push((wi, verdict.preferred));
        }
    }

    if acceptable.iter().any(|(_, preferred)| *preferred) {
        acceptable.retain(|(_, preferred)| *preferred);
    }

    // Insertion sort on the selector's pairwise comparison; stable for ties
    let mut ranked: Vec<usize> = Vec::with_capacity(acceptable.len());
    for (wi, _) in acceptable {
        let mut at = ranked.len();
        for (pos, other) in ranked.iter().enumerate() {
            if better(req, open[wi].worker, open[*other].worker, state).await {
                at = pos;
                break;
            }
        }
        ranked.insert(at, wi);
    }
    ranked
}

async fn better(req: &WorkerRequest, a: WorkerId, b: WorkerId, state: &PassState) -> bool {
    if a == b {
        return false;
    }
    let (Some(ha), Some(hb)) = (state.handles.get(&a), state.handles.get(&b)) else {
        return false;
    };
    match req.selector().cmp(req.task(), ha, hb).await {
        Ok(better) => better,
        Err(e) => {
            warn!(task = %req.task(), error = %e, "Selector comparison failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assigner::{LowestUtilization, Spread};
    use crate::domain::{RegisteredSealProof, TaskType};
    use crate::scheduler::request::testing::request;
    use crate::selector::WorkerSelector;
    use crate::worker::{LocalWorker, Worker};
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    async fn add_worker(registry: &WorkerRegistry, name: &str, cpus: u64) -> WorkerId {
        let worker = LocalWorker::new(name, Resources::new(cpus, 0, 0, 0));
        let info = worker.info().await.unwrap();
        let tasks = worker.task_types().await.unwrap();
        let id = WorkerId::new();
        let handle = WorkerHandle::new(id, Arc::new(worker), info, tasks, Duration::from_secs(60));
        registry.insert(Arc::new(handle)).await;
        id
    }

    fn offer(worker: WorkerId) -> (SchedWindowRequest, oneshot::Receiver<SchedWindow>) {
        let (done, rx) = oneshot::channel();
        (SchedWindowRequest { worker, done }, rx)
    }

    #[tokio::test]
    async fn test_binds_in_priority_order_within_capacity() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 2).await;

        let mut queue = RequestQueue::new();
        let (low, _rx_low) = request(0, 1);
        let (high, _rx_high) = request(10, 2);
        let (mid, _rx_mid) = request(5, 3);
        queue.push(low);
        queue.push(high);
        queue.push(mid);

        let (w, rx) = offer(worker);
        let mut open = vec![w];
        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;

        assert_eq!(outcome.bound, 2);
        assert_eq!(outcome.delivered, 1);
        assert!(open.is_empty());

        let window = rx.await.unwrap();
        let sectors: Vec<_> = window.todo.iter().map(|r| r.sector().id.number).collect();
        assert_eq!(sectors, vec![2, 3]);
        assert_eq!(window.allocated, Resources::new(2, 0, 0, 0));

        // The low-priority request did not fit
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().sector().id.number, 1);
    }

    #[tokio::test]
    async fn test_no_windows_leaves_queue() {
        let registry = WorkerRegistry::new();
        let mut queue = RequestQueue::new();
        queue.push(request(0, 1).0);
        let mut open = Vec::new();

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome, PassOutcome::default());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_offers_from_unknown_workers_are_dropped() {
        let registry = WorkerRegistry::new();
        let mut queue = RequestQueue::new();
        queue.push(request(0, 1).0);
        let (w, rx) = offer(WorkerId::new());
        let mut open = vec![w];

        try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert!(open.is_empty());
        assert!(rx.await.is_err());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_worker_gets_nothing() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 4).await;
        registry.get(worker).await.unwrap().set_enabled(false).await;

        let mut queue = RequestQueue::new();
        queue.push(request(0, 1).0);
        let (w, _rx) = offer(worker);
        let mut open = vec![w];

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 0);
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_utilization_vs_spread() {
        let registry = WorkerRegistry::new();
        let big = add_worker(&registry, "big", 8).await;
        let small = add_worker(&registry, "small", 2).await;

        // Utilization favours the bigger worker; spread sees a tie and keeps
        // selector order, where `small` comes first.
        let cases: [(&dyn Assigner, WorkerId); 2] = [(&LowestUtilization, big), (&Spread, small)];
        for (assigner, expected) in cases {
            let mut queue = RequestQueue::new();
            queue.push(request(0, 1).0);
            let (ws, rx_small) = offer(small);
            let (wb, rx_big) = offer(big);
            let mut open = vec![ws, wb];

            let outcome = try_sched(assigner, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
            assert_eq!(outcome.bound, 1, "{}", assigner.name());
            assert_eq!(open.len(), 1);
            assert_ne!(open[0].worker, expected);

            let window = if expected == big { rx_big.await } else { rx_small.await };
            assert_eq!(window.unwrap().len(), 1, "{}", assigner.name());
        }
    }

    #[tokio::test]
    async fn test_spread_balances_bound_requests() {
        let registry = WorkerRegistry::new();
        let a = add_worker(&registry, "a", 8).await;
        let b = add_worker(&registry, "b", 8).await;

        let mut queue = RequestQueue::new();
        for n in 0..4 {
            queue.push(request(0, n).0);
        }
        let (wa, rx_a) = offer(a);
        let (wb, rx_b) = offer(b);
        let mut open = vec![wa, wb];

        let outcome = try_sched(&Spread, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 4);
        assert_eq!(rx_a.await.unwrap().len(), 2);
        assert_eq!(rx_b.await.unwrap().len(), 2);
    }

    struct PickOne {
        preferred: WorkerId,
    }

    #[async_trait]
    impl WorkerSelector for PickOne {
        async fn ok(&self, _task: TaskType, _proof: RegisteredSealProof, worker: &WorkerHandle) -> eyre::Result<Verdict> {
            Ok(if worker.id() == self.preferred { Verdict::PREFER } else { Verdict::ACCEPT })
        }

        async fn cmp(&self, _task: TaskType, _a: &WorkerHandle, _b: &WorkerHandle) -> eyre::Result<bool> {
            Ok(false)
        }
    }

    struct Failing;

    #[async_trait]
    impl WorkerSelector for Failing {
        async fn ok(&self, _task: TaskType, _proof: RegisteredSealProof, _worker: &WorkerHandle) -> eyre::Result<Verdict> {
            Err(eyre::eyre!("selector broke"))
        }

        async fn cmp(&self, _task: TaskType, _a: &WorkerHandle, _b: &WorkerHandle) -> eyre::Result<bool> {
            Ok(false)
        }
    }

    struct Slow;

    #[async_trait]
    impl WorkerSelector for Slow {
        async fn ok(&self, _task: TaskType, _proof: RegisteredSealProof, _worker: &WorkerHandle) -> eyre::Result<Verdict> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Verdict::ACCEPT)
        }

        async fn cmp(&self, _task: TaskType, _a: &WorkerHandle, _b: &WorkerHandle) -> eyre::Result<bool> {
            Ok(false)
        }
    }

    fn request_with(selector: Arc<dyn WorkerSelector>, sector: u64) -> WorkerRequest {
        use crate::domain::SectorRef;
        use crate::scheduler::{RequestContext, request::RequestParts};
        use crate::worker::noop_action;

        let (tx, _rx) = oneshot::channel();
        let parts = RequestParts {
            sector: SectorRef::new(1, sector, RegisteredSealProof::StackedDrg2KiBV1_1),
            task: TaskType::Commit1,
            need: Resources::new(1, 0, 0, 0),
            selector,
            prepare: noop_action(),
            work: noop_action(),
        };
        WorkerRequest::new(&RequestContext::new(), parts, tx)
    }

    #[tokio::test]
    async fn test_preferred_worker_wins() {
        let registry = WorkerRegistry::new();
        let idle = add_worker(&registry, "idle", 64).await;
        let home = add_worker(&registry, "home", 2).await;

        let mut queue = RequestQueue::new();
        queue.push(request_with(Arc::new(PickOne { preferred: home }), 1));
        let (wi, _rx_idle) = offer(idle);
        let (wh, rx_home) = offer(home);
        let mut open = vec![wi, wh];

        try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(rx_home.await.unwrap().len(), 1);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].worker, idle);
    }

    #[tokio::test]
    async fn test_selector_error_keeps_request_queued() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 4).await;

        let mut queue = RequestQueue::new();
        queue.push(request_with(Arc::new(Failing), 1));
        queue.push(request(0, 2).0);
        let (w, rx) = offer(worker);
        let mut open = vec![w];

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().sector().id.number, 1);
        assert_eq!(rx.await.unwrap().todo[0].sector().id.number, 2);
    }

    #[tokio::test]
    async fn test_selector_timeout_skips_request() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 4).await;

        let mut queue = RequestQueue::new();
        queue.push(request_with(Arc::new(Slow), 1));
        let (w, _rx) = offer(worker);
        let mut open = vec![w];

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_millis(100)).await;
        assert_eq!(outcome.timed_out, 1);
        assert_eq!(outcome.bound, 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_offer_requeues() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 4).await;

        let mut queue = RequestQueue::new();
        queue.push(request(3, 1).0);
        let (w, rx) = offer(worker);
        drop(rx);
        let mut open = vec![w];

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 1);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(queue.len(), 1);
        assert!(open.is_empty());

        let handle = registry.get(worker).await.unwrap();
        assert_eq!(handle.snapshot().await.pending, Resources::ZERO);
    }

    #[tokio::test]
    async fn test_window_in_transit_counts_as_committed() {
        let registry = WorkerRegistry::new();
        let worker = add_worker(&registry, "w", 1).await;
        let handle = registry.get(worker).await.unwrap();

        let mut queue = RequestQueue::new();
        queue.push(request(0, 1).0);
        let (first, rx) = offer(worker);
        let (second, _rx_second) = offer(worker);
        let mut open = vec![first, second];

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 1);
        assert_eq!(handle.snapshot().await.pending_tasks, 1);

        // Not yet pushed by the runner, the worker is still full
        queue.push(request(0, 2).0);
        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 0);

        handle.push_window(rx.await.unwrap()).await;
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.pending, Resources::new(1, 0, 0, 0));
        assert_eq!(snapshot.pending_tasks, 1);
        assert_eq!(snapshot.active_windows, 1);

        let outcome = try_sched(&LowestUtilization, &mut queue, &mut open, &registry, Duration::from_secs(1)).await;
        assert_eq!(outcome.bound, 0);
        assert_eq!(queue.len(), 1);
    }
}
