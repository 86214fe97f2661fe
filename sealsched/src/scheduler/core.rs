//! Scheduler loop task
//!
//! The loop owns the request queue and the open window offers. Everything
//! else talks to it over the mailbox, so neither needs a lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assigner::{Assigner, try_sched};
use crate::domain::{SchedId, WorkerId};
use crate::error::SchedError;
use crate::worker::WorkerRegistry;

use super::config::SchedulerConfig;
use super::diag::{SchedDiagInfo, SchedDiagRequestInfo};
use super::messages::{DisableCleanup, SchedRequest};
use super::queue::RequestQueue;
use super::window::{SchedWindow, SchedWindowRequest};

pub(crate) struct SchedLoop {
    config: SchedulerConfig,
    assigner: Box<dyn Assigner>,
    registry: Arc<WorkerRegistry>,
    rx: mpsc::Receiver<SchedRequest>,
    closing: CancellationToken,
    closed: CancellationToken,
    queue: RequestQueue,
    open: Vec<SchedWindowRequest>,
    steady: bool,
}

impl SchedLoop {
    pub(crate) fn new(
        config: SchedulerConfig,
        assigner: Box<dyn Assigner>,
        registry: Arc<WorkerRegistry>,
        rx: mpsc::Receiver<SchedRequest>,
        closing: CancellationToken,
        closed: CancellationToken,
    ) -> Self {
        debug!(assigner = assigner.name(), "SchedLoop::new: called");
        Self {
            config,
            assigner,
            registry,
            rx,
            closing,
            closed,
            queue: RequestQueue::new(),
            open: Vec::new(),
            steady: false,
        }
    }

    /// Run until the scheduler starts closing, then clean up workers
    pub(crate) async fn run(mut self) {
        info!(assigner = self.assigner.name(), "Scheduler started");

        let init_wait = sleep(self.config.init_wait());
        tokio::pin!(init_wait);
        let period = self.config.resched_interval();
        let mut resched = interval_at(Instant::now() + period, period);
        resched.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut trigger = false;
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => break,
                _ = &mut init_wait, if !self.steady => {
                    info!(queued = self.queue.len(), "Initial wait over, scheduling started");
                    self.steady = true;
                    trigger = true;
                }
                msg = self.rx.recv() => match msg {
                    Some(msg) => trigger |= self.handle(msg).await,
                    None => break,
                },
                _ = resched.tick() => trigger = true,
            }

            while let Ok(msg) = self.rx.try_recv() {
                trigger |= self.handle(msg).await;
            }

            if trigger && self.steady {
                self.pass().await;
            }
        }

        self.shutdown().await;
    }

    /// Apply one message; returns whether it calls for a pass
    async fn handle(&mut self, msg: SchedRequest) -> bool {
        debug!(kind = msg.kind(), "SchedLoop::handle: called");
        let trigger = msg.triggers_pass();

        match msg {
            SchedRequest::Schedule(req) => {
                debug!(sched_id = %req.sched_id(), sector = %req.sector().id, task = %req.task(), priority = %req.priority(), "Request queued");
                self.queue.push(req);
            }

            SchedRequest::WindowRequest(offer) => {
                let held = self.open.iter().filter(|w| w.worker == offer.worker).count();
                if held >= self.config.window_limit() {
                    warn!(worker = %offer.worker, held, "Window limit reached, returning empty window");
                    let _ = offer.done.send(SchedWindow::default());
                    return false;
                }
                self.open.push(offer);
            }

            SchedRequest::WorkerChanged => {}

            SchedRequest::Disable {
                worker,
                windows,
                cleanup,
                ack,
            } => {
                self.disable(worker, windows, cleanup).await;
                let _ = ack.send(());
            }

            SchedRequest::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }

            SchedRequest::Cancelled { id } => {
                if self.queue.remove(id).is_some() {
                    debug!(sched_id = %id, "Cancelled request dropped from queue");
                }
            }

            SchedRequest::Info { reply } => {
                let _ = reply.send(self.diag());
            }
        }

        trigger
    }

    fn remove(&mut self, id: SchedId) -> Result<(), SchedError> {
        match self.queue.remove(id) {
            Some(req) => {
                info!(sched_id = %id, sector = %req.sector().id, task = %req.task(), "Request removed");
                req.respond(Err(SchedError::RequestRemoved));
                Ok(())
            }
            None => Err(SchedError::RequestNotFound(id)),
        }
    }

    async fn disable(&mut self, worker: WorkerId, windows: Vec<SchedWindow>, cleanup: Option<DisableCleanup>) {
        let mut requeued = 0;
        for window in windows {
            for req in window.todo {
                self.queue.requeue(req);
                requeued += 1;
            }
        }

        let before = self.open.len();
        self.open.retain(|w| w.worker != worker);
        let dropped = before - self.open.len();

        if let Some(handle) = self.registry.get(worker).await {
            handle.set_enabled(false).await;
            handle.clear_in_transit().await;
        }
        if let Some(cleanup) = cleanup {
            cleanup();
        }

        info!(%worker, requeued, dropped_offers = dropped, "Worker disabled");
    }

    async fn pass(&mut self) {
        let cancelled = self.queue.drain_where(|req| req.is_cancelled());
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "SchedLoop::pass: purged cancelled requests");
        }

        if self.queue.is_empty() || self.open.is_empty() {
            return;
        }

        let outcome = try_sched(
            self.assigner.as_ref(),
            &mut self.queue,
            &mut self.open,
            &self.registry,
            self.config.selector_timeout(),
        )
        .await;

        debug!(
            bound = outcome.bound,
            delivered = outcome.delivered,
            timed_out = outcome.timed_out,
            queued = self.queue.len(),
            open = self.open.len(),
            "Assignment pass done"
        );
    }

    /// Queue and offer state only; `Scheduler::info` adds sector placements
    fn diag(&self) -> SchedDiagInfo {
        let requests = self
            .queue
            .iter()
            .map(|req| SchedDiagRequestInfo {
                sector: req.sector().id,
                task: req.task(),
                priority: req.priority(),
                sched_id: req.sched_id(),
                last_worker: None,
                last_address: None,
            })
            .collect();

        SchedDiagInfo {
            requests,
            open_windows: self.open.iter().map(|w| w.worker).collect(),
            steady: self.steady,
        }
    }

    async fn shutdown(&mut self) {
        info!(queued = self.queue.len(), open = self.open.len(), "Scheduler closing");

        // Callers see Closing once their response channel drops
        drop(self.queue.drain());
        self.open.clear();

        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            if let SchedRequest::Disable { cleanup, ack, .. } = msg {
                if let Some(cleanup) = cleanup {
                    cleanup();
                }
                let _ = ack.send(());
            }
        }

        let handles = self.registry.handles().await;
        for handle in &handles {
            handle.start_cleanup();
        }

        let timeout = self.config.cleanup_timeout();
        for handle in &handles {
            if !handle.has_runner() {
                handle.close_direct().await;
                continue;
            }
            if tokio::time::timeout(timeout, handle.closed()).await.is_err() {
                warn!(worker = %handle.id(), ?timeout, "Worker cleanup timed out");
            }
        }

        self.closed.cancel();
        info!(workers = handles.len(), "Scheduler closed");
    }
}
