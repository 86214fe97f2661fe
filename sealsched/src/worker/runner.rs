//! Per-worker window loop
//!
//! Each worker added through `Scheduler::add_worker` gets one runner task.
//! It keeps window offers open with the scheduler, starts bound requests in
//! order as resources free up, and watches the worker session.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use eyre::eyre;
use futures::FutureExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::domain::CallId;
use crate::error::SchedError;
use crate::scheduler::{SchedWindow, Scheduler, WorkerRequest};
use crate::tracker::CallPlacement;

use super::handle::{Dispatch, WorkerHandle};
use super::{Worker, WorkerAction};

/// Spawn the runner for a registered worker
pub(crate) fn spawn_runner(sched: Scheduler, handle: Arc<WorkerHandle>) -> JoinHandle<()> {
    debug!(id = %handle.id(), "spawn_runner: called");
    handle.set_has_runner();
    let runner = Runner {
        sched,
        handle,
        offers: FuturesUnordered::new(),
        lost: false,
    };
    tokio::spawn(runner.run())
}

struct Runner {
    sched: Scheduler,
    handle: Arc<WorkerHandle>,
    offers: FuturesUnordered<oneshot::Receiver<SchedWindow>>,
    /// Session check failed and the worker was disabled by this runner
    lost: bool,
}

impl Runner {
    async fn run(mut self) {
        let id = self.handle.id();
        info!(%id, "Worker runner started");

        let cleanup = self.handle.cleanup_token();
        let (done_tx, mut done_rx) = mpsc::channel::<()>(self.sched.config().channel_buffer.max(1));
        let mut heartbeat = interval(self.sched.config().heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !self.lost && self.handle.is_enabled().await {
                self.open_windows().await;
            }
            self.start_ready(&done_tx).await;

            tokio::select! {
                biased;
                _ = cleanup.cancelled() => break,
                Some(offer) = self.offers.next(), if !self.offers.is_empty() => match offer {
                    Ok(window) if !window.is_empty() => self.handle.push_window(window).await,
                    Ok(_) => debug!(%id, "Runner::run: empty window"),
                    Err(_) => debug!(%id, "Runner::run: window offer dropped"),
                },
                Some(()) = done_rx.recv() => {}
                _ = heartbeat.tick() => self.check_session().await,
            }
        }

        self.shutdown().await;
        info!(%id, "Worker runner stopped");
    }

    /// Keep outstanding offers plus active windows at the configured limit
    async fn open_windows(&mut self) {
        let limit = self.sched.config().window_limit();
        while !self.sched.is_closing() && self.offers.len() + self.handle.active_window_count().await < limit {
            let offer = self.sched.request_window(self.handle.id()).await;
            self.offers.push(offer);
        }
    }

    /// Start every request at the head of the windows that fits
    async fn start_ready(&self, done: &mpsc::Sender<()>) {
        while let Some(dispatch) = self.handle.next_dispatch().await {
            match dispatch {
                Dispatch::Abandoned(req) => {
                    debug!(sched_id = %req.sched_id(), "Runner::start_ready: caller gone, dropping");
                    drop(req);
                }
                Dispatch::Start(req) => {
                    tokio::spawn(execute(self.sched.clone(), self.handle.clone(), req, done.clone()));
                }
            }
        }
    }

    async fn check_session(&mut self) {
        let id = self.handle.id();
        let worker = self.handle.worker();
        let alive = matches!(timeout(self.sched.config().heartbeat_interval(), worker.session()).await, Ok(Ok(_)));

        match (alive, self.lost) {
            (false, false) => {
                warn!(%id, "Worker session lost, disabling");
                self.lost = true;
                self.disable().await;
            }
            (true, true) => {
                info!(%id, "Worker session restored, enabling");
                self.lost = false;
                self.handle.set_enabled(true).await;
                self.sched.worker_changed();
            }
            _ => {}
        }
    }

    /// Hand unstarted work back to the scheduler
    async fn disable(&mut self) {
        let id = self.handle.id();
        let windows = self.handle.take_active_windows().await;
        if let Err(e) = self.sched.disable_worker(id, windows, None).await {
            debug!(%id, error = %e, "Runner::disable: scheduler unavailable");
        }

        // Offers are dropped by the disable; anything delivered before it is requeued too
        let mut late = Vec::new();
        while let Some(offer) = self.offers.next().await {
            if let Ok(window) = offer
                && !window.is_empty()
            {
                late.push(window);
            }
        }
        if !late.is_empty()
            && let Err(e) = self.sched.disable_worker(id, late, None).await
        {
            debug!(%id, error = %e, "Runner::disable: scheduler unavailable");
        }
    }

    async fn shutdown(&mut self) {
        let id = self.handle.id();
        let mut windows = self.handle.take_active_windows().await;
        while let Some(Some(offer)) = self.offers.next().now_or_never() {
            if let Ok(window) = offer
                && !window.is_empty()
            {
                windows.push(window);
            }
        }
        self.offers.clear();

        if !windows.is_empty() && !self.sched.is_closing() {
            debug!(%id, count = windows.len(), "Runner::shutdown: requeueing windows");
            if let Err(e) = self.sched.disable_worker(id, windows, None).await {
                debug!(%id, error = %e, "Runner::shutdown: scheduler unavailable");
            }
        }

        if let Err(e) = self.handle.worker().close().await {
            warn!(%id, error = %e, "Failed to close worker");
        }
        self.handle.mark_closed();
    }
}

/// Run one request's prepare and work steps against its worker
async fn execute(sched: Scheduler, handle: Arc<WorkerHandle>, req: WorkerRequest, done: mpsc::Sender<()>) {
    let need = req.need();
    let sched_id = req.sched_id();
    let tracker = sched.tracker();

    if tracker.is_done(sched_id) {
        info!(%sched_id, task = %req.task(), "Request already completed, not running again");
        handle.release_preparing(need).await;
        req.respond(Ok(()));
        let _ = done.try_send(());
        sched.worker_changed();
        return;
    }

    let call = CallId::new(req.sector().id);
    debug!(%call, %sched_id, task = %req.task(), worker = %handle.id(), "execute: called");

    let info = handle.info().await;
    let placement = CallPlacement {
        worker: handle.id(),
        hostname: info.hostname,
        address: info.address,
    };
    if let Err(e) = tracker.prepared(call, req.task(), placement) {
        error!(%call, error = %e, "Failed to record prepared call");
    }

    let worker = handle.worker();
    let result = match run_action(req.prepare(), worker.clone(), "prepare").await {
        Ok(()) => {
            handle.promote(need).await;
            if let Err(e) = tracker.running(call) {
                error!(%call, error = %e, "Failed to record running call");
            }
            let result = run_action(req.work(), worker, "work").await;
            handle.release_active(need).await;
            result
        }
        Err(e) => {
            handle.release_preparing(need).await;
            Err(e)
        }
    };

    if let Err(e) = tracker.finish(call) {
        error!(%call, error = %e, "Failed to clear finished call");
    }

    match &result {
        Ok(()) => {
            if let Err(e) = tracker.mark_done(sched_id) {
                error!(%sched_id, error = %e, "Failed to record completed request");
            }
            debug!(%call, waited_ms = req.waiting().as_millis() as u64, "execute: finished");
        }
        Err(e) => warn!(%call, task = %req.task(), error = %e, "Task failed"),
    }
    req.respond(result.map_err(SchedError::Execution));

    let _ = done.try_send(());
    sched.worker_changed();
}

/// Await a caller action, reporting a panic as an error
async fn run_action(action: WorkerAction, worker: Arc<dyn Worker>, step: &str) -> eyre::Result<()> {
    match AssertUnwindSafe(async move { action(worker).await }).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(eyre!("{} action panicked: {}", step, message))
        }
    }
}
