//! Scheduler - client interface to the scheduler loop

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use callstore::KvStore;

use crate::domain::{ResourceTable, SchedId, SectorId, SectorRef, TaskType, WorkerId};
use crate::error::SchedError;
use crate::selector::WorkerSelector;
use crate::tracker::{CallTracker, SectorRecord};
use crate::worker::{Worker, WorkerAction, WorkerHandle, WorkerRegistry, spawn_runner};

use super::config::SchedulerConfig;
use super::core::SchedLoop;
use super::diag::SchedDiagInfo;
use super::messages::{DisableCleanup, SchedRequest};
use super::request::{RequestContext, RequestParts, WorkerRequest};
use super::window::{SchedWindow, SchedWindowRequest};

struct Shared {
    tx: mpsc::Sender<SchedRequest>,
    registry: Arc<WorkerRegistry>,
    tracker: Arc<CallTracker>,
    table: ResourceTable,
    config: SchedulerConfig,
    closing: CancellationToken,
    closed: CancellationToken,
}

/// Handle to a running scheduler
///
/// Cheap to clone; every clone talks to the same loop task.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Start the scheduler loop on the current runtime
    pub fn new(config: SchedulerConfig, table: ResourceTable, store: Arc<dyn KvStore>) -> Result<Self, SchedError> {
        debug!(?config, "Scheduler::new: called");
        let assigner = config.assigner_kind()?.build();
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let registry = Arc::new(WorkerRegistry::new());
        let tracker = Arc::new(CallTracker::new(store));
        let closing = CancellationToken::new();
        let closed = CancellationToken::new();

        let sched_loop = SchedLoop::new(
            config.clone(),
            assigner,
            registry.clone(),
            rx,
            closing.clone(),
            closed.clone(),
        );
        tokio::spawn(sched_loop.run());

        Ok(Self {
            shared: Arc::new(Shared {
                tx,
                registry,
                tracker,
                table,
                config,
                closing,
                closed,
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.shared.registry
    }

    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.shared.tracker
    }

    pub fn resource_table(&self) -> &ResourceTable {
        &self.shared.table
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.is_cancelled()
    }

    /// Submit a task and wait until it has run on some worker
    ///
    /// Returns the `work` (or `prepare`) error verbatim as
    /// `SchedError::Execution`. Cancelling `ctx` releases the caller right
    /// away; a request that was already dispatched keeps running.
    pub async fn schedule(
        &self,
        ctx: &RequestContext,
        sector: SectorRef,
        task: TaskType,
        selector: Arc<dyn WorkerSelector>,
        prepare: WorkerAction,
        work: WorkerAction,
    ) -> Result<(), SchedError> {
        debug!(sector = %sector.id, %task, priority = %ctx.priority(), "Scheduler::schedule: called");
        if let Some(id) = ctx.sched_id()
            && self.shared.tracker.is_done(id)
        {
            info!(sched_id = %id, sector = %sector.id, %task, "Request already completed");
            return Ok(());
        }
        let (ret, rx) = oneshot::channel();
        let parts = RequestParts {
            sector,
            task,
            need: self.shared.table.get(task),
            selector,
            prepare,
            work,
        };
        let req = WorkerRequest::new(ctx, parts, ret);
        let sched_id = req.sched_id();

        self.send(ctx.cancel_token(), SchedRequest::Schedule(req)).await?;

        let result = self.recv(ctx.cancel_token(), rx).await;
        if matches!(result, Err(SchedError::Cancelled)) {
            debug!(%sched_id, "Scheduler::schedule: caller cancelled, withdrawing request");
            let _ = self.shared.tx.try_send(SchedRequest::Cancelled { id: sched_id });
        }
        result?
    }

    /// Remove a request that is still queued
    ///
    /// Its caller receives `RequestRemoved`. Fails with `RequestNotFound` when
    /// the request was already bound or never existed.
    pub async fn remove_request(&self, cancel: &CancellationToken, id: SchedId) -> Result<(), SchedError> {
        debug!(sched_id = %id, "Scheduler::remove_request: called");
        let (reply, rx) = oneshot::channel();
        self.send(cancel, SchedRequest::Remove { id, reply }).await?;
        self.recv(cancel, rx).await?
    }

    /// Snapshot of pending requests and open windows
    ///
    /// The loop answers with its own state; the last worker and address of
    /// each request's sector are looked up afterwards, off the loop.
    pub async fn info(&self, cancel: &CancellationToken) -> Result<SchedDiagInfo, SchedError> {
        debug!("Scheduler::info: called");
        let (reply, rx) = oneshot::channel();
        self.send(cancel, SchedRequest::Info { reply }).await?;
        let mut info = self.recv(cancel, rx).await?;
        self.add_placements(&mut info).await;
        Ok(info)
    }

    async fn add_placements(&self, info: &mut SchedDiagInfo) {
        let mut sectors: Vec<SectorId> = info.requests.iter().map(|r| r.sector).collect();
        sectors.sort();
        sectors.dedup();
        if sectors.is_empty() {
            return;
        }

        let tracker = self.shared.tracker.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            let mut records: HashMap<SectorId, SectorRecord> = HashMap::new();
            for sector in sectors {
                match tracker.last_worker(&sector) {
                    Ok(Some(record)) => {
                        records.insert(sector, record);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%sector, error = %e, "Failed to read sector placement"),
                }
            }
            records
        });
        let records = match lookup.await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Sector placement lookup failed");
                return;
            }
        };

        let workers: Vec<(WorkerId, String)> = records
            .values()
            .map(|r| (r.placement.worker, r.placement.hostname.clone()))
            .collect();
        let addresses = self.shared.registry.netmap().addresses(&workers).await;

        for req in &mut info.requests {
            if let Some(record) = records.get(&req.sector) {
                let worker = record.placement.worker;
                req.last_worker = Some(worker);
                req.last_address = addresses.get(&worker).cloned().or_else(|| record.placement.address.clone());
            }
        }
    }

    /// Offer one window for `worker`
    ///
    /// The receiver yields the window once at least one request is bound to
    /// it, or an empty window when the worker already holds its limit. It
    /// fails when the offer is dropped (worker disabled or scheduler closed).
    pub async fn request_window(&self, worker: WorkerId) -> oneshot::Receiver<SchedWindow> {
        debug!(%worker, "Scheduler::request_window: called");
        let (done, rx) = oneshot::channel();
        let msg = SchedRequest::WindowRequest(SchedWindowRequest { worker, done });
        if let Err(e) = self.send(&CancellationToken::new(), msg).await {
            debug!(%worker, error = %e, "Scheduler::request_window: not delivered");
        }
        rx
    }

    /// Ask for an assignment pass, e.g. after resources were released
    pub fn worker_changed(&self) {
        debug!("Scheduler::worker_changed: called");
        if self.is_closing() {
            return;
        }
        // A full mailbox already guarantees a pass
        let _ = self.shared.tx.try_send(SchedRequest::WorkerChanged);
    }

    /// Disable `worker` and return the unstarted requests in `windows` to the queue
    ///
    /// `cleanup` runs inside the loop before this returns.
    pub async fn disable_worker(
        &self,
        worker: WorkerId,
        windows: Vec<SchedWindow>,
        cleanup: Option<DisableCleanup>,
    ) -> Result<(), SchedError> {
        debug!(%worker, windows = windows.len(), "Scheduler::disable_worker: called");
        let (ack, rx) = oneshot::channel();
        let msg = SchedRequest::Disable {
            worker,
            windows,
            cleanup,
            ack,
        };
        let cancel = CancellationToken::new();
        self.send(&cancel, msg).await?;
        self.recv(&cancel, rx).await
    }

    /// Register a worker without starting its runner
    ///
    /// The caller drives the window protocol itself through `request_window`.
    pub async fn register_worker(&self, worker: Arc<dyn Worker>) -> Result<Arc<WorkerHandle>, SchedError> {
        debug!("Scheduler::register_worker: called");
        if self.is_closing() {
            return Err(SchedError::Closing);
        }

        let id = WorkerId::new();
        let info = worker.info().await.map_err(|e| worker_error(id, e))?;
        let tasks = worker.task_types().await.map_err(|e| worker_error(id, e))?;
        let handle = Arc::new(WorkerHandle::new(
            id,
            worker,
            info,
            tasks,
            self.shared.config.tasks_cache_ttl(),
        ));
        self.shared.registry.insert(handle.clone()).await;
        self.worker_changed();
        Ok(handle)
    }

    /// Register a worker and start its runner
    pub async fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<WorkerId, SchedError> {
        debug!("Scheduler::add_worker: called");
        let handle = self.register_worker(worker).await?;
        let id = handle.id();
        spawn_runner(self.clone(), handle);
        Ok(id)
    }

    /// Re-read a worker's info and capabilities
    pub async fn update_worker(&self, id: WorkerId) -> Result<(), SchedError> {
        debug!(worker = %id, "Scheduler::update_worker: called");
        let handle = self.shared.registry.get(id).await.ok_or(SchedError::UnknownWorker(id))?;
        let info = handle.refresh().await.map_err(|e| worker_error(id, e))?;
        if let Some(address) = &info.address {
            self.shared.registry.netmap().insert(id, &info.hostname, address).await;
        }
        self.worker_changed();
        Ok(())
    }

    /// Disable a worker, requeue its unstarted work, close it and forget it
    pub async fn remove_worker(&self, id: WorkerId) -> Result<(), SchedError> {
        debug!(worker = %id, "Scheduler::remove_worker: called");
        let handle = self.shared.registry.get(id).await.ok_or(SchedError::UnknownWorker(id))?;

        let windows = handle.take_active_windows().await;
        let stopper = handle.clone();
        let cleanup: DisableCleanup = Box::new(move || stopper.start_cleanup());
        self.disable_worker(id, windows, Some(cleanup)).await?;

        if handle.has_runner() {
            if tokio::time::timeout(self.shared.config.cleanup_timeout(), handle.closed())
                .await
                .is_err()
            {
                warn!(worker = %id, "Worker cleanup timed out during removal");
            }
        } else {
            handle.close_direct().await;
        }

        self.shared.registry.remove(id).await;
        info!(worker = %id, "Worker removed");
        Ok(())
    }

    /// Stop scheduling, clean up every worker and wait until done
    pub async fn close(&self) {
        debug!("Scheduler::close: called");
        self.shared.closing.cancel();
        self.shared.closed.cancelled().await;
    }

    async fn send(&self, cancel: &CancellationToken, msg: SchedRequest) -> Result<(), SchedError> {
        tokio::select! {
            biased;
            _ = self.shared.closing.cancelled() => Err(SchedError::Closing),
            _ = cancel.cancelled() => Err(SchedError::Cancelled),
            sent = self.shared.tx.send(msg) => sent.map_err(|_| SchedError::Closing),
        }
    }

    async fn recv<T>(&self, cancel: &CancellationToken, rx: oneshot::Receiver<T>) -> Result<T, SchedError> {
        tokio::select! {
            biased;
            _ = self.shared.closing.cancelled() => Err(SchedError::Closing),
            _ = cancel.cancelled() => Err(SchedError::Cancelled),
            reply = rx => reply.map_err(|_| SchedError::Closing),
        }
    }
}

fn worker_error(worker: WorkerId, e: eyre::Report) -> SchedError {
    SchedError::Worker {
        worker,
        message: format!("{e:#}"),
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}
