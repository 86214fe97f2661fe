//! Selector preferring the worker that last touched a sector

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::{RegisteredSealProof, SectorId, TaskType};
use crate::tracker::CallTracker;
use crate::worker::WorkerHandle;

use super::{Verdict, WorkerSelector};

/// Wraps another selector and marks the sector's last worker as preferred
pub struct AffinitySelector {
    inner: Arc<dyn WorkerSelector>,
    tracker: Arc<CallTracker>,
    sector: SectorId,
}

impl AffinitySelector {
    pub fn new(inner: Arc<dyn WorkerSelector>, tracker: Arc<CallTracker>, sector: SectorId) -> Self {
        Self { inner, tracker, sector }
    }
}

#[async_trait]
impl WorkerSelector for AffinitySelector {
    async fn ok(&self, task: TaskType, proof: RegisteredSealProof, worker: &WorkerHandle) -> eyre::Result<Verdict> {
        let verdict = self.inner.ok(task, proof, worker).await?;
        if !verdict.eligible {
            return Ok(verdict);
        }

        let last = match self.tracker.last_worker(&self.sector) {
            Ok(last) => last,
            Err(e) => {
                warn!(sector = %self.sector, error = %e, "Failed to read sector record");
                None
            }
        };
        let local = last.is_some_and(|r| r.placement.worker == worker.id());
        debug!(sector = %self.sector, worker = %worker.id(), %local, "AffinitySelector::ok: called");

        Ok(Verdict {
            eligible: true,
            preferred: verdict.preferred || local,
        })
    }

    async fn cmp(&self, task: TaskType, a: &WorkerHandle, b: &WorkerHandle) -> eyre::Result<bool> {
        self.inner.cmp(task, a, b).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CallId, Resources, WorkerId};
    use crate::selector::TaskSelector;
    use crate::tracker::CallPlacement;
    use crate::worker::{LocalWorker, Worker};
    use callstore::MemoryStore;
    use std::time::Duration;

    async fn handle(name: &str) -> WorkerHandle {
        let worker = LocalWorker::new(name, Resources::new(4, 0, 0, 0));
        let info = worker.info().await.unwrap();
        let tasks = worker.task_types().await.unwrap();
        WorkerHandle::new(WorkerId::new(), Arc::new(worker), info, tasks, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_last_worker_is_preferred() {
        let tracker = Arc::new(CallTracker::new(Arc::new(MemoryStore::new())));
        let sector = SectorId { miner: 1, number: 9 };
        let home = handle("home").await;
        let other = handle("other").await;

        tracker
            .prepared(
                CallId::new(sector),
                TaskType::PreCommit1,
                CallPlacement {
                    worker: home.id(),
                    hostname: "home".to_string(),
                    address: None,
                },
            )
            .unwrap();

        let selector = AffinitySelector::new(Arc::new(TaskSelector::new()), tracker, sector);
        let proof = RegisteredSealProof::default();

        assert_eq!(selector.ok(TaskType::PreCommit2, proof, &home).await.unwrap(), Verdict::PREFER);
        assert_eq!(selector.ok(TaskType::PreCommit2, proof, &other).await.unwrap(), Verdict::ACCEPT);
    }

    #[tokio::test]
    async fn test_ineligible_stays_ineligible() {
        let tracker = Arc::new(CallTracker::new(Arc::new(MemoryStore::new())));
        let worker = LocalWorker::with_tasks("w", Resources::ZERO, [TaskType::Fetch]);
        let info = worker.info().await.unwrap();
        let tasks = worker.task_types().await.unwrap();
        let handle = WorkerHandle::new(WorkerId::new(), Arc::new(worker), info, tasks, Duration::from_secs(60));

        let selector = AffinitySelector::new(Arc::new(TaskSelector::new()), tracker, SectorId { miner: 1, number: 1 });
        let verdict = selector.ok(TaskType::Commit2, RegisteredSealProof::default(), &handle).await.unwrap();
        assert_eq!(verdict, Verdict::REJECT);
    }
}
