//! Selector based on supported task types

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{RegisteredSealProof, TaskType};
use crate::worker::WorkerHandle;

use super::{Verdict, WorkerSelector};

/// Accepts any worker that supports the task type
///
/// Between two workers it prefers the one supporting fewer task types, then
/// the less utilised one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskSelector;

impl TaskSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerSelector for TaskSelector {
    async fn ok(&self, task: TaskType, _proof: RegisteredSealProof, worker: &WorkerHandle) -> eyre::Result<Verdict> {
        let supported = worker.supports(task).await?;
        debug!(worker = %worker.id(), %task, %supported, "TaskSelector::ok: called");
        Ok(Verdict::from_eligible(supported))
    }

    async fn cmp(&self, _task: TaskType, a: &WorkerHandle, b: &WorkerHandle) -> eyre::Result<bool> {
        let a_tasks = a.task_types().await?.len();
        let b_tasks = b.task_types().await?.len();
        if a_tasks != b_tasks {
            return Ok(a_tasks < b_tasks);
        }
        Ok(a.utilization().await < b.utilization().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Resources, WorkerId};
    use crate::worker::{LocalWorker, Worker};
    use std::sync::Arc;
    use std::time::Duration;

    async fn handle(worker: LocalWorker) -> WorkerHandle {
        let info = worker.info().await.unwrap();
        let tasks = worker.task_types().await.unwrap();
        WorkerHandle::new(WorkerId::new(), Arc::new(worker), info, tasks, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_ok_checks_supported_tasks() {
        let worker = handle(LocalWorker::with_tasks("a", Resources::ZERO, [TaskType::AddPiece])).await;
        let selector = TaskSelector::new();
        let proof = RegisteredSealProof::default();

        assert_eq!(selector.ok(TaskType::AddPiece, proof, &worker).await.unwrap(), Verdict::ACCEPT);
        assert_eq!(selector.ok(TaskType::Commit2, proof, &worker).await.unwrap(), Verdict::REJECT);
    }

    #[tokio::test]
    async fn test_cmp_prefers_specialist() {
        let cap = Resources::new(4, 0, 0, 0);
        let specialist = handle(LocalWorker::with_tasks("s", cap, [TaskType::PreCommit1])).await;
        let generalist = handle(LocalWorker::new("g", cap)).await;
        let selector = TaskSelector::new();

        assert!(selector.cmp(TaskType::PreCommit1, &specialist, &generalist).await.unwrap());
        assert!(!selector.cmp(TaskType::PreCommit1, &generalist, &specialist).await.unwrap());
    }

    #[tokio::test]
    async fn test_cmp_falls_back_to_utilization() {
        let cap = Resources::new(4, 0, 0, 0);
        let busy = handle(LocalWorker::new("busy", cap)).await;
        let idle = handle(LocalWorker::new("idle", cap)).await;
        assert!(busy.try_reserve(Resources::new(2, 0, 0, 0), false).await);

        let selector = TaskSelector::new();
        assert!(selector.cmp(TaskType::Fetch, &idle, &busy).await.unwrap());
        assert!(!selector.cmp(TaskType::Fetch, &busy, &idle).await.unwrap());
    }
}
