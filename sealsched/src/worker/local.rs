//! In-process worker

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eyre::eyre;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Resources, TaskType};

use super::{Worker, WorkerInfo};

/// Worker living in the scheduler's own process
///
/// Used by the simulation command and tests. It can be taken offline to
/// mimic a lost connection.
pub struct LocalWorker {
    info: RwLock<WorkerInfo>,
    tasks: RwLock<HashSet<TaskType>>,
    session: Uuid,
    online: AtomicBool,
    closed: AtomicBool,
}

impl LocalWorker {
    /// Worker supporting every task type
    pub fn new(hostname: impl Into<String>, resources: Resources) -> Self {
        Self::with_tasks(hostname, resources, TaskType::ALL)
    }

    pub fn with_tasks(hostname: impl Into<String>, resources: Resources, tasks: impl IntoIterator<Item = TaskType>) -> Self {
        Self {
            info: RwLock::new(WorkerInfo {
                hostname: hostname.into(),
                address: None,
                resources,
            }),
            tasks: RwLock::new(tasks.into_iter().collect()),
            session: Uuid::new_v4(),
            online: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the address reported in `info`
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.info.get_mut().address = Some(address.into());
        self
    }

    /// Simulate connection loss or recovery
    pub fn set_online(&self, online: bool) {
        debug!(%online, "LocalWorker::set_online: called");
        self.online.store(online, Ordering::SeqCst);
    }

    pub async fn set_task_types(&self, tasks: impl IntoIterator<Item = TaskType>) {
        *self.tasks.write().await = tasks.into_iter().collect();
    }

    pub async fn set_resources(&self, resources: Resources) {
        self.info.write().await.resources = resources;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> eyre::Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(eyre!("worker offline"))
        }
    }
}

#[async_trait]
impl Worker for LocalWorker {
    async fn info(&self) -> eyre::Result<WorkerInfo> {
        self.check_online()?;
        Ok(self.info.read().await.clone())
    }

    async fn task_types(&self) -> eyre::Result<HashSet<TaskType>> {
        self.check_online()?;
        Ok(self.tasks.read().await.clone())
    }

    async fn session(&self) -> eyre::Result<Uuid> {
        self.check_online()?;
        Ok(self.session)
    }

    async fn close(&self) -> eyre::Result<()> {
        debug!("LocalWorker::close: called");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
