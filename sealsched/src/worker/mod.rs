//! Workers and the per-worker state the scheduler keeps about them
//!
//! A `Worker` is the remote (or local) process that actually runs sealing
//! work. The scheduler wraps each one in a `WorkerHandle` holding its
//! capability cache, resource reservations and windows, and keeps the
//! handles in the `WorkerRegistry`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Resources, TaskType};

mod handle;
mod local;
mod netmap;
mod registry;
mod runner;

pub use handle::{WorkerHandle, WorkerSnapshot};
pub use local::LocalWorker;
pub use netmap::NetMap;
pub use registry::WorkerRegistry;
pub(crate) use runner::spawn_runner;

/// Static description a worker reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub hostname: String,
    /// Network address used to reach the worker, if it has one
    pub address: Option<String>,
    /// Total capacity the worker advertises
    pub resources: Resources,
}

/// Connection to one worker process
#[async_trait]
pub trait Worker: Send + Sync {
    /// Current hostname, address and capacity
    async fn info(&self) -> eyre::Result<WorkerInfo>;

    /// Task types the worker is currently willing to run
    async fn task_types(&self) -> eyre::Result<HashSet<TaskType>>;

    /// Session id of the worker process; errors when the worker is unreachable
    async fn session(&self) -> eyre::Result<Uuid>;

    /// Close the connection
    async fn close(&self) -> eyre::Result<()>;
}

/// Prepare or work callback executed against the worker a request was bound to
pub type WorkerAction = Arc<dyn Fn(Arc<dyn Worker>) -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>;

/// Build a `WorkerAction` from an async closure
pub fn action<F, Fut>(f: F) -> WorkerAction
where
    F: Fn(Arc<dyn Worker>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(move |worker| Box::pin(f(worker)))
}

/// Action that does nothing, for tasks without a prepare step
pub fn noop_action() -> WorkerAction {
    action(|_| async { Ok(()) })
}
