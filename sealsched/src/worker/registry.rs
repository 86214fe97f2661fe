//! Authoritative worker id to handle map

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::WorkerId;

use super::{NetMap, WorkerHandle};

/// All known workers
///
/// The map lock is the outer lock: it may be held while taking a handle's
/// lock, never the other way round.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Arc<WorkerHandle>>>,
    netmap: NetMap,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle and record its network identity
    pub async fn insert(&self, handle: Arc<WorkerHandle>) {
        let id = handle.id();
        let info = handle.info().await;
        info!(%id, hostname = %info.hostname, resources = %info.resources, "Registering worker");

        if let Some(address) = &info.address {
            self.netmap.insert(id, &info.hostname, address).await;
        }
        self.workers.write().await.insert(id, handle);
    }

    pub async fn get(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        debug!(%id, "WorkerRegistry::remove: called");
        let removed = self.workers.write().await.remove(&id);
        if removed.is_some() {
            self.netmap.remove(id).await;
        }
        removed
    }

    pub async fn contains(&self, id: WorkerId) -> bool {
        self.workers.read().await.contains_key(&id)
    }

    /// Handles for the given ids, taken under one read lock
    pub async fn lookup(&self, ids: &[WorkerId]) -> HashMap<WorkerId, Arc<WorkerHandle>> {
        let workers = self.workers.read().await;
        ids.iter()
            .filter_map(|id| workers.get(id).map(|h| (*id, h.clone())))
            .collect()
    }

    /// Every handle, ordered by id
    pub async fn handles(&self) -> Vec<Arc<WorkerHandle>> {
        let workers = self.workers.read().await;
        let mut handles: Vec<_> = workers.values().cloned().collect();
        handles.sort_by_key(|h| h.id());
        handles
    }

    pub fn netmap(&self) -> &NetMap {
        &self.netmap
    }
}
