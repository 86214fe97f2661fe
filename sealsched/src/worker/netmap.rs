//! Worker network identity lookups, for diagnostics only

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::WorkerId;

#[derive(Default)]
struct Maps {
    worker_addr: HashMap<WorkerId, String>,
    host_addr: HashMap<String, String>,
}

/// Bidirectional worker/address and hostname/address maps
#[derive(Default)]
pub struct NetMap {
    maps: RwLock<Maps>,
}

impl NetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, worker: WorkerId, hostname: &str, address: &str) {
        let mut maps = self.maps.write().await;
        maps.worker_addr.insert(worker, address.to_string());
        maps.host_addr.insert(hostname.to_string(), address.to_string());
    }

    pub async fn remove(&self, worker: WorkerId) {
        let mut maps = self.maps.write().await;
        if let Some(address) = maps.worker_addr.remove(&worker) {
            maps.host_addr.retain(|_, a| *a != address);
        }
    }

    /// Resolve `(worker, hostname)` pairs under a single read lock
    ///
    /// A worker id no longer in the map falls back to its hostname.
    pub async fn addresses(&self, workers: &[(WorkerId, String)]) -> HashMap<WorkerId, String> {
        let maps = self.maps.read().await;
        workers
            .iter()
            .filter_map(|(id, hostname)| {
                maps.worker_addr
                    .get(id)
                    .or_else(|| maps.host_addr.get(hostname))
                    .map(|a| (*id, a.clone()))
            })
            .collect()
    }
}
