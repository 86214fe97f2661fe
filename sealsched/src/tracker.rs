//! Call tracking
//!
//! Records work that has been dispatched to a worker, keyed by call id, so a
//! restarted scheduler can tell which calls were in flight. A second record
//! per sector remembers the worker that last ran something on it; selectors
//! and diagnostics use it for locality.
//!
//! Keys:
//! - `call/<uuid>` holds a [`CallRecord`] while the call is prepared or running
//! - `sector/<sector-id>` holds the latest [`SectorRecord`]
//!
//! Requests that completed successfully are also remembered in memory by
//! scheduling id, up to a fixed number, so a resubmission under the same id
//! is recognised instead of run twice.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use callstore::{KvStore, KvStoreExt, StoreError, StoreResult, now_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::domain::{CallId, SchedId, SectorId, TaskType, WorkerId};

const CALL_PREFIX: &str = "call/";
const SECTOR_PREFIX: &str = "sector/";

/// Completed scheduling ids kept by default
pub const DEFAULT_DONE_CAPACITY: usize = 4096;

fn sector_key(sector: &SectorId) -> String {
    format!("{}{}", SECTOR_PREFIX, sector)
}

/// Phase of a tracked call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Prepared,
    Running,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Prepared => write!(f, "prepared"),
            CallState::Running => write!(f, "running"),
        }
    }
}

/// Where a call runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CallPlacement {
    pub worker: WorkerId,
    pub hostname: String,
    pub address: Option<String>,
}

/// A call that was dispatched and has not completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CallRecord {
    pub call: CallId,
    pub task: TaskType,
    pub state: CallState,
    #[serde(flatten)]
    pub placement: CallPlacement,
    pub started_at: i64,
    pub updated_at: i64,
}

/// Last worker that ran something on a sector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SectorRecord {
    pub sector: SectorId,
    pub task: TaskType,
    #[serde(flatten)]
    pub placement: CallPlacement,
    pub updated_at: i64,
}

/// Completed ids, oldest evicted first once `capacity` is reached
struct DoneSet {
    ids: HashSet<SchedId>,
    order: VecDeque<SchedId>,
    capacity: usize,
}

impl DoneSet {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, id: SchedId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// In-flight call registry over a key-value store
pub struct CallTracker {
    store: Arc<dyn KvStore>,
    done: Mutex<DoneSet>,
}

impl CallTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_done_capacity(store, DEFAULT_DONE_CAPACITY)
    }

    /// Tracker remembering at most `capacity` completed scheduling ids
    pub fn with_done_capacity(store: Arc<dyn KvStore>, capacity: usize) -> Self {
        Self {
            store,
            done: Mutex::new(DoneSet::new(capacity)),
        }
    }

    /// Record a call whose prepare step is starting
    pub fn prepared(&self, call: CallId, task: TaskType, placement: CallPlacement) -> StoreResult<()> {
        debug!(%call, %task, worker = %placement.worker, "CallTracker::prepared: called");
        let now = now_ms();
        let record = CallRecord {
            call,
            task,
            state: CallState::Prepared,
            placement: placement.clone(),
            started_at: now,
            updated_at: now,
        };
        self.store.put_json(&call.store_key(), &record)?;

        let sector = SectorRecord {
            sector: call.sector,
            task,
            placement,
            updated_at: now,
        };
        self.store.put_json(&sector_key(&call.sector), &sector)
    }

    /// Mark a prepared call as running its main work
    pub fn running(&self, call: CallId) -> StoreResult<()> {
        debug!(%call, "CallTracker::running: called");
        let key = call.store_key();
        match self.store.get_json::<CallRecord>(&key)? {
            Some(mut record) => {
                record.state = CallState::Running;
                record.updated_at = now_ms();
                self.store.put_json(&key, &record)
            }
            None => {
                error!(%call, "Running call has no tracker record");
                Ok(())
            }
        }
    }

    /// Drop the record of a call that returned, successfully or not
    pub fn finish(&self, call: CallId) -> StoreResult<()> {
        debug!(%call, "CallTracker::finish: called");
        self.store.delete(&call.store_key())?;
        Ok(())
    }

    /// Remember that the request with this scheduling id completed successfully
    pub fn mark_done(&self, sched_id: SchedId) -> StoreResult<()> {
        debug!(%sched_id, "CallTracker::mark_done: called");
        self.done.lock().map_err(|_| StoreError::Poisoned)?.insert(sched_id);
        Ok(())
    }

    /// Whether a request with this scheduling id already completed
    pub fn is_done(&self, sched_id: SchedId) -> bool {
        self.done.lock().map(|done| done.ids.contains(&sched_id)).unwrap_or(false)
    }

    /// Number of completed ids currently remembered
    pub fn done_len(&self) -> usize {
        self.done.lock().map(|done| done.ids.len()).unwrap_or(0)
    }

    pub fn get(&self, call: &CallId) -> StoreResult<Option<CallRecord>> {
        self.store.get_json(&call.store_key())
    }

    /// Worker last associated with a sector
    pub fn last_worker(&self, sector: &SectorId) -> StoreResult<Option<SectorRecord>> {
        self.store.get_json(&sector_key(sector))
    }

    /// Calls left prepared or running, e.g. by a previous process
    pub fn recover(&self) -> StoreResult<Vec<CallRecord>> {
        let keys = self.store.list(CALL_PREFIX)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.store.get_json::<CallRecord>(&key)? {
                records.push(record);
            }
        }
        if !records.is_empty() {
            info!(count = records.len(), "Recovered tracked calls");
        }
        Ok(records)
    }

    /// Every sector record, in key order
    pub fn sectors(&self) -> StoreResult<Vec<SectorRecord>> {
        let mut records = Vec::new();
        for key in self.store.list(SECTOR_PREFIX)? {
            if let Some(record) = self.store.get_json::<SectorRecord>(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
