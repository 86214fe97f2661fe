//! Diagnostic snapshots

use serde::Serialize;

use crate::domain::{Priority, SchedId, SectorId, TaskType, WorkerId};

/// One pending request as seen by diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedDiagRequestInfo {
    pub sector: SectorId,
    pub task: TaskType,
    pub priority: Priority,
    pub sched_id: SchedId,
    /// Worker last associated with the sector, if the call tracker knows one
    pub last_worker: Option<WorkerId>,
    pub last_address: Option<String>,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedDiagInfo {
    /// Pending requests in queue order
    pub requests: Vec<SchedDiagRequestInfo>,
    /// Owner of each open window offer
    pub open_windows: Vec<WorkerId>,
    /// False while the initial wait is still running
    pub steady: bool,
}

impl SchedDiagInfo {
    /// Open window offers held by one worker
    pub fn open_windows_for(&self, worker: WorkerId) -> usize {
        self.open_windows.iter().filter(|w| **w == worker).count()
    }

    pub fn sched_ids(&self) -> Vec<SchedId> {
        self.requests.iter().map(|r| r.sched_id).collect()
    }

    pub fn contains(&self, id: SchedId) -> bool {
        self.requests.iter().any(|r| r.sched_id == id)
    }
}
