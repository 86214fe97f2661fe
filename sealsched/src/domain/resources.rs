//! Resource accounting
//!
//! A worker advertises a capacity `Resources`. Each task type has a footprint
//! looked up in a `ResourceTable`. Reservations on a worker are split into a
//! preparing phase and an active phase, and `preparing + active` must never
//! exceed capacity in any dimension unless the reservation bypasses limits.

use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use super::task::TaskType;

/// One gibibyte, the unit RAM and scratch profiles are written in
pub const GIB: u64 = 1 << 30;

/// Amount of each schedulable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// CPU threads
    pub cpus: u64,
    /// Memory in bytes
    pub ram: u64,
    /// GPU slots
    pub gpus: u64,
    /// Scratch space in bytes
    pub scratch: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpus: 0,
        ram: 0,
        gpus: 0,
        scratch: 0,
    };

    pub fn new(cpus: u64, ram: u64, gpus: u64, scratch: u64) -> Self {
        Self {
            cpus,
            ram,
            gpus,
            scratch,
        }
    }

    /// Whether every dimension is within `capacity`
    pub fn fits_within(&self, capacity: &Resources) -> bool {
        self.cpus <= capacity.cpus
            && self.ram <= capacity.ram
            && self.gpus <= capacity.gpus
            && self.scratch <= capacity.scratch
    }

    /// Dimension-wise subtraction clamped at zero
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpus: self.cpus.saturating_sub(other.cpus),
            ram: self.ram.saturating_sub(other.ram),
            gpus: self.gpus.saturating_sub(other.gpus),
            scratch: self.scratch.saturating_sub(other.scratch),
        }
    }

    /// Highest used/capacity ratio over all dimensions the capacity has
    pub fn utilization(&self, capacity: &Resources) -> f64 {
        fn ratio(used: u64, cap: u64) -> f64 {
            match (used, cap) {
                (0, _) => 0.0,
                (_, 0) => 1.0,
                (u, c) => u as f64 / c as f64,
            }
        }

        ratio(self.cpus, capacity.cpus)
            .max(ratio(self.ram, capacity.ram))
            .max(ratio(self.gpus, capacity.gpus))
            .max(ratio(self.scratch, capacity.scratch))
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpus: self.cpus.saturating_add(rhs.cpus),
            ram: self.ram.saturating_add(rhs.ram),
            gpus: self.gpus.saturating_add(rhs.gpus),
            scratch: self.scratch.saturating_add(rhs.scratch),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={} ram={}MiB gpu={} scratch={}MiB",
            self.cpus,
            self.ram >> 20,
            self.gpus,
            self.scratch >> 20
        )
    }
}

/// Footprint per task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTable {
    profiles: HashMap<TaskType, Resources>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        for task in TaskType::ALL {
            profiles.insert(task, default_profile(task));
        }
        Self { profiles }
    }
}

fn default_profile(task: TaskType) -> Resources {
    match task {
        TaskType::AddPiece => Resources::new(1, GIB, 0, 32 * GIB),
        TaskType::PreCommit1 => Resources::new(1, 56 * GIB, 0, 64 * GIB),
        TaskType::PreCommit2 => Resources::new(8, 16 * GIB, 1, 32 * GIB),
        TaskType::Commit1 => Resources::new(1, GIB, 0, 0),
        TaskType::Commit2 => Resources::new(8, 190 * GIB, 1, 0),
        TaskType::Finalize | TaskType::FinalizeReplicaUpdate => Resources::new(1, GIB, 0, 0),
        TaskType::Fetch => Resources::new(1, GIB, 0, 32 * GIB),
        TaskType::Unseal => Resources::new(1, 56 * GIB, 0, 32 * GIB),
        TaskType::ReplicaUpdate | TaskType::RegenSectorKey => Resources::new(4, 8 * GIB, 1, 32 * GIB),
        TaskType::ProveReplicaUpdate1 => Resources::new(1, GIB, 0, 0),
        TaskType::ProveReplicaUpdate2 => Resources::new(8, 190 * GIB, 1, 0),
    }
}

impl ResourceTable {
    /// Table where every task type needs exactly `footprint`
    pub fn uniform(footprint: Resources) -> Self {
        Self {
            profiles: TaskType::ALL.iter().map(|t| (*t, footprint)).collect(),
        }
    }

    /// Footprint of one task of the given type
    pub fn get(&self, task: TaskType) -> Resources {
        self.profiles.get(&task).copied().unwrap_or_else(|| default_profile(task))
    }

    /// Override the footprint of one task type
    pub fn set(&mut self, task: TaskType, footprint: Resources) {
        self.profiles.insert(task, footprint);
    }

    /// Apply overrides on top of this table
    pub fn merged(mut self, overrides: &HashMap<TaskType, Resources>) -> Self {
        for (task, footprint) in overrides {
            self.profiles.insert(*task, *footprint);
        }
        self
    }
}

/// Reservations held on one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResourceUsage {
    pub preparing: Resources,
    pub active: Resources,
}

impl ResourceUsage {
    /// Sum of both phases
    pub fn total(&self) -> Resources {
        self.preparing + self.active
    }

    /// Whether `need` fits on top of current reservations
    pub fn can_handle(&self, need: &Resources, capacity: &Resources) -> bool {
        (self.total() + *need).fits_within(capacity)
    }

    /// Reserve `need` in the preparing phase
    ///
    /// Returns false and changes nothing if the reservation would exceed
    /// capacity and `bypass` is not set.
    pub fn reserve(&mut self, need: Resources, capacity: &Resources, bypass: bool) -> bool {
        if !bypass && !self.can_handle(&need, capacity) {
            return false;
        }
        self.preparing += need;
        true
    }

    /// Move `need` from preparing to active
    pub fn promote(&mut self, need: Resources) {
        self.preparing = self.preparing.saturating_sub(&need);
        self.active += need;
    }

    /// Release a preparing reservation that never became active
    pub fn release_preparing(&mut self, need: Resources) {
        self.preparing = self.preparing.saturating_sub(&need);
    }

    /// Release an active reservation
    pub fn release_active(&mut self, need: Resources) {
        self.active = self.active.saturating_sub(&need);
    }

    /// Utilization of the combined reservations
    pub fn utilization(&self, capacity: &Resources) -> f64 {
        self.total().utilization(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> Resources {
        Resources::new(4, 8 * GIB, 1, 100 * GIB)
    }

    #[test]
    fn test_reserve_respects_capacity() {
        let mut usage = ResourceUsage::default();
        let need = Resources::new(2, 4 * GIB, 0, 10 * GIB);

        assert!(usage.reserve(need, &cap(), false));
        assert!(usage.reserve(need, &cap(), false));
        // Third would need 6 cpus
        assert!(!usage.reserve(need, &cap(), false));
        assert_eq!(usage.total(), Resources::new(4, 8 * GIB, 0, 20 * GIB));
        assert!(usage.total().fits_within(&cap()));
    }

    #[test]
    fn test_bypass_ignores_capacity() {
        let mut usage = ResourceUsage::default();
        let need = Resources::new(8, 0, 0, 0);
        assert!(!usage.reserve(need, &cap(), false));
        assert!(usage.reserve(need, &cap(), true));
        assert!(!usage.total().fits_within(&cap()));
    }

    #[test]
    fn test_promote_and_release() {
        let mut usage = ResourceUsage::default();
        let need = Resources::new(1, GIB, 1, 0);
        assert!(usage.reserve(need, &cap(), false));

        usage.promote(need);
        assert_eq!(usage.preparing, Resources::ZERO);
        assert_eq!(usage.active, need);

        // GPU slot is taken
        assert!(!usage.can_handle(&need, &cap()));

        usage.release_active(need);
        assert_eq!(usage.total(), Resources::ZERO);
    }

    #[test]
    fn test_utilization_takes_max_dimension() {
        let used = Resources::new(1, 6 * GIB, 0, 0);
        let util = used.utilization(&cap());
        assert!((util - 0.75).abs() < f64::EPSILON);
        assert_eq!(Resources::ZERO.utilization(&Resources::ZERO), 0.0);
        assert_eq!(Resources::new(0, 0, 1, 0).utilization(&Resources::ZERO), 1.0);
    }

    #[test]
    fn test_table_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(TaskType::PreCommit1, Resources::new(2, GIB, 0, 0));

        let table = ResourceTable::default().merged(&overrides);
        assert_eq!(table.get(TaskType::PreCommit1), Resources::new(2, GIB, 0, 0));
        assert_eq!(table.get(TaskType::Commit2), default_profile(TaskType::Commit2));

        let uniform = ResourceTable::uniform(Resources::new(1, 0, 0, 0));
        assert_eq!(uniform.get(TaskType::Fetch).cpus, 1);
    }
}
