//! Domain types for sealsched
//!
//! Plain value types shared by the scheduler, workers and selectors:
//! task types, sector references, identifiers, priorities and resources.

mod id;
mod priority;
mod resources;
mod sector;
mod task;

pub use id::{CallId, SchedId, WorkerId};
pub use priority::Priority;
pub use resources::{GIB, ResourceTable, ResourceUsage, Resources};
pub use sector::{MinerId, RegisteredSealProof, SectorId, SectorNumber, SectorRef};
pub use task::TaskType;
