//! sealsched - sealing task scheduler for storage-mining workers
//!
//! Callers submit sealing tasks (add-piece, pre-commit, commit, ...) for a
//! sector together with a worker selector and the prepare/work actions to
//! run. A single scheduler loop binds pending requests, in priority order,
//! into execution windows that workers open, and each worker's runner starts
//! the bound requests as its resources allow.
//!
//! # Modules
//!
//! - [`scheduler`] - the `Scheduler` handle, request queue and loop
//! - [`assigner`] - window choice policies
//! - [`selector`] - worker eligibility and ranking
//! - [`worker`] - worker trait, handles, registry and runners
//! - [`tracker`] - in-flight call records over a key-value store
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod assigner;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod scheduler;
pub mod selector;
pub mod simulate;
pub mod tracker;
pub mod worker;

pub use assigner::{Assigner, AssignerKind, LowestUtilization, Spread, WindowCandidate};
pub use config::Config;
pub use domain::{
    CallId, Priority, RegisteredSealProof, ResourceTable, ResourceUsage, Resources, SchedId, SectorId, SectorRef,
    TaskType, WorkerId,
};
pub use error::SchedError;
pub use scheduler::{RequestContext, SchedDiagInfo, SchedWindow, Scheduler, SchedulerConfig};
pub use selector::{AffinitySelector, TaskSelector, Verdict, WorkerSelector};
pub use tracker::CallTracker;
pub use worker::{LocalWorker, Worker, WorkerAction, WorkerHandle, WorkerInfo, action, noop_action};
