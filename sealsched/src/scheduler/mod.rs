//! Sealing task scheduler
//!
//! `Scheduler` is the client side; a single loop task owns the pending
//! request queue and the workers' open window offers and runs assignment
//! passes over them.

mod config;
mod core;
mod diag;
mod handle;
mod messages;
mod queue;
pub(crate) mod request;
mod window;

pub use config::SchedulerConfig;
pub use diag::{SchedDiagInfo, SchedDiagRequestInfo};
pub use handle::Scheduler;
pub use messages::DisableCleanup;
pub use queue::RequestQueue;
pub use request::{RequestContext, WorkerRequest};
pub use window::{SchedWindow, SchedWindowRequest};
