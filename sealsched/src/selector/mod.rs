//! Worker selectors
//!
//! A selector comes with every scheduling request and decides which workers
//! may run it and which of two workers is the better fit.

use async_trait::async_trait;

use crate::domain::{RegisteredSealProof, TaskType};
use crate::worker::WorkerHandle;

mod affinity;
mod task;

pub use affinity::AffinitySelector;
pub use task::TaskSelector;

/// Result of checking one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    /// The worker may run the task
    pub eligible: bool,
    /// The worker should win over every non-preferred candidate
    pub preferred: bool,
}

impl Verdict {
    pub const REJECT: Verdict = Verdict {
        eligible: false,
        preferred: false,
    };

    pub const ACCEPT: Verdict = Verdict {
        eligible: true,
        preferred: false,
    };

    pub const PREFER: Verdict = Verdict {
        eligible: true,
        preferred: true,
    };

    pub fn from_eligible(eligible: bool) -> Self {
        if eligible { Self::ACCEPT } else { Self::REJECT }
    }
}

/// Caller-supplied worker eligibility and ranking
#[async_trait]
pub trait WorkerSelector: Send + Sync {
    /// Whether `worker` may run `task` on a sector of the given proof type
    async fn ok(&self, task: TaskType, proof: RegisteredSealProof, worker: &WorkerHandle) -> eyre::Result<Verdict>;

    /// Whether `a` is a better choice than `b`
    async fn cmp(&self, task: TaskType, a: &WorkerHandle, b: &WorkerHandle) -> eyre::Result<bool>;
}
