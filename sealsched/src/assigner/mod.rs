//! Assignment policies
//!
//! Every policy shares one pass (`try_sched`): walk the queue in priority
//! order, find the open windows whose worker the request's selector accepts
//! and that have room, rank them with the selector, then let the policy pick
//! one. Policies only differ in that last choice.

use std::str::FromStr;

use serde::Serialize;

use crate::domain::WorkerId;
use crate::error::SchedError;

mod pass;
mod spread;
mod utilization;

pub(crate) use pass::{PassOutcome, try_sched};
pub use spread::Spread;
pub use utilization::LowestUtilization;

/// An open window a request could be bound into
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowCandidate {
    /// Index into the open window list
    pub window: usize,
    pub worker: WorkerId,
    /// Worker utilization if the request were added
    pub utilization: f64,
    /// Requests already bound to the worker and not yet started
    pub bound: usize,
}

/// Window choice policy
pub trait Assigner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick one of `candidates`, which arrive ranked best-first by the selector
    ///
    /// Returns an index into `candidates`. Ties should keep selector order.
    fn pick(&self, candidates: &[WindowCandidate]) -> Option<usize>;
}

/// Configured policy name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignerKind {
    #[default]
    Utilization,
    Spread,
}

impl AssignerKind {
    pub fn build(self) -> Box<dyn Assigner> {
        match self {
            AssignerKind::Utilization => Box::new(LowestUtilization),
            AssignerKind::Spread => Box::new(Spread),
        }
    }
}

impl FromStr for AssignerKind {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "utilization" => Ok(AssignerKind::Utilization),
            "spread" => Ok(AssignerKind::Spread),
            other => Err(SchedError::UnknownAssigner(other.to_string())),
        }
    }
}

impl std::fmt::Display for AssignerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignerKind::Utilization => write!(f, "utilization"),
            AssignerKind::Spread => write!(f, "spread"),
        }
    }
}

/// Index of the first candidate minimising `metric`
fn first_min_by<F>(candidates: &[WindowCandidate], metric: F) -> Option<usize>
where
    F: Fn(&WindowCandidate) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let value = metric(candidate);
        match best {
            Some((_, current)) if value >= current => {}
            _ => best = Some((i, value)),
        }
    }
    best.map(|(i, _)| i)
}
