//! Lowest-utilization policy

use super::{Assigner, WindowCandidate, first_min_by};

/// Picks the worker left with the most headroom after taking the request
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestUtilization;

impl Assigner for LowestUtilization {
    fn name(&self) -> &'static str {
        "utilization"
    }

    fn pick(&self, candidates: &[WindowCandidate]) -> Option<usize> {
        first_min_by(candidates, |c| c.utilization)
    }
}
