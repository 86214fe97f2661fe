//! Spread policy

use super::{Assigner, WindowCandidate, first_min_by};

/// Picks the worker with the fewest bound requests, regardless of free capacity
#[derive(Debug, Clone, Copy, Default)]
pub struct Spread;

impl Assigner for Spread {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn pick(&self, candidates: &[WindowCandidate]) -> Option<usize> {
        first_min_by(candidates, |c| c.bound as f64)
    }
}
