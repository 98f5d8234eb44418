//! Lookup-table engines: the host keep plan (mode 2) and the prebuilt
//! variable frame rate plans (modes 5 and 6).

use super::Decision;
use crate::error::{DecimateError, Result};
use crate::planner::VfrPlan;
use std::task::Poll;

/// Output frame to source frame table.
#[derive(Debug, Clone, PartialEq)]
pub struct Remap {
    lut: Vec<usize>,
    film: Vec<bool>,
}

impl Remap {
    /// Table from a list of kept source frames.
    pub fn new(lut: Vec<usize>) -> Self {
        let film = vec![true; lut.len()];
        Self { lut, film }
    }

    /// Evenly spaced plan converting `fps` to `rate`.
    pub fn uniform(num_frames: usize, fps: f64, rate: f64) -> Self {
        let count = ((num_frames as f64 * rate / fps) as usize).max(1);
        let ratio = fps / rate;
        let last = num_frames.saturating_sub(1);
        let lut = (0..count)
            .map(|n| ((n as f64 * ratio + 0.5) as usize).min(last))
            .collect();
        Self::new(lut)
    }

    /// Table of a variable frame rate plan.
    pub fn from_plan(plan: VfrPlan) -> Self {
        Self {
            lut: plan.lut,
            film: plan.film,
        }
    }

    /// Number of output frames.
    pub fn len(&self) -> usize {
        self.lut.len()
    }

    pub(crate) fn decide(&self, n: usize) -> Result<Poll<Decision>> {
        let frame = self
            .lut
            .get(n)
            .copied()
            .ok_or_else(|| DecimateError::internal(format!("no plan entry for output {}", n)))?;
        let film = self.film.get(n).copied().unwrap_or(false);
        Ok(Poll::Ready(Decision::single(n, frame, film)))
    }
}
