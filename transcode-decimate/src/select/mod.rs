//! Duplicate selection.
//!
//! Given a classified film cycle and its neighbors, choose which slots to
//! drop. Two strategies are available:
//!
//! - **Longest string** flags duplicates by metric threshold and drops from
//!   the longest run of consecutive duplicates first, which tracks the
//!   telecine cadence across cycle boundaries.
//! - **Most similar** flags duplicates by match transitions and otherwise
//!   drops the slot with the lowest difference metric.
//!
//! Both consult a handful of corroboration rules first; each rule lives in
//! its own function in [`rules`].

mod longest_string;
mod most_similar;
pub mod rules;

use crate::cycle::{BlendOutcome, Cycle};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decimation strategy for film cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Drop from the longest run of metric duplicates.
    #[default]
    LongestString,
    /// Drop the most similar frame, guided by match duplicates.
    MostSimilar,
}

/// Settings shared by both strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorConfig {
    /// Strategy to run.
    pub strategy: Strategy,
    /// Cycle length.
    pub cycle: usize,
    /// Frames removed per cycle.
    pub cycle_r: usize,
    /// Normalized metric at or under which a frame is a duplicate.
    pub dup_thresh: f64,
    /// Resolve two-duplicate cycles by keeping one of them instead of
    /// dropping both.
    pub keep_one_of_two: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::LongestString,
            cycle: 5,
            cycle_r: 1,
            dup_thresh: 1.1,
            keep_one_of_two: true,
        }
    }
}

/// Chooses drops for film cycles.
#[derive(Debug, Clone)]
pub struct Selector {
    config: SelectorConfig,
}

impl Selector {
    /// Create a selector.
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Decide the drops of `curr`.
    ///
    /// Neighbors get their duplicate flags filled in as a side effect.
    /// A cycle that is already decided is left untouched.
    pub fn decide(&self, prev: &mut Cycle, curr: &mut Cycle, next: &mut Cycle) {
        if curr.decided || curr.is_empty() {
            return;
        }
        match self.config.strategy {
            Strategy::LongestString => longest_string::decide(&self.config, prev, curr, next),
            Strategy::MostSimilar => most_similar::decide(&self.config, prev, curr, next),
        }
        let quota = curr.drop_quota();
        if curr.drop_count() < quota {
            debug!(
                frame = curr.frame,
                dropped = ?curr.dropped_slots(),
                "picked drops were refused, filling from the lowest metrics"
            );
            curr.set_decimate_low(quota);
        }
        curr.decided = true;
        debug!(
            frame = curr.frame,
            strategy = ?self.config.strategy,
            outcome = ?curr.outcome,
            dropped = ?curr.dropped_slots(),
            "film cycle decided"
        );
    }
}

/// Apply a two-duplicate pick: either drop the lower-metric one or mark the
/// cycle as dropping both.
pub(crate) fn apply_two(config: &SelectorConfig, c: &mut Cycle, first: usize, second: usize) {
    if config.keep_one_of_two {
        let pick = if c.metric(first) <= c.metric(second) {
            first
        } else {
            second
        };
        c.drop_slot(pick);
    } else {
        c.outcome = BlendOutcome::TwoDuplicates;
        c.drop_slot(first);
        c.drop_slot(second);
    }
    c.decided = true;
}

/// Apply a single pick, falling back to the lowest metric if refused.
pub(crate) fn apply_single(c: &mut Cycle, slot: usize, quota: usize) {
    if !c.drop_slot(slot) {
        c.set_decimate_low(quota);
    }
    c.decided = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use crate::cycle::SlotDecision;
    use pretty_assertions::assert_eq;

    fn selector(strategy: Strategy) -> Selector {
        Selector::new(SelectorConfig {
            strategy,
            ..Default::default()
        })
    }

    #[test]
    fn test_steady_cadence_both_strategies() {
        for strategy in [Strategy::LongestString, Strategy::MostSimilar] {
            let mut p = cycle_with(0, &[40, 38, 0, 41, 39], "cnpcn");
            p.set_frame(-5);
            let mut c = cycle_with(0, &[40, 38, 0, 41, 39], "cnpcn");
            let mut n = cycle_with(5, &[40, 38, 0, 41, 39], "cnpcn");
            selector(strategy).decide(&mut p, &mut c, &mut n);
            assert_eq!(c.dropped_slots(), vec![2], "{:?}", strategy);
            assert_eq!(c.kept_slots(), vec![0, 1, 3, 4]);
        }
    }

    #[test]
    fn test_low_metric_without_flagged_dups_both_strategies() {
        for strategy in [Strategy::LongestString, Strategy::MostSimilar] {
            let mut p = cycle_with(0, &[40, 38, 2, 41, 39], "cnpcn");
            p.set_frame(-5);
            let mut c = cycle_with(0, &[40, 38, 2, 41, 39], "cnpcn");
            let mut n = cycle_with(5, &[40, 38, 2, 41, 39], "cnpcn");
            selector(strategy).decide(&mut p, &mut c, &mut n);
            assert_eq!(c.dup_count, 0, "{:?}", strategy);
            assert_eq!(c.dropped_slots(), vec![2], "{:?}", strategy);
            assert_eq!(c.kept_slots(), vec![0, 1, 3, 4]);
        }
    }

    #[test]
    fn test_forced_keep_in_dup_run_still_meets_quota() {
        for strategy in [Strategy::LongestString, Strategy::MostSimilar] {
            let mut p = cycle_with(0, &[40, 40, 40, 40, 40], "ccccc");
            let mut c = cycle_with(5, &[40, 1, 0, 40, 30], "ccpcc");
            let mut n = cycle_with(10, &[40, 40, 40, 40, 40], "ccccc");
            for slot in [1, 2] {
                c.forced_keep[slot] = true;
                c.decimate[slot] = SlotDecision::Keep;
            }
            selector(strategy).decide(&mut p, &mut c, &mut n);
            assert!(c.decided);
            assert_eq!(c.dropped_slots(), vec![4], "{:?}", strategy);
        }
    }

    #[test]
    fn test_decided_is_immutable() {
        let mut p = cycle_with(0, &[40, 38, 2, 41, 39], "cnpcn");
        let mut c = cycle_with(5, &[40, 38, 2, 41, 39], "cnpcn");
        let mut n = cycle_with(10, &[40, 38, 2, 41, 39], "cnpcn");
        c.drop_slot(4);
        c.decided = true;
        selector(Strategy::MostSimilar).decide(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![4]);
    }

    #[test]
    fn test_apply_two_keep_one() {
        let config = SelectorConfig::default();
        let mut c = cycle_with(5, &[40, 3, 40, 2, 40], "ccccc");
        apply_two(&config, &mut c, 1, 3);
        assert_eq!(c.dropped_slots(), vec![3]);
        assert_eq!(c.outcome, BlendOutcome::SingleDrop);

        let config = SelectorConfig {
            keep_one_of_two: false,
            ..Default::default()
        };
        let mut c = cycle_with(5, &[40, 3, 40, 2, 40], "ccccc");
        apply_two(&config, &mut c, 1, 3);
        assert_eq!(c.dropped_slots(), vec![1, 3]);
        assert_eq!(c.outcome, BlendOutcome::TwoDuplicates);
    }
}
