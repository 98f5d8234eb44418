//! Scene change detection over cycles.
//!
//! Slots returned here name the last frame before the cut, except for a
//! cut entering the cycle, which is reported at the first slot.

use crate::cycle::Cycle;

/// First scene change touching `curr`, checking the transition from `prev`,
/// every interior transition, then the transition into `next`.
pub fn scene_boundary(prev: &Cycle, curr: &Cycle, next: &Cycle, thresh: u64) -> Option<usize> {
    if curr.is_empty() {
        return None;
    }
    if !prev.is_empty() && curr.scene_metric(curr.cycle_s) > thresh {
        return Some(curr.cycle_s);
    }
    if let Some(slot) = interior_cut(curr, thresh) {
        return Some(slot);
    }
    if !next.is_empty() && next.scene_metric(next.cycle_s) > thresh {
        return Some(curr.cycle_e - 1);
    }
    None
}

/// First scene change within a single cycle, including one entering it.
pub fn scene_boundary_within(c: &Cycle, thresh: u64) -> Option<usize> {
    if c.is_empty() {
        return None;
    }
    if c.source_frame(c.cycle_s) > 0 && c.scene_metric(c.cycle_s) > thresh {
        return Some(c.cycle_s);
    }
    interior_cut(c, thresh)
}

fn interior_cut(c: &Cycle, thresh: u64) -> Option<usize> {
    (c.cycle_s + 1..c.cycle_e)
        .find(|&k| c.scene_metric(k) > thresh)
        .map(|k| k - 1)
}

/// Source frame just before the scene change nearest to `curr`, used to
/// keep post-decimation blends from straddling a cut.
pub fn cut_source_frame(prev: &Cycle, curr: &Cycle, next: &Cycle, thresh: u64) -> Option<i64> {
    match scene_boundary(prev, curr, next, thresh) {
        Some(slot) if slot == curr.cycle_s && curr.scene_metric(slot) > thresh => {
            Some(curr.source_frame(slot) - 1)
        }
        Some(slot) => Some(curr.source_frame(slot)),
        None => {
            let enters_next = scene_boundary_within(next, thresh) == Some(next.cycle_s)
                && next.scene_metric(next.cycle_s) > thresh;
            if enters_next && scene_boundary_within(curr, thresh).is_none() {
                Some(curr.source_frame(curr.length) - 1)
            } else {
                None
            }
        }
    }
}
