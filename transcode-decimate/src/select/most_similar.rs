//! Most-similar selection: match duplicates guide the pick, the lowest
//! difference metric settles everything else.

use super::{apply_single, apply_two, rules, SelectorConfig};
use crate::cycle::Cycle;

/// Maximum relative gap between a duplicate's metric and the lowest.
const CLOSE_RATIO: f64 = 0.9;
/// Maximum normalized gap between a duplicate and the lowest.
const CLOSE_NORMALIZED: f64 = 0.20;
/// Maximum normalized gap for an isolated duplicate pick.
const ISOLATED_NORMALIZED: f64 = 1.0;

pub(super) fn decide(config: &SelectorConfig, p: &mut Cycle, c: &mut Cycle, n: &mut Cycle) {
    let quota = c.drop_quota();
    if !c.lowest_set {
        c.set_lowest(false);
    }
    if config.cycle_r > 1 {
        c.set_decimate_low(quota);
        return;
    }
    if !p.dups_set {
        p.set_dups_matches_self();
    }
    if !c.dups_set {
        c.set_dups_matches(p);
    }
    if !n.dups_set {
        n.set_dups_matches(c);
    }

    let hint = rules::d2v_hint(p, c, n, false);
    if c.dup_count == 0 && hint.is_none() {
        c.set_decimate_low(quota);
        return;
    }
    // override drops take the place of every heuristic
    if c.drop_count() > 0 {
        c.set_decimate_low(quota);
        return;
    }
    if let Some(slot) = hint {
        apply_single(c, slot, quota);
        return;
    }

    if c.dup_count == 1 {
        match confirmed_single_dup(p, c, n) {
            Some(slot) => apply_single(c, slot, quota),
            // unconfirmed duplicate: fall back to the lowest metric
            None => c.set_decimate_low(quota),
        }
        return;
    }

    if let Some((first, second)) = neighbor_aligned_pair(p, c, n) {
        apply_two(config, c, first, second);
        return;
    }
    match isolated_dup(p, c, n) {
        Some(slot) => apply_single(c, slot, quota),
        None => c.set_decimate_low(quota),
    }
}

fn first_dup(c: &Cycle) -> Option<usize> {
    c.slots().find(|&i| c.dup[i])
}

/// The single flagged duplicate, accepted when its metric is close to the
/// lowest or both neighbors have a lone duplicate at the same slot.
fn confirmed_single_dup(p: &Cycle, c: &Cycle, n: &Cycle) -> Option<usize> {
    let saved = first_dup(c)?;
    if !c.can_drop(saved) {
        return None;
    }
    let low = c.lowest[0]?;
    let close = saved == low
        || c.selection_metric(saved) as f64 * CLOSE_RATIO <= c.selection_metric(low) as f64
        || (c.diff_n[low] - c.diff_n[saved]).abs() < CLOSE_NORMALIZED;
    if close || neighbors_share_dup(p, n, saved) {
        Some(saved)
    } else {
        None
    }
}

fn lone_lowest_dup(c: &Cycle) -> Option<usize> {
    if c.dup_count != 1 {
        return None;
    }
    let slot = first_dup(c)?;
    (rules::lowest_slot(c) == Some(slot)).then_some(slot)
}

fn neighbors_share_dup(p: &Cycle, n: &Cycle, slot: usize) -> bool {
    lone_lowest_dup(p) == Some(slot) && lone_lowest_dup(n) == Some(slot)
}

/// Two duplicates sitting where the previous and next cycles have their
/// lone duplicates, both among the two lowest metrics and not adjacent.
fn neighbor_aligned_pair(p: &Cycle, c: &Cycle, n: &Cycle) -> Option<(usize, usize)> {
    if c.dup_count != 2 {
        return None;
    }
    let saved_p = lone_lowest_dup(p)?;
    let saved_n = lone_lowest_dup(n)?;
    if saved_p == saved_n {
        return None;
    }
    let dups: Vec<usize> = c.slots().filter(|&i| c.dup[i]).collect();
    let (c1, c2) = (dups[0], dups[1]);
    if c1 != saved_p || c2 != saved_n {
        return None;
    }
    let lowest = c.lowest;
    if !lowest.contains(&Some(c1)) || !lowest.contains(&Some(c2)) {
        return None;
    }
    (c1.abs_diff(c2) > 1 && c.can_drop(c1) && c.can_drop(c2)).then_some((c1, c2))
}

/// Isolated duplicate with the strongest motion on both sides.
fn isolated_dup(p: &Cycle, c: &Cycle, n: &Cycle) -> Option<usize> {
    let low = c.lowest[0]?;
    let mut isolated = 0;
    let mut best: Option<(usize, u64)> = None;
    for i in c.slots() {
        if !rules::is_isolated_dup(p, c, n, i) {
            continue;
        }
        isolated += 1;
        let before = if i == c.cycle_s {
            p.cycle_e.checked_sub(1).map_or(u64::MAX, |k| p.metric(k))
        } else {
            c.metric(i - 1)
        };
        let after = if i + 1 == c.cycle_e {
            n.metric(n.cycle_s)
        } else {
            c.metric(i + 1)
        };
        let sum = before.saturating_add(after);
        let better = match best {
            None => true,
            Some((_, best_sum)) => {
                sum > best_sum
                    && before > c.metric(i)
                    && after > c.metric(i)
                    && (c.diff_n[i] - c.diff_n[low]).abs() < ISOLATED_NORMALIZED
            }
        };
        if better {
            best = Some((i, sum));
        }
    }
    let (slot, _) = best?;
    let among_lowest = c.lowest[..isolated.min(2)].contains(&Some(slot));
    (among_lowest && c.can_drop(slot)).then_some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use crate::cycle::BlendOutcome;
    use pretty_assertions::assert_eq;

    fn config() -> SelectorConfig {
        SelectorConfig {
            strategy: super::super::Strategy::MostSimilar,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_match_dup_takes_lowest() {
        let mut p = cycle_with(0, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(5, &[40, 38, 20, 41, 39], "ccccc");
        let mut n = cycle_with(10, &[40, 40, 40, 40, 40], "ccccc");
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![2]);
    }

    #[test]
    fn test_single_dup_close_to_lowest() {
        let mut p = cycle_with(0, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(5, &[400, 380, 30, 28, 390], "ccpcc");
        let mut n = cycle_with(10, &[40, 40, 40, 40, 40], "ccccc");
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![2]);
    }

    #[test]
    fn test_single_dup_far_from_lowest_falls_back() {
        let mut p = cycle_with(0, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(5, &[40, 38, 30, 2, 39], "ccpcc");
        let mut n = cycle_with(10, &[40, 40, 40, 40, 40], "ccccc");
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![3]);
    }

    #[test]
    fn test_single_dup_confirmed_by_neighbors() {
        let mut p = cycle_with(0, &[40, 40, 1, 40, 40], "ccpcc");
        let mut c = cycle_with(5, &[40, 38, 30, 2, 39], "ccpcc");
        let mut n = cycle_with(10, &[40, 40, 1, 40, 40], "ccpcc");
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![2]);
    }

    #[test]
    fn test_aligned_pair() {
        let mut p = cycle_with(100, &[40, 2, 40, 40, 40], "cpccc");
        let mut c = cycle_with(105, &[40, 2, 40, 3, 40], "cpcpc");
        let mut n = cycle_with(110, &[40, 40, 40, 2, 40], "cccpc");
        let cfg = SelectorConfig {
            keep_one_of_two: false,
            ..config()
        };
        decide(&cfg, &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![1, 3]);
        assert_eq!(c.outcome, BlendOutcome::TwoDuplicates);
    }

    #[test]
    fn test_isolated_pick() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 2, 40, 3, 40], "cpcpc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![1]);
    }

    #[test]
    fn test_override_drop_counts() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 2, 40, 3, 40], "cpcpc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        c.drop_slot(4);
        decide(&config(), &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![4]);
    }
}
