//! Longest-string selection.
//!
//! Metric duplicates are grouped into runs of consecutive slots (runs may
//! continue into the neighboring cycles) and drops are taken from the
//! longest run first. Telecine leaves one duplicate per cycle, so the run
//! that crosses a cycle boundary tells which side the repeat belongs to.

use super::{apply_two, rules, SelectorConfig};
use crate::cycle::{Cycle, SlotDecision};

/// Score given to a run that has nothing left to drop.
const EXHAUSTED: i64 = -20;

pub(super) fn decide(config: &SelectorConfig, p: &mut Cycle, c: &mut Cycle, n: &mut Cycle) {
    for cycle in [&mut *p, &mut *c, &mut *n] {
        if !cycle.dups_set {
            cycle.set_dups(config.dup_thresh);
        }
    }
    let quota = c.drop_quota();
    let hint = if config.cycle_r == 1 {
        rules::d2v_hint(p, c, n, true)
    } else {
        None
    };
    if c.dup_count == 0 && hint.is_none() {
        if !c.lowest_set {
            c.set_lowest(false);
        }
        c.set_decimate_low(quota);
        return;
    }

    let forced = c.drop_count();
    if forced >= quota {
        c.decided = true;
        return;
    }
    if config.cycle_r == 1 {
        if let Some(slot) = rules::obvious_single_dup(p, c, n) {
            c.drop_slot(slot);
            c.decided = true;
            return;
        }
        if let Some((first, second)) = rules::two_drop_pattern_change(p, c, n) {
            apply_two(config, c, first, second);
            return;
        }
        if forced == 0 && end_corroborated(config, p, c, n) {
            return;
        }
    }
    if let Some(slot) = hint {
        if c.drop_slot(slot) {
            c.decided = true;
            return;
        }
    }

    let taken = run_search(p, c, n, quota - forced);
    c.decided = true;
    if taken < quota - forced {
        c.set_lowest(true);
        c.set_decimate_low_p(quota - forced - taken);
    }
}

fn first_isolated(
    p: &Cycle,
    c: &Cycle,
    n: &Cycle,
    slots: impl Iterator<Item = usize>,
) -> Option<usize> {
    for i in slots {
        if rules::is_isolated_dup(p, c, n, i) {
            return Some(i);
        }
        if c.dup[i] {
            return None;
        }
    }
    None
}

/// Which end of the cycle a neighbor vouches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndPick {
    First,
    Last,
    Both,
}

/// Isolated duplicates at the ends of the cycle that line up with a
/// neighbor's lone duplicate (or a neighbor with none).
fn end_corroborated(config: &SelectorConfig, p: &Cycle, c: &mut Cycle, n: &Cycle) -> bool {
    if c.length <= 2 || c.dup_count <= 1 || (p.dup_count > 1 && n.dup_count > 1) {
        return false;
    }
    let c1 = first_isolated(p, c, n, c.slots());
    let c2 = first_isolated(p, c, n, c.slots().rev());

    let first_dup = |cy: &Cycle| cy.slots().find(|&i| cy.dup[i]);
    let mut vouched_prev = false;
    let mut vouched_next = false;
    let mut prev_side = false;
    let mut next_side = false;

    if let Some(c1) = c1 {
        if p.dup_count <= 1 {
            let p1 = if p.dup_count == 0 && (p.valid_len() == p.length || n.dup_count != c.dup_count)
            {
                vouched_prev = true;
                Some(c1)
            } else {
                first_dup(p)
            };
            prev_side = p1 == Some(c1);
        }
    }
    if let Some(c2) = c2 {
        if n.dup_count <= 1 {
            let n1 = if n.dup_count == 0 && (n.valid_len() == n.length || p.dup_count != c.dup_count)
            {
                vouched_next = true;
                Some(c2)
            } else {
                first_dup(n)
            };
            next_side = n1 == Some(c2);
        }
    }

    let pick = match (prev_side, next_side) {
        (true, true) => EndPick::Both,
        (true, false) => EndPick::First,
        (false, true) => EndPick::Last,
        (false, false) => return false,
    };
    let dropped = match (pick, c1, c2) {
        (EndPick::First, Some(first), _) => c.drop_slot(first),
        (EndPick::Last, _, Some(last)) => c.drop_slot(last),
        (EndPick::Both, Some(first), Some(last)) if config.keep_one_of_two => {
            let drop_first = match (vouched_prev, vouched_next) {
                (true, false) => false,
                (false, true) => true,
                _ => c.metric(first) <= c.metric(last),
            };
            c.drop_slot(if drop_first { first } else { last })
        }
        (EndPick::Both, Some(first), Some(last)) => {
            apply_two(config, c, first, last);
            true
        }
        _ => false,
    };
    if !dropped {
        return false;
    }
    c.decided = true;
    true
}

#[derive(Debug, Clone, Copy)]
struct DupRun {
    score: i64,
    start: usize,
    end: usize,
}

fn collect_runs(p: &Cycle, c: &Cycle, n: &Cycle) -> Vec<DupRun> {
    let mut runs = Vec::new();
    let mut i = c.cycle_s;
    while i < c.cycle_e {
        if !c.dup[i] {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i;
        while end < c.cycle_e && c.dup[end] {
            end += 1;
        }
        let mut forward = (end - start) as i64;
        if end == c.cycle_e {
            forward += n.slots().take_while(|&g| n.dup[g]).count() as i64;
        }
        let mut back = 1;
        if start == 0 && !p.is_empty() {
            back += p
                .slots()
                .rev()
                .take_while(|&g| p.dup[g] && p.decimate2[g] != SlotDecision::Drop)
                .count() as i64;
        }
        runs.push(DupRun {
            score: back + forward - 1,
            start,
            end,
        });
        i = end;
    }
    runs
}

fn sort_runs(runs: &mut [DupRun]) {
    runs.sort_by(|a, b| b.score.cmp(&a.score).then(a.start.cmp(&b.start)));
}

fn consume(run: &mut DupRun, dropped_inside: usize) {
    if run.end as i64 - run.start as i64 - dropped_inside as i64 - 1 <= 0 {
        run.score = EXHAUSTED;
    } else {
        run.score -= 1;
    }
}

/// Drop from the highest-scoring runs; returns how many drops were made.
fn run_search(p: &Cycle, c: &mut Cycle, n: &Cycle, wanted: usize) -> usize {
    let mut runs = collect_runs(p, c, n);
    if runs.is_empty() {
        return 0;
    }
    // forced drops already use up part of their run
    for i in c.slots() {
        if c.is_dropped(i) {
            for run in runs.iter_mut().filter(|r| (r.start..r.end).contains(&i)) {
                consume(run, 0);
            }
        }
    }
    sort_runs(&mut runs);

    let mut taken = 0;
    while taken < c.dup_count && taken < wanted {
        let top = runs[0];
        if top.score < 1 {
            break;
        }
        let candidate = (top.start..top.end)
            .filter(|&i| c.decimate[i] == SlotDecision::Unset && c.can_drop(i))
            .min_by_key(|&i| (c.metric(i), i));
        let Some(slot) = candidate else {
            // only forced keeps left in this run
            runs[0].score = EXHAUSTED;
            sort_runs(&mut runs);
            continue;
        };
        let dropped_inside = (top.start..top.end).filter(|&i| c.is_dropped(i)).count();
        c.decimate[slot] = SlotDecision::Drop;
        if let Some(y) = (top.start..c.cycle_e).find(|&y| c.decimate2[y] != SlotDecision::Drop) {
            c.decimate2[y] = SlotDecision::Drop;
        }
        consume(&mut runs[0], dropped_inside);
        sort_runs(&mut runs);
        taken += 1;
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use crate::cycle::BlendOutcome;
    use pretty_assertions::assert_eq;

    fn run(p: &mut Cycle, c: &mut Cycle, n: &mut Cycle) {
        decide(&SelectorConfig::default(), p, c, n);
    }

    #[test]
    fn test_no_dups_takes_lowest() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 38, 20, 41, 39], "ccccc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        run(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![2]);
        assert!(c.decided);
    }

    #[test]
    fn test_longest_run_wins() {
        let mut p = cycle_with(100, &[40, 1, 40, 1, 40], "ccccc");
        let mut c = cycle_with(105, &[1, 40, 1, 0, 40], "ccccc");
        let mut n = cycle_with(110, &[40, 1, 40, 1, 40], "ccccc");
        run(&mut p, &mut c, &mut n);
        // the two-long run at slots 2..4 outranks the single at 0
        assert_eq!(c.dropped_slots(), vec![3]);
    }

    #[test]
    fn test_run_extends_into_next() {
        let mut p = cycle_with(100, &[40, 1, 40, 1, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 1, 40, 40, 1], "ccccc");
        let mut n = cycle_with(110, &[1, 40, 40, 40, 40], "ccccc");
        run(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![4]);
    }

    #[test]
    fn test_end_corroborated_pair() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[1, 40, 40, 40, 0], "ccccc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        let config = SelectorConfig {
            keep_one_of_two: false,
            ..Default::default()
        };
        decide(&config, &mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![0, 4]);
        assert_eq!(c.outcome, BlendOutcome::TwoDuplicates);

        let mut c = cycle_with(105, &[1, 40, 40, 40, 0], "ccccc");
        run(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![4]);
    }

    #[test]
    fn test_forced_drop_fills_quota() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 1, 40, 40, 40], "ccccc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        c.drop_slot(3);
        run(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![3]);
    }

    #[test]
    fn test_forced_keep_respected() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 1, 0, 40, 40], "ccccc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        c.forced_keep[2] = true;
        c.decimate[2] = SlotDecision::Keep;
        run(&mut p, &mut c, &mut n);
        assert_eq!(c.dropped_slots(), vec![1]);
    }

    #[test]
    fn test_forced_keep_on_only_dup_falls_back_to_lowest() {
        let mut p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 1, 40, 40, 39], "ccccc");
        let mut n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        c.forced_keep[1] = true;
        c.decimate[1] = SlotDecision::Keep;
        run(&mut p, &mut c, &mut n);
        assert!(c.decided);
        assert_eq!(c.drop_count(), c.drop_quota());
        assert_eq!(c.dropped_slots(), vec![4]);
    }

    #[test]
    fn test_run_search_skips_exhausted_run() {
        let p = cycle_with(100, &[40, 40, 40, 40, 40], "ccccc");
        let mut c = cycle_with(105, &[40, 1, 40, 0, 40], "ccccc");
        let n = cycle_with(110, &[40, 40, 40, 40, 40], "ccccc");
        c.set_dups(SelectorConfig::default().dup_thresh);
        c.forced_keep[1] = true;
        c.decimate[1] = SlotDecision::Keep;
        assert_eq!(run_search(&p, &mut c, &n, 1), 1);
        assert_eq!(c.dropped_slots(), vec![3]);
    }
}
