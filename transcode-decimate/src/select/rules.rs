//! Corroboration rules shared by the selection strategies.
//!
//! Each rule inspects the current cycle and its neighbors and either names
//! the slot(s) to drop or declines.

use crate::cycle::{check_match_dup, Cycle, MatchCode};

/// Slots of `c` whose match repeats the previous frame. `pred_last` is the
/// match of the frame before the first slot.
pub fn match_dups(c: &Cycle, pred_last: Option<MatchCode>) -> Vec<usize> {
    c.slots()
        .filter(|&i| {
            let pred = if i == c.cycle_s {
                pred_last
            } else {
                Some(c.match_at(i - 1))
            };
            check_match_dup(pred, c.match_at(i))
        })
        .collect()
}

/// Slot with the lowest selection metric; ties go to the earlier slot.
pub fn lowest_slot(c: &Cycle) -> Option<usize> {
    c.slots().min_by_key(|&i| (c.selection_metric(i), i))
}

/// Two lowest slots in metric order.
pub fn two_lowest(c: &Cycle) -> (Option<usize>, Option<usize>) {
    let mut slots: Vec<usize> = c.slots().collect();
    slots.sort_by_key(|&i| (c.selection_metric(i), i));
    (slots.first().copied(), slots.get(1).copied())
}

/// Whether a flagged duplicate has no flagged duplicate on either side,
/// looking across the cycle edges into the neighbors.
pub fn is_isolated_dup(p: &Cycle, c: &Cycle, n: &Cycle, i: usize) -> bool {
    let left_clear = if i == c.cycle_s {
        !p.last_dup()
    } else {
        !c.dup[i - 1]
    };
    let right_clear = if i + 1 == c.cycle_e {
        !n.first_dup()
    } else {
        !c.dup[i + 1]
    };
    c.dup[i] && left_clear && right_clear
}

/// The previous cycle's single match duplicate, if it is also its lowest
/// metric. A previous cycle without duplicates whose first slot is lowest
/// counts as a duplicate there.
pub fn prev_single_dup(p: &Cycle) -> Option<usize> {
    let low = lowest_slot(p)?;
    let dups = match_dups(p, None);
    if dups.is_empty() && low == p.cycle_s {
        return Some(low);
    }
    (dups.len() == 1 && dups[0] == low).then_some(low)
}

/// The next cycle's single match duplicate, if it is also its lowest
/// metric.
pub fn next_single_dup(c: &Cycle, n: &Cycle) -> Option<usize> {
    let low = lowest_slot(n)?;
    let dups = match_dups(n, c.last_match());
    (dups.len() == 1 && dups[0] == low).then_some(low)
}

/// A single slot flagged as d2v film that is also a match duplicate or the
/// lowest metric. With `strict`, both neighbors must carry the hint at the
/// same position.
pub fn d2v_hint(p: &Cycle, c: &Cycle, n: &Cycle, strict: bool) -> Option<usize> {
    let mut hinted = None;
    let mut matched = None;
    for i in c.slots() {
        let corroborated =
            !strict || (p.film_d2v.get(i) == Some(&true) && n.film_d2v.get(i) == Some(&true));
        if c.film_d2v[i] && corroborated {
            if hinted.is_some() {
                return None;
            }
            hinted = Some(i);
            if check_match_dup(c.predecessor_match(p, i), c.match_at(i)) {
                matched = Some(i);
            }
        }
    }
    let slot = hinted?;
    let confirmed = matched == Some(slot) || lowest_slot(c) == Some(slot);
    (confirmed && c.can_drop(slot)).then_some(slot)
}

/// Exactly one match duplicate that is the lowest metric, at the same
/// position as a neighbor's confirmed single duplicate.
pub fn obvious_single_dup(p: &Cycle, c: &Cycle, n: &Cycle) -> Option<usize> {
    let dups = match_dups(c, p.last_match());
    if dups.len() != 1 {
        return None;
    }
    let saved = dups[0];
    if lowest_slot(c) != Some(saved) || !c.can_drop(saved) {
        return None;
    }
    match prev_single_dup(p) {
        Some(cp) => (cp == saved).then_some(saved),
        None => (next_single_dup(c, n) == Some(saved)).then_some(saved),
    }
}

/// Two match duplicates marking a cadence change: they sit where the
/// previous and next cycles have their single duplicates, are the two
/// lowest metrics, are not adjacent and no other frame looks duplicated.
pub fn two_drop_pattern_change(p: &Cycle, c: &Cycle, n: &Cycle) -> Option<(usize, usize)> {
    let sp = prev_single_dup(p)?;
    let sn = next_single_dup(c, n)?;
    if sn == sp {
        return None;
    }
    let dups = match_dups(c, p.last_match());
    if dups.len() != 2 {
        return None;
    }
    let (c1, c2) = (dups[0], dups[1]);
    let (l1, l2) = two_lowest(c);
    let lowest = [l1, l2];
    if !lowest.contains(&Some(c1)) || !lowest.contains(&Some(c2)) {
        return None;
    }
    if c1 != sp || c2 != sn || c1.abs_diff(c2) <= 1 {
        return None;
    }
    if c.slots().any(|i| c.dup[i] && i != c1 && i != c2) {
        return None;
    }
    let c1_clear = if c1 == c.cycle_s {
        !p.last_dup() && !c.dup[c1 + 1]
    } else {
        !c.dup[c1 - 1] && !c.dup[c1 + 1]
    };
    let c2_clear = if c2 + 1 == c.cycle_e {
        !n.first_dup() && !c.dup[c2 - 1]
    } else {
        !c.dup[c2 - 1] && !c.dup[c2 + 1]
    };
    (c1_clear && c2_clear && c.can_drop(c1) && c.can_drop(c2)).then_some((c1, c2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_match_dups() {
        let c = cycle_with(5, &[1, 1, 1, 1, 1], "ccpcc");
        assert_eq!(match_dups(&c, Some(MatchCode::C)), vec![2]);
        assert_eq!(match_dups(&c, Some(MatchCode::U)), vec![0, 2]);
    }

    #[test]
    fn test_obvious_single_dup() {
        let p = cycle_with(0, &[30, 30, 1, 30, 30], "ccpcc");
        let c = cycle_with(5, &[30, 30, 1, 30, 30], "ccpcc");
        let n = cycle_with(10, &[30, 30, 1, 30, 30], "ccpcc");
        assert_eq!(prev_single_dup(&p), Some(2));
        assert_eq!(next_single_dup(&c, &n), Some(2));
        assert_eq!(obvious_single_dup(&p, &c, &n), Some(2));

        // the duplicate must also be the lowest metric
        let c = cycle_with(5, &[30, 0, 1, 30, 30], "ccpcc");
        assert_eq!(obvious_single_dup(&p, &c, &n), None);
    }

    #[test]
    fn test_d2v_hint() {
        let p = cycle_with(0, &[30, 30, 30, 30, 30], "ccccc");
        let mut c = cycle_with(5, &[30, 30, 2, 30, 30], "ccccc");
        let n = cycle_with(10, &[30, 30, 30, 30, 30], "ccccc");
        c.film_d2v[2] = true;
        assert_eq!(d2v_hint(&p, &c, &n, false), Some(2));
        assert_eq!(d2v_hint(&p, &c, &n, true), None);
        c.film_d2v[3] = true;
        assert_eq!(d2v_hint(&p, &c, &n, false), None);
    }

    #[test]
    fn test_two_drop_pattern_change() {
        let p = cycle_with(0, &[30, 1, 30, 30, 30], "cpccc");
        let c = cycle_with(5, &[30, 1, 30, 2, 30], "cpcpc");
        let n = cycle_with(10, &[30, 30, 30, 1, 30], "cccpc");
        assert_eq!(prev_single_dup(&p), Some(1));
        assert_eq!(next_single_dup(&c, &n), Some(3));
        assert_eq!(two_drop_pattern_change(&p, &c, &n), Some((1, 3)));
    }

    #[test]
    fn test_isolated_dup() {
        let p = cycle_with(0, &[30, 30, 30, 30, 30], "ccccc");
        let mut c = cycle_with(5, &[30, 30, 30, 30, 30], "ccccc");
        let n = cycle_with(10, &[30, 30, 30, 30, 30], "ccccc");
        c.dup = vec![true, false, true, true, false];
        assert!(is_isolated_dup(&p, &c, &n, 0));
        assert!(!is_isolated_dup(&p, &c, &n, 2));
        assert!(!is_isolated_dup(&p, &c, &n, 1));
    }
}
