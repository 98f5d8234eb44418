//! Cadence classification.
//!
//! Decides whether a cycle holds telecined film (which carries a repeated
//! frame) or true video (where every frame is unique). Match evidence comes
//! from the field matcher's codes, metric evidence from the difference
//! metrics. A single cycle's verdict is only trusted when a neighbor or a
//! scene change backs it up.

use crate::cycle::{check_match_dup, Cycle, CycleType, MatchCode};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Ratio under which cycle metrics are considered uniform.
const VARIANCE_RATIO: f64 = 1.6;
/// Spread under which cycle metrics are considered uniform.
const VARIANCE_SPREAD: f64 = 2.0;
/// Floor for the uniformity test so static content is not called video.
const VARIANCE_FLOOR: f64 = 0.3;

/// Which evidence must agree before a cycle is treated as video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoDetect {
    /// Match evidence only.
    Matches,
    /// Metric evidence only.
    Metrics,
    /// Either kind of evidence.
    Either,
    /// Both kinds of evidence.
    #[default]
    Both,
    /// Both kinds, with uniform metrics also counting as metric evidence.
    BothWithVariance,
}

impl VideoDetect {
    /// Map the numeric setting 0..=4.
    pub fn from_index(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Matches),
            1 => Some(Self::Metrics),
            2 => Some(Self::Either),
            3 => Some(Self::Both),
            4 => Some(Self::BothWithVariance),
            _ => None,
        }
    }

    /// Whether the uniform-metric test is enabled.
    pub fn variance_check(&self) -> bool {
        matches!(self, Self::BothWithVariance)
    }

    fn uses_matches(&self) -> bool {
        matches!(self, Self::Matches | Self::Either)
    }

    fn uses_metrics(&self) -> bool {
        matches!(self, Self::Metrics | Self::Either)
    }
}

/// Classify `curr` from match transitions, pairing its first slot with the
/// last slot of `prev`.
pub fn check_video_matches(prev: &Cycle, curr: &mut Cycle) {
    let pred_last = if prev.frame == curr.frame {
        None
    } else {
        prev.last_match()
    };
    apply_match_evidence(pred_last, curr);
}

/// Classify a cycle from its own match transitions only.
pub fn check_video_matches_self(curr: &mut Cycle) {
    apply_match_evidence(None, curr);
}

fn apply_match_evidence(pred_last: Option<MatchCode>, curr: &mut Cycle) {
    if !curr.metrics_set
        || !matches!(
            curr.kind,
            CycleType::Unset | CycleType::Film | CycleType::VideoByMetric
        )
    {
        return;
    }
    let repeats = curr.slots().any(|i| {
        let pred = if i == curr.cycle_s {
            pred_last
        } else {
            Some(curr.match_at(i - 1))
        };
        check_match_dup(pred, curr.match_at(i))
    });
    curr.kind = match (repeats, curr.kind) {
        (false, CycleType::Unset | CycleType::Film) => CycleType::VideoByMatch,
        (false, CycleType::VideoByMetric) => CycleType::VideoByBoth,
        (true, CycleType::Unset) => CycleType::Film,
        (_, kind) => kind,
    };
    trace!(frame = curr.frame, kind = ?curr.kind, "match classification");
}

/// Classify a cycle from its normalized metrics.
pub fn check_video_metrics(curr: &mut Cycle, thresh: f64, variance_check: bool) {
    if !curr.metrics_set
        || !matches!(
            curr.kind,
            CycleType::Unset | CycleType::Film | CycleType::VideoByMatch
        )
    {
        return;
    }
    let mut dups = 0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for i in curr.slots() {
        if curr.source_frame(i) == 0 {
            continue;
        }
        let v = curr.diff_n[i];
        if v <= thresh {
            dups += 1;
        }
        min = min.min(v);
        max = max.max(v);
    }
    if min == 0.0 {
        min = 0.0001;
    }
    let uniform = variance_check
        && max / min < VARIANCE_RATIO
        && max - min < VARIANCE_SPREAD
        && max >= VARIANCE_FLOOR;
    let video = dups == 0 || uniform;
    curr.kind = match (video, curr.kind) {
        (true, CycleType::Unset | CycleType::Film) => CycleType::VideoByMetric,
        (true, CycleType::VideoByMatch) => CycleType::VideoByBoth,
        (false, CycleType::Unset) => CycleType::Film,
        (_, kind) => kind,
    };
    trace!(frame = curr.frame, kind = ?curr.kind, dups, "metric classification");
}

#[derive(Debug, Clone, Copy)]
enum Evidence {
    Matches,
    Metrics,
}

impl Evidence {
    fn present_in(self, kind: CycleType) -> bool {
        match self {
            Self::Matches => kind.has_match_evidence(),
            Self::Metrics => kind.has_metric_evidence(),
        }
    }

    fn neighbor_kind(self) -> CycleType {
        match self {
            Self::Matches => CycleType::VideoByMatch,
            Self::Metrics => CycleType::VideoByMetric,
        }
    }

    fn accepted_by(self, policy: VideoDetect) -> bool {
        match self {
            Self::Matches => policy.uses_matches(),
            Self::Metrics => policy.uses_metrics(),
        }
    }
}

fn neighbor_forced_video(prev: &Cycle, next: &Cycle) -> bool {
    prev.kind == CycleType::ForcedVideo || next.kind == CycleType::ForcedVideo
}

fn neighbor_video_by_both(prev: &Cycle, next: &Cycle) -> bool {
    prev.kind == CycleType::VideoByBoth || next.kind == CycleType::VideoByBoth
}

fn neighbor_same_evidence(
    prev: &Cycle,
    next: &Cycle,
    evidence: Evidence,
    policy: VideoDetect,
) -> bool {
    evidence.accepted_by(policy)
        && (prev.kind == evidence.neighbor_kind() || next.kind == evidence.neighbor_kind())
}

fn single_cycle_suffices(con_cycle: u32) -> bool {
    con_cycle == 1
}

fn evidence_holds(
    prev: &Cycle,
    curr: &Cycle,
    next: &Cycle,
    evidence: Evidence,
    policy: VideoDetect,
    con_cycle: u32,
    scene_found: bool,
) -> bool {
    evidence.present_in(curr.kind)
        && !curr.is_film_d2v
        && (neighbor_forced_video(prev, next)
            || neighbor_same_evidence(prev, next, evidence, policy)
            || neighbor_video_by_both(prev, next)
            || single_cycle_suffices(con_cycle)
            || scene_found)
}

/// Final video verdict for `curr` given its neighbors.
pub fn is_video(
    prev: &Cycle,
    curr: &Cycle,
    next: &Cycle,
    policy: VideoDetect,
    con_cycle: u32,
    scene_found: bool,
) -> bool {
    if curr.kind == CycleType::ForcedVideo {
        return true;
    }
    let by_matches = evidence_holds(
        prev,
        curr,
        next,
        Evidence::Matches,
        policy,
        con_cycle,
        scene_found,
    );
    let by_metrics = evidence_holds(
        prev,
        curr,
        next,
        Evidence::Metrics,
        policy,
        con_cycle,
        scene_found,
    );
    match policy {
        VideoDetect::Matches => by_matches,
        VideoDetect::Metrics => by_metrics,
        VideoDetect::Either => by_matches || by_metrics,
        VideoDetect::Both | VideoDetect::BothWithVariance => by_matches && by_metrics,
    }
}

/// Video verdict from `curr`'s own classification, without asking the
/// neighbors. The two-pass planner uses this and settles short video runs
/// afterwards.
pub fn is_video_uncorroborated(curr: &Cycle, policy: VideoDetect) -> bool {
    if curr.kind == CycleType::ForcedVideo {
        return true;
    }
    if curr.is_film_d2v {
        return false;
    }
    match policy {
        VideoDetect::Matches => curr.kind.has_match_evidence(),
        VideoDetect::Metrics => curr.kind.has_metric_evidence(),
        VideoDetect::Either => curr.kind.is_video_candidate(),
        VideoDetect::Both | VideoDetect::BothWithVariance => curr.kind == CycleType::VideoByBoth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_film_by_matches() {
        let prev = cycle_with(5, &[9, 9, 9, 9, 9], "cnpcn");
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "cnpcn");
        check_video_matches(&prev, &mut curr);
        assert_eq!(curr.kind, CycleType::Film);
    }

    #[test]
    fn test_video_by_matches() {
        let prev = cycle_with(5, &[9, 9, 9, 9, 9], "ccccc");
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        check_video_matches(&prev, &mut curr);
        assert_eq!(curr.kind, CycleType::VideoByMatch);
        check_video_metrics(&mut curr, 1.1, false);
        assert_eq!(curr.kind, CycleType::VideoByBoth);
    }

    #[test]
    fn test_metric_dup_is_film() {
        let mut curr = cycle_with(10, &[9, 9, 0, 9, 9], "ccccc");
        check_video_metrics(&mut curr, 1.1, false);
        assert_eq!(curr.kind, CycleType::Film);
        // film from metrics can still be upgraded by match evidence
        check_video_matches_self(&mut curr);
        assert_eq!(curr.kind, CycleType::VideoByMatch);
    }

    #[test]
    fn test_variance_check() {
        let mut curr = cycle_with(10, &[1, 1, 1, 1, 1], "ccccc");
        for v in curr.diff_n.iter_mut() {
            *v = 1.0;
        }
        check_video_metrics(&mut curr, 1.1, false);
        assert_eq!(curr.kind, CycleType::Film);

        let mut curr = cycle_with(10, &[1, 1, 1, 1, 1], "ccccc");
        for v in curr.diff_n.iter_mut() {
            *v = 1.0;
        }
        check_video_metrics(&mut curr, 1.1, true);
        assert_eq!(curr.kind, CycleType::VideoByMetric);
    }

    #[test]
    fn test_forced_kinds_untouched() {
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        curr.kind = CycleType::ForcedFilm;
        check_video_matches_self(&mut curr);
        check_video_metrics(&mut curr, 1.1, false);
        assert_eq!(curr.kind, CycleType::ForcedFilm);
    }

    #[test]
    fn test_is_video_policies() {
        let film = cycle_with(5, &[9, 9, 0, 9, 9], "cnpcn");
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        curr.kind = CycleType::VideoByMatch;
        assert!(is_video(&film, &curr, &film, VideoDetect::Matches, 1, false));
        assert!(!is_video(&film, &curr, &film, VideoDetect::Matches, 2, false));
        assert!(is_video(&film, &curr, &film, VideoDetect::Matches, 2, true));
        assert!(!is_video(&film, &curr, &film, VideoDetect::Both, 1, false));
        assert!(is_video(&film, &curr, &film, VideoDetect::Either, 1, false));

        curr.kind = CycleType::VideoByBoth;
        assert!(is_video(&film, &curr, &film, VideoDetect::Both, 1, false));
        curr.is_film_d2v = true;
        assert!(!is_video(&film, &curr, &film, VideoDetect::Both, 1, false));
    }

    #[test]
    fn test_neighbor_corroboration() {
        let mut prev = cycle_with(5, &[9, 9, 9, 9, 9], "ccccc");
        let next = cycle_with(15, &[9, 9, 0, 9, 9], "cnpcn");
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        curr.kind = CycleType::VideoByMetric;
        prev.kind = CycleType::VideoByMetric;
        assert!(is_video(&prev, &curr, &next, VideoDetect::Metrics, 2, false));
        // a match-only neighbor does not back metric evidence under Metrics
        prev.kind = CycleType::VideoByMatch;
        assert!(!is_video(&prev, &curr, &next, VideoDetect::Metrics, 2, false));
        prev.kind = CycleType::ForcedVideo;
        assert!(is_video(&prev, &curr, &next, VideoDetect::Metrics, 2, false));
    }

    #[test]
    fn test_uncorroborated_verdict() {
        let mut curr = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        curr.kind = CycleType::VideoByMetric;
        assert!(is_video_uncorroborated(&curr, VideoDetect::Metrics));
        assert!(is_video_uncorroborated(&curr, VideoDetect::Either));
        assert!(!is_video_uncorroborated(&curr, VideoDetect::Both));
        curr.kind = CycleType::ForcedVideo;
        curr.is_film_d2v = true;
        assert!(is_video_uncorroborated(&curr, VideoDetect::Matches));
    }
}
