//! Cadence windows.
//!
//! A [`Cycle`] is one cadence period of consecutive source frames together
//! with everything the decimator has learned about them: difference
//! metrics, field-matching codes and the per-slot drop decisions. The
//! scheduler keeps four of them alive (previous, current, next and a
//! prefetch buffer) and rotates them as output advances.

use std::fmt;
use std::ops::Range;

/// Field match chosen by the upstream matcher for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchCode {
    /// Matched against the previous field.
    P,
    /// Matched against the current field.
    C,
    /// Matched against the next field.
    N,
    /// Previous-frame match from the opposite parity.
    B,
    /// Next-frame match from the opposite parity.
    U,
    /// Post-processed blend using the bottom field.
    L,
    /// Post-processed blend using the top field.
    H,
    /// No match information available.
    #[default]
    Unknown,
}

impl MatchCode {
    /// Parse a single-letter match code.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(Self::P),
            'c' => Some(Self::C),
            'n' => Some(Self::N),
            'b' => Some(Self::B),
            'u' => Some(Self::U),
            'l' => Some(Self::L),
            'h' => Some(Self::H),
            _ => None,
        }
    }

    /// Single-letter representation.
    pub fn as_char(&self) -> char {
        match self {
            Self::P => 'p',
            Self::C => 'c',
            Self::N => 'n',
            Self::B => 'b',
            Self::U => 'u',
            Self::L => 'l',
            Self::H => 'h',
            Self::Unknown => '?',
        }
    }

    /// Reinterpret a top-field match in bottom-field terms.
    pub fn swap_field(self) -> Self {
        match self {
            Self::P => Self::B,
            Self::B => Self::P,
            Self::N => Self::U,
            Self::U => Self::N,
            other => other,
        }
    }
}

impl fmt::Display for MatchCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Whether a frame matched with `curr` repeats the frame before it,
/// matched with `prev`.
///
/// `prev` is `None` when there is no predecessor to pair with; an unknown
/// current match always counts as a repeat.
pub fn check_match_dup(prev: Option<MatchCode>, curr: MatchCode) -> bool {
    use MatchCode::*;
    if curr == Unknown {
        return true;
    }
    matches!(
        (prev, curr),
        (Some(P), B)
            | (Some(C), P | B)
            | (Some(N), C | B | U | H)
            | (Some(B), P)
            | (Some(U), P | C | N | L)
            | (Some(L), B)
            | (Some(H), P)
    )
}

/// Drop decision for one slot of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotDecision {
    /// No decision yet.
    #[default]
    Unset,
    /// Slot must be output.
    Keep,
    /// Slot is removed.
    Drop,
}

/// Content classification of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    /// Not classified yet.
    #[default]
    Unset,
    /// Telecined film.
    Film,
    /// Film by override or forced drop.
    ForcedFilm,
    /// Video because no match transition repeats a frame.
    VideoByMatch,
    /// Video because no metric falls under the duplicate threshold.
    VideoByMetric,
    /// Video by both match and metric evidence.
    VideoByBoth,
    /// Video by override.
    ForcedVideo,
}

impl CycleType {
    /// Whether the classifier considers this cycle a video candidate.
    pub fn is_video_candidate(&self) -> bool {
        matches!(
            self,
            Self::VideoByMatch | Self::VideoByMetric | Self::VideoByBoth | Self::ForcedVideo
        )
    }

    /// Carries match evidence for video.
    pub fn has_match_evidence(&self) -> bool {
        matches!(self, Self::VideoByMatch | Self::VideoByBoth)
    }

    /// Carries metric evidence for video.
    pub fn has_metric_evidence(&self) -> bool {
        matches!(self, Self::VideoByMetric | Self::VideoByBoth)
    }
}

/// How the output of a decided cycle is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendOutcome {
    /// Plain film cycle with the normal drop count.
    #[default]
    SingleDrop,
    /// Video cycle, nothing decimated.
    Video,
    /// Video cycle that drops the frame at a scene boundary.
    SceneDrop,
    /// Film cycle with two duplicates that are both dropped.
    TwoDuplicates,
}

const UNANCHORED: i64 = i64::MIN / 2;

/// One cadence period of source frames.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Source frame of slot 0; negative before the stream start.
    pub frame: i64,
    /// Number of slots.
    pub length: usize,
    /// Index of the last source frame.
    pub max_frame: i64,
    /// First valid source frame.
    pub frame_so: i64,
    /// One past the last valid source frame.
    pub frame_eo: i64,
    /// First valid slot.
    pub cycle_s: usize,
    /// One past the last valid slot.
    pub cycle_e: usize,
    /// Worst-block difference against the previous frame.
    pub diff_u: Vec<Option<u64>>,
    /// `diff_u` scaled to 0..100.
    pub diff_n: Vec<f64>,
    /// Whole-frame difference against the previous frame.
    pub diff_uf: Vec<Option<u64>>,
    /// Match codes; `None` until read.
    pub matches: Vec<Option<MatchCode>>,
    /// External film hint.
    pub film_d2v: Vec<bool>,
    /// Drop decisions.
    pub decimate: Vec<SlotDecision>,
    /// Position bookkeeping for the run search and forced removals.
    pub decimate2: Vec<SlotDecision>,
    /// Keep directives from overrides.
    pub forced_keep: Vec<bool>,
    /// Looks-like-a-duplicate flags.
    pub dup: Vec<bool>,
    /// Content classification.
    pub kind: CycleType,
    /// Output production for this cycle.
    pub outcome: BlendOutcome,
    /// Number of set `dup` flags.
    pub dup_count: usize,
    /// Two lowest-metric slots.
    pub lowest: [Option<usize>; 2],
    /// Metrics are populated.
    pub metrics_set: bool,
    /// Duplicate flags are computed.
    pub dups_set: bool,
    /// `lowest` is computed.
    pub lowest_set: bool,
    /// Drop decisions are final.
    pub decided: bool,
    /// Some slot carries a film hint.
    pub is_film_d2v: bool,
    cycle_r: usize,
    sdlim: i32,
}

impl Cycle {
    /// Create an unanchored cycle.
    pub fn new(length: usize, cycle_r: usize, max_frame: i64) -> Self {
        Self {
            frame: UNANCHORED,
            length,
            max_frame,
            frame_so: 0,
            frame_eo: 0,
            cycle_s: 0,
            cycle_e: 0,
            diff_u: vec![None; length],
            diff_n: vec![0.0; length],
            diff_uf: vec![None; length],
            matches: vec![None; length],
            film_d2v: vec![false; length],
            decimate: vec![SlotDecision::Unset; length],
            decimate2: vec![SlotDecision::Unset; length],
            forced_keep: vec![false; length],
            dup: vec![false; length],
            kind: CycleType::Unset,
            outcome: BlendOutcome::SingleDrop,
            dup_count: 0,
            lowest: [None; 2],
            metrics_set: false,
            dups_set: false,
            lowest_set: false,
            decided: false,
            is_film_d2v: false,
            cycle_r,
            sdlim: 0,
        }
    }

    /// Require lowest-metric picks to be at least `|sdlim| + 1` slots apart.
    pub fn with_sdlim(mut self, sdlim: i32) -> Self {
        self.sdlim = sdlim;
        self
    }

    /// Whether the cycle has been anchored since creation.
    pub fn is_anchored(&self) -> bool {
        self.frame != UNANCHORED
    }

    /// Re-anchor at `frame` and forget everything.
    pub fn set_frame(&mut self, frame: i64) {
        self.frame = frame;
        self.frame_so = frame.max(0);
        self.frame_eo = (frame + self.length as i64).min(self.max_frame + 1);
        if self.frame_eo < self.frame_so {
            self.frame_eo = self.frame_so;
        }
        self.cycle_s = (self.frame_so - frame) as usize;
        self.cycle_e = (self.frame_eo - frame).max(self.cycle_s as i64) as usize;
        self.cycle_s = self.cycle_s.min(self.length);
        self.cycle_e = self.cycle_e.min(self.length);
        self.reset();
    }

    fn reset(&mut self) {
        self.diff_u.fill(None);
        self.diff_n.fill(0.0);
        self.diff_uf.fill(None);
        self.matches.fill(None);
        self.film_d2v.fill(false);
        self.decimate.fill(SlotDecision::Unset);
        self.decimate2.fill(SlotDecision::Unset);
        self.forced_keep.fill(false);
        self.dup.fill(false);
        self.kind = CycleType::Unset;
        self.outcome = BlendOutcome::SingleDrop;
        self.dup_count = 0;
        self.lowest = [None; 2];
        self.metrics_set = false;
        self.dups_set = false;
        self.lowest_set = false;
        self.decided = false;
        self.is_film_d2v = false;
    }

    /// Valid slot range.
    pub fn slots(&self) -> Range<usize> {
        self.cycle_s..self.cycle_e
    }

    /// Number of valid slots.
    pub fn valid_len(&self) -> usize {
        self.cycle_e - self.cycle_s
    }

    /// No valid slots.
    pub fn is_empty(&self) -> bool {
        self.cycle_e <= self.cycle_s
    }

    /// Source frame index of a slot.
    pub fn source_frame(&self, slot: usize) -> i64 {
        self.frame + slot as i64
    }

    /// Drops required for this cycle, scaled down for partial cycles.
    pub fn drop_quota(&self) -> usize {
        let len = self.valid_len();
        if len == self.length {
            self.cycle_r
        } else {
            ((self.cycle_r * len) / self.length).max(1)
        }
    }

    /// Raw metric of a slot; unknown metrics compare as largest.
    pub fn metric(&self, slot: usize) -> u64 {
        self.diff_u.get(slot).copied().flatten().unwrap_or(u64::MAX)
    }

    /// Metric used when choosing drops.
    ///
    /// The first frame of the stream has no predecessor, so its metric is
    /// never the lowest.
    pub fn selection_metric(&self, slot: usize) -> u64 {
        if self.source_frame(slot) == 0 {
            u64::MAX
        } else {
            self.metric(slot)
        }
    }

    /// Scene metric of a slot, zero when unknown.
    pub fn scene_metric(&self, slot: usize) -> u64 {
        self.diff_uf.get(slot).copied().flatten().unwrap_or(0)
    }

    /// Match code of a slot.
    pub fn match_at(&self, slot: usize) -> MatchCode {
        self.matches
            .get(slot)
            .copied()
            .flatten()
            .unwrap_or(MatchCode::Unknown)
    }

    /// Match code of the last valid slot, `None` for an empty cycle.
    pub fn last_match(&self) -> Option<MatchCode> {
        if self.is_empty() {
            None
        } else {
            Some(self.match_at(self.cycle_e - 1))
        }
    }

    /// Whether the last valid slot is flagged as a duplicate.
    pub fn last_dup(&self) -> bool {
        !self.is_empty() && self.dup[self.cycle_e - 1]
    }

    /// Whether the first valid slot is flagged as a duplicate.
    pub fn first_dup(&self) -> bool {
        !self.is_empty() && self.dup[self.cycle_s]
    }

    /// Match of the frame preceding `slot`, reaching into `prev` for the
    /// first slot.
    pub fn predecessor_match(&self, prev: &Cycle, slot: usize) -> Option<MatchCode> {
        if slot == self.cycle_s {
            if prev.frame == self.frame {
                None
            } else {
                prev.last_match()
            }
        } else {
            Some(self.match_at(slot - 1))
        }
    }

    /// Whether every metric and hint needed for decisions is present.
    pub fn is_populated(&self) -> bool {
        self.slots().all(|i| {
            self.diff_u[i].is_some() && self.diff_uf[i].is_some() && self.matches[i].is_some()
        })
    }

    /// Flag duplicates whose normalized metric is at or under `thresh`.
    pub fn set_dups(&mut self, thresh: f64) {
        self.dup.fill(false);
        self.dup_count = 0;
        for i in self.slots() {
            if self.source_frame(i) != 0 && self.diff_n[i] <= thresh {
                self.dup[i] = true;
                self.dup_count += 1;
            }
        }
        self.dups_set = true;
    }

    /// Flag duplicates from match transitions.
    pub fn set_dups_matches(&mut self, prev: &Cycle) {
        self.dup.fill(false);
        self.dup_count = 0;
        for i in self.slots() {
            if check_match_dup(self.predecessor_match(prev, i), self.match_at(i)) {
                self.dup[i] = true;
                self.dup_count += 1;
            }
        }
        self.dups_set = true;
    }

    /// Flag duplicates from match transitions using this cycle as its own
    /// predecessor.
    pub fn set_dups_matches_self(&mut self) {
        let snapshot = self.clone();
        self.set_dups_matches(&snapshot);
    }

    /// Find the two lowest-metric slots.
    pub fn set_lowest(&mut self, exclude_decimated: bool) {
        let mut candidates: Vec<usize> = self
            .slots()
            .filter(|&i| !self.forced_keep[i])
            .filter(|&i| !(exclude_decimated && self.decimate[i] == SlotDecision::Drop))
            .collect();
        candidates.sort_by_key(|&i| (self.selection_metric(i), i));
        self.lowest = [candidates.first().copied(), candidates.get(1).copied()];
        self.lowest_set = true;
    }

    /// Whether a slot may be dropped.
    pub fn can_drop(&self, slot: usize) -> bool {
        self.slots().contains(&slot) && !self.forced_keep[slot]
    }

    /// Drop a slot; forced keeps are refused.
    pub fn drop_slot(&mut self, slot: usize) -> bool {
        if !self.can_drop(slot) {
            return false;
        }
        self.decimate[slot] = SlotDecision::Drop;
        self.decimate2[slot] = SlotDecision::Drop;
        true
    }

    /// Undo a drop.
    pub fn undrop_slot(&mut self, slot: usize) {
        if slot < self.length && !self.forced_keep[slot] {
            self.decimate[slot] = SlotDecision::Unset;
            self.decimate2[slot] = SlotDecision::Unset;
        }
    }

    /// Reset every decision except forced keeps.
    pub fn clear_decisions(&mut self) {
        for i in 0..self.length {
            if self.forced_keep[i] {
                self.decimate[i] = SlotDecision::Keep;
                self.decimate2[i] = SlotDecision::Keep;
            } else {
                self.decimate[i] = SlotDecision::Unset;
                self.decimate2[i] = SlotDecision::Unset;
            }
        }
    }

    /// Whether a slot is dropped.
    pub fn is_dropped(&self, slot: usize) -> bool {
        self.decimate.get(slot) == Some(&SlotDecision::Drop)
    }

    /// Number of dropped valid slots.
    pub fn drop_count(&self) -> usize {
        self.slots().filter(|&i| self.is_dropped(i)).count()
    }

    /// Dropped slots in order.
    pub fn dropped_slots(&self) -> Vec<usize> {
        self.slots().filter(|&i| self.is_dropped(i)).collect()
    }

    /// Slots that are output, in order.
    pub fn kept_slots(&self) -> Vec<usize> {
        self.slots().filter(|&i| !self.is_dropped(i)).collect()
    }

    /// The `k`-th kept slot.
    pub fn get_non_dec(&self, k: usize) -> Option<usize> {
        self.slots().filter(|&i| !self.is_dropped(i)).nth(k)
    }

    /// Drop the lowest-metric slots until `num` slots are dropped.
    ///
    /// Existing drops count toward `num`. Decisions become final.
    pub fn set_decimate_low(&mut self, num: usize) {
        let have = self.drop_count();
        if num > have {
            self.drop_lowest(num - have);
        }
        self.decided = true;
    }

    /// Drop `extra` more lowest-metric slots on top of existing drops.
    pub fn set_decimate_low_p(&mut self, extra: usize) {
        self.drop_lowest(extra);
        self.decided = true;
    }

    fn drop_lowest(&mut self, count: usize) {
        let mut candidates: Vec<usize> = self
            .slots()
            .filter(|&i| self.can_drop(i) && !self.is_dropped(i))
            .collect();
        candidates.sort_by_key(|&i| (self.selection_metric(i), i));

        let gap = if self.cycle_r > 1 {
            self.sdlim.unsigned_abs() as usize
        } else {
            0
        };
        let mut picked: Vec<usize> = self.dropped_slots();
        let mut added = 0;
        for &slot in &candidates {
            if added == count {
                break;
            }
            if gap > 0 && picked.iter().any(|&p| p.abs_diff(slot) <= gap) {
                continue;
            }
            picked.push(slot);
            added += 1;
        }
        // relax the spacing when it cannot be satisfied
        for &slot in &candidates {
            if added == count {
                break;
            }
            if !picked.contains(&slot) {
                picked.push(slot);
                added += 1;
            }
        }
        for slot in picked {
            self.drop_slot(slot);
        }
    }

    /// Recompute the film hint summary.
    pub fn set_is_film_d2v(&mut self) {
        self.is_film_d2v = self.slots().any(|i| self.film_d2v[i]);
    }

    /// One-line state dump for diagnostics.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "cycle frame={} slots={}..{} kind={:?} outcome={:?} decided={} [",
            self.frame, self.cycle_s, self.cycle_e, self.kind, self.outcome, self.decided
        );
        for i in self.slots() {
            let d = match self.decimate[i] {
                SlotDecision::Drop => '-',
                SlotDecision::Keep => '+',
                SlotDecision::Unset => '.',
            };
            let metric = self.diff_u[i].map_or_else(|| "?".to_string(), |m| m.to_string());
            out.push_str(&format!(" {}{}:{}", d, self.match_at(i), metric));
        }
        out.push_str(" ]");
        out
    }
}
