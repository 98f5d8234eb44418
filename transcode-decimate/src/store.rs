//! Per-frame metric storage.
//!
//! Metrics come from two places: an imported metrics file and the values
//! computed while running. Imported values win; computed values fill the
//! gaps and are what gets written back out. Match codes read from frame
//! hints are cached alongside so a cycle can be rebuilt without fetching
//! its frames again.

use crate::cycle::{Cycle, MatchCode};

/// Metrics of a frame against its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetrics {
    /// Worst-block difference.
    pub worst: Option<u64>,
    /// Whole-frame difference.
    pub scene: Option<u64>,
}

impl FrameMetrics {
    /// Both values known.
    pub fn new(worst: u64, scene: u64) -> Self {
        Self {
            worst: Some(worst),
            scene: Some(scene),
        }
    }

    /// Whether both values are known.
    pub fn is_complete(&self) -> bool {
        self.worst.is_some() && self.scene.is_some()
    }

    fn or(self, other: Self) -> Self {
        Self {
            worst: self.worst.or(other.worst),
            scene: self.scene.or(other.scene),
        }
    }
}

/// Match information read from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch {
    /// Match code in bottom-field terms.
    pub code: MatchCode,
    /// Frame is d2v film.
    pub film_d2v: bool,
}

/// Imported and computed metrics for every frame of a clip.
#[derive(Debug, Clone, Default)]
pub struct MetricStore {
    imported: Vec<FrameMetrics>,
    recorded: Vec<FrameMetrics>,
    matches: Vec<Option<FrameMatch>>,
}

impl MetricStore {
    /// Empty store for `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            imported: Vec::new(),
            recorded: vec![FrameMetrics::default(); num_frames],
            matches: vec![None; num_frames],
        }
    }

    /// Use imported metrics ahead of computed ones.
    pub fn with_imported(mut self, imported: Vec<FrameMetrics>) -> Self {
        self.imported = imported;
        self
    }

    /// Best known metrics of a frame.
    pub fn get(&self, frame: usize) -> FrameMetrics {
        let imported = self.imported.get(frame).copied().unwrap_or_default();
        let recorded = self.recorded.get(frame).copied().unwrap_or_default();
        imported.or(recorded)
    }

    /// Whether both metrics of a frame are known.
    pub fn is_known(&self, frame: usize) -> bool {
        self.get(frame).is_complete()
    }

    /// Record computed metrics.
    pub fn record(&mut self, frame: usize, metrics: FrameMetrics) {
        if let Some(slot) = self.recorded.get_mut(frame) {
            *slot = metrics;
        }
    }

    /// Cache the match read from a frame.
    pub fn record_match(&mut self, frame: usize, m: FrameMatch) {
        if let Some(slot) = self.matches.get_mut(frame) {
            *slot = Some(m);
        }
    }

    /// Cached match of a frame.
    pub fn match_at(&self, frame: usize) -> Option<FrameMatch> {
        self.matches.get(frame).copied().flatten()
    }

    /// Best known metrics for every frame.
    pub fn merged(&self) -> Vec<FrameMetrics> {
        (0..self.recorded.len()).map(|f| self.get(f)).collect()
    }

    /// Computed metrics, indexed by frame.
    pub fn recorded(&self) -> &[FrameMetrics] {
        &self.recorded
    }

    /// Whether an imported file covers every frame.
    pub fn imported_complete(&self) -> bool {
        !self.imported.is_empty() && self.imported.iter().all(|m| m.worst.is_some())
    }

    /// Fill the metrics of a cycle from the store; `max_diff` scales the
    /// normalized values. Cached matches fill slots that have none yet.
    /// Returns whether every valid slot has both metrics.
    pub fn apply(&self, c: &mut Cycle, max_diff: u64) -> bool {
        let scale = 100.0 / max_diff.max(1) as f64;
        let mut complete = true;
        for slot in c.slots() {
            let Ok(frame) = usize::try_from(c.source_frame(slot)) else {
                continue;
            };
            let m = self.get(frame);
            if let Some(worst) = m.worst {
                c.diff_u[slot] = Some(worst);
                c.diff_n[slot] = worst as f64 * scale;
            }
            if m.scene.is_some() {
                c.diff_uf[slot] = m.scene;
            }
            if let (None, Some(cached)) = (c.matches[slot], self.match_at(frame)) {
                c.matches[slot] = Some(cached.code);
                c.film_d2v[slot] |= cached.film_d2v;
            }
            complete &= m.is_complete();
        }
        complete
    }
}
