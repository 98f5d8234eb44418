//! Fixed-ratio decimation (modes 0 and 1).
//!
//! Output frame `n` belongs to the cycle starting at
//! `(n / (cycle - r)) * cycle` (with hybrid 3, `(n / cycle) * cycle`).
//! The window is moved to that cycle, the cycle is classified and decided,
//! and the output is picked from its kept slots or blended.

use super::{CycleInfo, Decision, Pull, Selection, Window};
use crate::annotate::Annotator;
use crate::blend::{down_convert_ratios, post_decimation_ratios};
use crate::classify::{check_video_matches, check_video_metrics, is_video, VideoDetect};
use crate::config::{DecimateConfig, Hybrid};
use crate::cycle::{BlendOutcome, Cycle};
use crate::error::{DecimateError, Result};
use crate::rate::Rational;
use crate::scene::{cut_source_frame, scene_boundary};
use crate::select::Selector;
use crate::source::ClipInfo;
use std::task::Poll;
use tracing::debug;

/// Window and decision state of the fixed-ratio modes.
#[derive(Debug)]
pub struct FixedRatio {
    cycle: usize,
    cycle_r: usize,
    hybrid: Hybrid,
    vid_detect: VideoDetect,
    vid_thresh: f64,
    con_cycle: u32,
    scene_thresh: u64,
    last_frame: usize,
    selector: Selector,
    window: Window,
}

impl FixedRatio {
    pub(crate) fn new(config: &DecimateConfig, annotator: &Annotator, info: &ClipInfo) -> Self {
        let last_frame = info.last_frame();
        Self {
            cycle: config.cycle,
            cycle_r: config.cycle_r,
            hybrid: config.hybrid,
            vid_detect: config.vid_detect,
            vid_thresh: config.vid_thresh,
            con_cycle: config.con_cycle,
            scene_thresh: annotator.provider().scene_threshold(config.scene_thresh),
            last_frame,
            selector: Selector::new(config.selector_config()),
            window: Window::new(config.cycle, config.cycle_r, last_frame, config.sdlim),
        }
    }

    /// Output frames per cycle.
    fn per_cycle(&self) -> usize {
        if self.hybrid == Hybrid::UpConvert {
            self.cycle
        } else {
            self.cycle - self.cycle_r
        }
    }

    pub(crate) fn output_frames(&self, input: usize) -> usize {
        input * self.per_cycle() / self.cycle
    }

    pub(crate) fn output_rate(&self, input: Rational) -> Rational {
        input.scale(self.per_cycle() as i64, self.cycle as i64)
    }

    fn group(&self, n: usize) -> i64 {
        ((n / self.per_cycle()) * self.cycle) as i64
    }

    pub(crate) fn decide(
        &mut self,
        n: usize,
        annotator: &mut Annotator,
        pull: &mut Pull<'_>,
    ) -> Result<Poll<Decision>> {
        let g = self.group(n);
        let len = self.cycle as i64;
        let start = if self.window.is_at(g) || self.window.precedes(g) {
            (g - len - 1).max(0) as usize
        } else {
            0
        };
        let end = ((g + 3 * len) as usize).min(self.last_frame);
        ready!(pull.prepare(annotator, start..=end)?);

        self.seek(g, annotator)?;
        let (selection, film) = self.select(n)?;
        let curr = &self.window.curr;
        let cycle = (n % self.per_cycle() == 0).then(|| CycleInfo {
            start: curr.frame,
            metrics: curr.slots().map(|i| curr.metric(i)).collect(),
        });
        Ok(Poll::Ready(Decision {
            output: n,
            selection,
            film,
            cycle,
        }))
    }

    /// Bring `curr` to the cycle starting at `g`, deciding every cycle
    /// passed on the way.
    fn seek(&mut self, g: i64, annotator: &Annotator) -> Result<()> {
        if self.window.is_at(g) {
            return Ok(());
        }
        if !self.window.precedes(g) {
            if self.window.curr.is_anchored() {
                debug!(
                    from = self.window.curr.frame,
                    to = g,
                    "non-sequential access, rebuilding the window from the start"
                );
            }
            self.window.reset(0);
            let w = &mut self.window;
            fill(&mut w.prev, annotator)?;
            fill(&mut w.curr, annotator)?;
            fill(&mut w.next, annotator)?;
            fill(&mut w.nbuf, annotator)?;
            self.classify_window();
            self.decide_curr();
        }
        while !self.window.is_at(g) {
            self.window.rotate();
            fill(&mut self.window.nbuf, annotator)?;
            if self.hybrid.detects_video() {
                let w = &mut self.window;
                classify(&w.next, &mut w.nbuf, self.vid_thresh, self.vid_detect);
            }
            self.decide_curr();
        }
        Ok(())
    }

    fn classify_window(&mut self) {
        if !self.hybrid.detects_video() {
            return;
        }
        let w = &mut self.window;
        let (thresh, policy) = (self.vid_thresh, self.vid_detect);
        classify(&w.prev.clone(), &mut w.prev, thresh, policy);
        classify(&w.prev, &mut w.curr, thresh, policy);
        classify(&w.curr, &mut w.next, thresh, policy);
        classify(&w.next, &mut w.nbuf, thresh, policy);
    }

    fn decide_curr(&mut self) {
        let thresh = self.scene_thresh;
        let (p, c, nx) = self.window.triple_mut();
        if c.decided || c.is_empty() {
            return;
        }
        if self.hybrid.detects_video() && c.kind.is_video_candidate() {
            let scene = scene_boundary(p, c, nx, thresh);
            if is_video(p, c, nx, self.vid_detect, self.con_cycle, scene.is_some()) {
                match scene {
                    Some(slot) if self.hybrid != Hybrid::UpConvert => scene_drop(c, slot),
                    _ => c.outcome = BlendOutcome::Video,
                }
                c.decided = true;
                debug!(
                    frame = c.frame,
                    kind = ?c.kind,
                    outcome = ?c.outcome,
                    dropped = ?c.dropped_slots(),
                    "video cycle decided"
                );
                return;
            }
        }
        self.selector.decide(p, c, nx);
        if c.outcome == BlendOutcome::TwoDuplicates && self.hybrid != Hybrid::UpConvert {
            if let Some(slot) = scene_boundary(p, c, nx, thresh) {
                if c.is_dropped(slot) {
                    c.undrop_slot(slot);
                    c.outcome = BlendOutcome::SingleDrop;
                    debug!(frame = c.frame, slot, "kept the frame at a scene change");
                }
            }
        }
    }

    fn select(&self, n: usize) -> Result<(Selection, bool)> {
        let Window { prev, curr, next, .. } = &self.window;
        let last = self.last_frame as i64;
        let film = matches!(
            curr.outcome,
            BlendOutcome::SingleDrop | BlendOutcome::TwoDuplicates
        );
        let up = self.hybrid == Hybrid::UpConvert;
        let selection = match curr.outcome {
            BlendOutcome::Video if up => Selection::Single(n.min(self.last_frame)),
            BlendOutcome::Video => Selection::from_ratios(&down_convert_ratios(
                n,
                curr.frame,
                self.cycle,
                self.cycle_r,
                curr.valid_len(),
                last,
            )),
            BlendOutcome::SingleDrop | BlendOutcome::TwoDuplicates if up => {
                let remove = if curr.outcome == BlendOutcome::TwoDuplicates {
                    2
                } else {
                    1
                };
                let r = post_decimation_ratios(n, prev, curr, next, remove, last);
                match (r.single_frame(), cut_source_frame(prev, curr, next, self.scene_thresh)) {
                    (Some(frame), _) => Selection::Single(frame.max(0) as usize),
                    (None, Some(left)) if r.frame1 == left || r.frame2 == left + 1 => {
                        Selection::Single(left.max(0) as usize)
                    }
                    _ => Selection::from_ratios(&r),
                }
            }
            BlendOutcome::TwoDuplicates => self.two_duplicates(n)?,
            BlendOutcome::SingleDrop | BlendOutcome::SceneDrop => {
                let k = n % self.per_cycle();
                let slot = curr.get_non_dec(k).ok_or_else(|| missing_slot(curr, k))?;
                Selection::Single(source(curr, slot, last))
            }
        };
        Ok((selection, film))
    }

    /// Output of a cycle that lost two duplicates but still owes
    /// `cycle - r` frames.
    ///
    /// Next to a scene change the frame at the cut is shown twice; otherwise
    /// the second duplicate is replaced by a blend of its neighbors.
    fn two_duplicates(&self, n: usize) -> Result<Selection> {
        let Window { prev, curr, next, .. } = &self.window;
        let last = self.last_frame as i64;
        let ret = n % self.per_cycle();
        if let Some(cut) = scene_boundary(prev, curr, next, self.scene_thresh) {
            let mut shown: i64 = -1;
            for slot in curr.slots() {
                if !curr.is_dropped(slot) {
                    shown += 1;
                }
                if slot == cut && shown < ret as i64 {
                    shown += 1;
                }
                if shown == ret as i64 {
                    return Ok(Selection::Single(source(curr, slot, last)));
                }
            }
            return Err(missing_slot(curr, ret));
        }

        let dropped = curr.dropped_slots();
        let removed = dropped
            .iter()
            .copied()
            .min_by_key(|&s| (curr.metric(s), s))
            .ok_or_else(|| missing_slot(curr, ret))?;
        let slot = curr
            .slots()
            .filter(|&s| s != removed)
            .nth(ret)
            .ok_or_else(|| missing_slot(curr, ret))?;
        if curr.is_dropped(slot) {
            let frame = curr.source_frame(slot);
            Ok(Selection::Blend {
                frame1: (frame - 1).clamp(0, last) as usize,
                frame2: (frame + 1).clamp(0, last) as usize,
                a1: 0.5,
                a2: 0.5,
            })
        } else {
            Ok(Selection::Single(source(curr, slot, last)))
        }
    }
}

fn fill(c: &mut Cycle, annotator: &Annotator) -> Result<()> {
    if annotator.populate(c) || c.is_empty() {
        Ok(())
    } else {
        Err(DecimateError::internal(format!(
            "cycle metrics missing after analysis: {}",
            c.describe()
        )))
    }
}

/// Drop the frame at a cut in a video cycle, or the lowest-metric frame
/// when the cut frame is forced to stay.
fn scene_drop(c: &mut Cycle, slot: usize) {
    c.clear_decisions();
    if !c.drop_slot(slot) {
        debug!(frame = c.frame, slot, "scene frame is forced to stay");
        c.set_decimate_low(1);
    }
    c.outcome = BlendOutcome::SceneDrop;
}

fn classify(prev: &Cycle, c: &mut Cycle, thresh: f64, policy: VideoDetect) {
    if c.is_empty() {
        return;
    }
    check_video_matches(prev, c);
    check_video_metrics(c, thresh, policy.variance_check());
}

fn source(c: &Cycle, slot: usize, last: i64) -> usize {
    c.source_frame(slot).clamp(0, last) as usize
}

fn missing_slot(c: &Cycle, k: usize) -> DecimateError {
    DecimateError::internal(format!("no output slot {} in {}", k, c.describe()))
}
