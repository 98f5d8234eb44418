//! Whole-clip planning for the variable frame rate modes.
//!
//! Modes 5 and 6 know the metrics of every frame before the first output is
//! requested, so the complete output is planned at construction:
//!
//! - **Two-pass hybrid (mode 5)**: a first pass classifies every cycle as
//!   film or video, short video runs are folded back into film, and a
//!   second pass decides the drops of every film cycle.
//! - **High rate (mode 6)**: runs of identical frames in 120 fps material
//!   are grouped into 120, 60, 40, 30 and 24 fps sections.
//!
//! A [`VfrPlan`] holds the resulting output-to-source table together with
//! the timecode sections, and writes both to the configured files.

use crate::annotate::Annotator;
use crate::classify::{
    check_video_matches, check_video_matches_self, check_video_metrics, is_video_uncorroborated,
};
use crate::config::DecimateConfig;
use crate::cycle::{Cycle, CycleType};
use crate::error::{DecimateError, Result};
use crate::rate::Rational;
use crate::scene::scene_boundary;
use crate::select::Selector;
use crate::source::ClipInfo;
use crate::timecode::{TimecodeFormat, TimecodeWriter, VfrStats};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::debug;

/// Rates closer than this share a section.
const RATE_EPSILON: f64 = 1e-6;

/// A run of output frames shown at one rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    /// Output frames in the run.
    pub frames: usize,
    /// Display rate.
    pub fps: f64,
    /// The run comes from decimated film.
    pub film: bool,
}

/// A complete variable frame rate output plan.
#[derive(Debug, Clone, PartialEq)]
pub struct VfrPlan {
    /// Mode the plan was built for.
    pub mode: u32,
    /// Source frame of every output frame.
    pub lut: Vec<usize>,
    /// Whether every output frame comes from film.
    pub film: Vec<bool>,
    /// Timecode sections in output order.
    pub sections: Vec<Section>,
    /// Default rate of a v1 timecode file.
    pub assumed_fps: f64,
    /// Average output rate.
    pub rate: Rational,
    /// Film/video statistics over the source.
    pub stats: VfrStats,
}

impl VfrPlan {
    fn new(mode: u32, assumed_fps: f64, rate: Rational) -> Self {
        Self {
            mode,
            lut: Vec::new(),
            film: Vec::new(),
            sections: Vec::new(),
            assumed_fps,
            rate,
            stats: VfrStats::default(),
        }
    }

    /// Append output frames showing `sources` at `fps`.
    fn push(&mut self, sources: impl IntoIterator<Item = usize>, fps: f64, film: bool) {
        let before = self.lut.len();
        self.lut.extend(sources);
        let frames = self.lut.len() - before;
        if frames == 0 {
            return;
        }
        self.film.resize(self.lut.len(), film);
        match self.sections.last_mut() {
            Some(last) if (last.fps - fps).abs() < RATE_EPSILON && last.film == film => {
                last.frames += frames;
            }
            _ => self.sections.push(Section { frames, fps, film }),
        }
    }

    /// Number of output frames.
    pub fn len(&self) -> usize {
        self.lut.len()
    }

    /// Whether the plan has no output frames.
    pub fn is_empty(&self) -> bool {
        self.lut.is_empty()
    }

    /// Write the timecode file for a clip of `total` source frames.
    pub fn write_timecodes<W: Write>(
        &self,
        out: W,
        format: TimecodeFormat,
        total: usize,
    ) -> Result<W> {
        let mut timecodes = TimecodeWriter::new(out, format, self.assumed_fps, self.mode)?;
        for section in &self.sections {
            timecodes.push(section.frames, section.fps)?;
        }
        timecodes.finish(&self.stats, total)
    }

    /// Write the source index of every output frame, one per line.
    pub fn write_remap<W: Write>(&self, mut out: W) -> Result<()> {
        for frame in &self.lut {
            writeln!(out, "{}", frame)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write the configured timecode and remap files.
    pub fn write_files(&self, config: &DecimateConfig, info: &ClipInfo) -> Result<()> {
        if let Some(path) = &config.timecodes_out {
            let out = BufWriter::new(File::create(path)?);
            let format = TimecodeFormat::from_v1_flag(config.tcfv1);
            self.write_timecodes(out, format, info.num_frames)?;
            debug!(path = %path.display(), sections = self.sections.len(), "wrote timecodes");
        }
        if let Some(path) = &config.remap_out {
            self.write_remap(BufWriter::new(File::create(path)?))?;
            debug!(path = %path.display(), frames = self.lut.len(), "wrote remap");
        }
        Ok(())
    }
}

/// Per-frame verdict of the two-pass planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Keep,
    Drop,
    /// First frame of a video cycle at a scene change or forced to video.
    Scene,
}

/// Rolling `prev`/`curr`/`next` over every cycle of the clip.
struct CycleWalk<'a> {
    annotator: &'a Annotator,
    vid_thresh: f64,
    variance: bool,
    prev: Cycle,
    curr: Cycle,
    next: Cycle,
}

impl<'a> CycleWalk<'a> {
    fn new(config: &DecimateConfig, annotator: &'a Annotator, info: &ClipInfo) -> Self {
        let template = Cycle::new(config.cycle, config.cycle_r, info.last_frame() as i64)
            .with_sdlim(config.sdlim);
        Self {
            annotator,
            vid_thresh: config.vid_thresh,
            variance: config.vid_detect.variance_check(),
            prev: template.clone(),
            curr: template.clone(),
            next: template,
        }
    }

    /// Position `curr` at `frame`; cycles must be visited in order.
    fn advance(&mut self, frame: i64) -> Result<()> {
        let len = self.curr.length as i64;
        if frame == 0 {
            self.prev.set_frame(-len);
            self.curr.set_frame(0);
            self.fill_curr()?;
            check_video_matches_self(&mut self.curr);
            check_video_metrics(&mut self.curr, self.vid_thresh, self.variance);
        } else {
            std::mem::swap(&mut self.prev, &mut self.curr);
            std::mem::swap(&mut self.curr, &mut self.next);
        }
        self.next.set_frame(frame + len);
        if !self.annotator.populate(&mut self.next) && !self.next.is_empty() {
            return Err(missing(&self.next));
        }
        if !self.next.is_empty() {
            check_video_matches(&self.curr, &mut self.next);
            check_video_metrics(&mut self.next, self.vid_thresh, self.variance);
        }
        Ok(())
    }

    fn fill_curr(&mut self) -> Result<()> {
        if self.annotator.populate(&mut self.curr) {
            Ok(())
        } else {
            Err(missing(&self.curr))
        }
    }
}

fn missing(c: &Cycle) -> DecimateError {
    DecimateError::invalid_params(format!(
        "metrics are missing for the cycle at frame {}",
        c.frame
    ))
}

/// Plan mode 5.
pub fn plan_two_pass(
    config: &DecimateConfig,
    annotator: &Annotator,
    info: &ClipInfo,
) -> Result<VfrPlan> {
    let n = info.num_frames;
    let len = config.cycle;
    let selector = Selector::new(config.selector_config());
    let scene_thresh = annotator.provider().scene_threshold(config.scene_thresh);
    let mut marks = vec![Mark::Keep; n];

    let mut walk = CycleWalk::new(config, annotator, info);
    for b in (0..n).step_by(len) {
        walk.advance(b as i64)?;
        let CycleWalk {
            prev, curr, next, ..
        } = &mut walk;
        if is_video_uncorroborated(curr, config.vid_detect) {
            if curr.kind == CycleType::ForcedVideo
                || scene_boundary(prev, curr, next, scene_thresh).is_some()
            {
                marks[b] = Mark::Scene;
            }
        } else {
            selector.decide(prev, curr, next);
            for slot in curr.dropped_slots() {
                marks[curr.source_frame(slot) as usize] = Mark::Drop;
            }
        }
    }

    fold_short_video_runs(&mut marks, len, config.con_cycle_tp as usize);

    let mut walk = CycleWalk::new(config, annotator, info);
    for b in (0..n).step_by(len) {
        walk.advance(b as i64)?;
        let end = (b + len).min(n);
        let film = marks[b..end].contains(&Mark::Drop);
        for mark in &mut marks[b..end] {
            *mark = Mark::Keep;
        }
        if film {
            let CycleWalk {
                prev, curr, next, ..
            } = &mut walk;
            selector.decide(prev, curr, next);
            for slot in curr.dropped_slots() {
                marks[curr.source_frame(slot) as usize] = Mark::Drop;
            }
        }
    }

    let drops = marks.iter().filter(|&&m| m == Mark::Drop).count();
    let fps = info.fps();
    let rate = info.rate.scale((n - drops) as i64, n as i64);
    let mut plan = VfrPlan::new(5, fps, rate);
    for b in (0..n).step_by(len) {
        let end = (b + len).min(n);
        let kept = (b..end).filter(|&i| marks[i] != Mark::Drop);
        let dropped = end - b - kept.clone().count();
        if dropped == 0 {
            plan.stats.add_video(end - b);
            plan.push(kept, fps, false);
        } else {
            plan.stats.add_film(end - b);
            let cycle_fps = fps * len.saturating_sub(dropped) as f64 / len as f64;
            plan.push(kept, cycle_fps, true);
        }
    }
    debug!(
        input_frames = n,
        output_frames = plan.len(),
        drops,
        film = plan.stats.film,
        video = plan.stats.video,
        "two-pass plan built"
    );
    Ok(plan)
}

/// Video runs shorter than `min_cycles` cycles become film: the first frame
/// of each of their cycles is marked as a drop unless it sits at a scene
/// change.
fn fold_short_video_runs(marks: &mut [Mark], len: usize, min_cycles: usize) {
    let n = marks.len();
    let mut run: Vec<usize> = Vec::new();
    let fold = |marks: &mut [Mark], run: &mut Vec<usize>| {
        if !run.is_empty() && run.len() < min_cycles {
            for &b in run.iter() {
                if marks[b] != Mark::Scene {
                    marks[b] = Mark::Drop;
                }
            }
        }
        run.clear();
    };
    for b in (0..n).step_by(len) {
        let end = (b + len).min(n);
        if marks[b..end].contains(&Mark::Drop) {
            fold(marks, &mut run);
        } else {
            run.push(b);
        }
    }
    fold(marks, &mut run);
}

/// Plan mode 6.
pub fn plan_high_rate(
    config: &DecimateConfig,
    annotator: &Annotator,
    info: &ClipInfo,
) -> Result<VfrPlan> {
    let n = info.num_frames;
    let fps = info.fps();
    let store = annotator.store();
    let mut repeated = Vec::with_capacity(n);
    for f in 0..n {
        let worst = store
            .get(f)
            .worst
            .ok_or_else(|| DecimateError::invalid_params(format!("no metrics for frame {}", f)))?;
        repeated.push(f > 0 && worst == 0);
    }

    let mut plan = VfrPlan::new(6, fps / 5.0, info.rate);
    let mut j = 0;
    while j < n {
        let start = j;
        j += 1;
        while j < n && repeated[j] {
            j += 1;
        }
        let mut dups = j - start;
        while dups > 0 {
            let first = j - dups;
            let (step, count) = match dups {
                1..=3 => (dups, 1),
                d if d % 4 == 0 => (4, d / 4),
                d if d % 5 == 0 => (5, d / 5),
                _ => (5, 1),
            };
            let film = step == 5;
            if film {
                plan.stats.add_film(step * count);
            } else {
                plan.stats.add_video(step * count);
            }
            plan.push((0..count).map(|i| first + i * step), fps / step as f64, film);
            dups -= step * count;
        }
    }
    debug!(
        input_frames = n,
        output_frames = plan.len(),
        sections = plan.sections.len(),
        tcfv1 = config.tcfv1,
        "high rate plan built"
    );
    Ok(plan)
}
