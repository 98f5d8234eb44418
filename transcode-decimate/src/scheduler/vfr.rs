//! Single-pass variable frame rate decimation (mode 3).
//!
//! The stream is consumed strictly in order. Each new group classifies
//! the current cycle: video cycles pass through at the source rate, film
//! cycles are decimated and written to the timecode file at the reduced
//! rate. When the source runs out the timecode file is closed with the
//! film/video statistics.

use super::{CycleInfo, Decision, Pull, Selection, Window};
use crate::annotate::Annotator;
use crate::classify::{check_video_matches, check_video_metrics, is_video, VideoDetect};
use crate::config::DecimateConfig;
use crate::cycle::{BlendOutcome, Cycle};
use crate::error::{DecimateError, Result};
use crate::scene::scene_boundary;
use crate::select::Selector;
use crate::source::ClipInfo;
use crate::timecode::{TimecodeFormat, TimecodeWriter, VfrStats};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::task::Poll;
use tracing::{debug, warn};

/// Running state of the sequential pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VfrState {
    /// Next output frame the pass can serve.
    pub linear_count: usize,
    /// Output frame that opened the current group.
    pub last_group: usize,
    /// First source frame of the current group.
    pub last_cycle: i64,
    /// Output frames the current group yields.
    pub ret_frames: usize,
    /// The current group is video.
    pub video: bool,
    /// Film and video tallies.
    pub stats: VfrStats,
    /// Source frame of the last output.
    pub last_source: Option<usize>,
    /// Last output frame, once the source is exhausted.
    pub finished: Option<usize>,
}

/// Mode 3 engine.
pub struct SinglePassVfr {
    cycle: usize,
    cycle_r: usize,
    vid_detect: VideoDetect,
    vid_thresh: f64,
    con_cycle: u32,
    scene_thresh: u64,
    last_frame: usize,
    num_frames: usize,
    fps: f64,
    stop_early: bool,
    selector: Selector,
    window: Window,
    state: VfrState,
    timecodes: Option<TimecodeWriter<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for SinglePassVfr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinglePassVfr")
            .field("cycle", &self.cycle)
            .field("cycle_r", &self.cycle_r)
            .field("state", &self.state)
            .field("timecodes_open", &self.timecodes.is_some())
            .finish()
    }
}

impl SinglePassVfr {
    pub(crate) fn new(
        config: &DecimateConfig,
        annotator: &Annotator,
        info: &ClipInfo,
    ) -> Result<Self> {
        let path = config.timecodes_out.as_ref().ok_or_else(|| {
            DecimateError::invalid_params("a timecode file must be specified in mode 3")
        })?;
        let out: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(path)?));
        Self::with_writer(config, annotator, info, out)
    }

    /// Engine writing timecodes to `out`.
    pub(crate) fn with_writer(
        config: &DecimateConfig,
        annotator: &Annotator,
        info: &ClipInfo,
        out: Box<dyn Write + Send>,
    ) -> Result<Self> {
        let fps = info.fps();
        let format = TimecodeFormat::from_v1_flag(config.tcfv1);
        let timecodes = TimecodeWriter::new(out, format, fps, 3)?;
        let last_frame = info.last_frame();
        Ok(Self {
            cycle: config.cycle,
            cycle_r: config.cycle_r,
            vid_detect: config.vid_detect,
            vid_thresh: config.vid_thresh,
            con_cycle: config.con_cycle,
            scene_thresh: annotator.provider().scene_threshold(config.scene_thresh),
            last_frame,
            num_frames: info.num_frames,
            fps,
            stop_early: config.se,
            selector: Selector::new(config.selector_config()),
            window: Window::new(config.cycle, config.cycle_r, last_frame, config.sdlim),
            state: VfrState {
                last_cycle: -(config.cycle as i64),
                ..Default::default()
            },
            timecodes: Some(timecodes),
        })
    }

    /// Current pass state.
    pub fn state(&self) -> &VfrState {
        &self.state
    }

    pub(crate) fn decide(
        &mut self,
        n: usize,
        annotator: &mut Annotator,
        pull: &mut Pull<'_>,
    ) -> Result<Poll<Decision>> {
        if let Some(last) = self.state.finished {
            return self.past_end(n, last);
        }
        if n != self.state.linear_count {
            return Err(DecimateError::NonLinearAccess {
                expected: self.state.linear_count,
                requested: n,
            });
        }

        let len = self.cycle as i64;
        let new_group = n == 0 || n - self.state.last_group == self.state.ret_frames;
        if new_group {
            let next_cycle = self.state.last_cycle + len;
            if next_cycle > self.last_frame as i64 {
                return self.end(n);
            }
            let start = (next_cycle - 1).max(0) as usize;
            let end = ((next_cycle + 3 * len) as usize).min(self.last_frame);
            ready!(pull.prepare(annotator, start..=end)?);
            self.start_group(n, next_cycle, annotator)?;
        }

        let offset = n - self.state.last_group;
        let curr = &self.window.curr;
        let frame = if self.state.video {
            Some(self.state.last_cycle + offset as i64)
        } else {
            curr.get_non_dec(offset).map(|slot| curr.source_frame(slot))
        };
        let frame = match frame {
            Some(f) if f >= 0 && f <= self.last_frame as i64 => f as usize,
            _ => return self.end(n),
        };
        let cycle = new_group.then(|| CycleInfo {
            start: curr.frame,
            metrics: curr.slots().map(|i| curr.metric(i)).collect(),
        });

        self.state.linear_count += 1;
        self.state.last_source = Some(frame);
        Ok(Poll::Ready(Decision {
            output: n,
            selection: Selection::Single(frame),
            film: !self.state.video,
            cycle,
        }))
    }

    fn start_group(&mut self, n: usize, first: i64, annotator: &Annotator) -> Result<()> {
        self.state.last_group = n;
        self.state.last_cycle = first;
        self.advance(first, annotator)?;

        let thresh = self.scene_thresh;
        let (p, c, nx) = self.window.triple_mut();
        let scene = scene_boundary(p, c, nx, thresh);
        let video = is_video(p, c, nx, self.vid_detect, self.con_cycle, scene.is_some());
        let valid = c.valid_len();
        let timecodes = self
            .timecodes
            .as_mut()
            .ok_or_else(|| DecimateError::internal("timecode file already closed"))?;
        if video {
            c.outcome = BlendOutcome::Video;
            c.decided = true;
            self.state.ret_frames = self.cycle;
            self.state.stats.add_video(valid);
            timecodes.push(valid, self.fps)?;
        } else {
            self.selector.decide(p, c, nx);
            self.state.stats.add_film(valid);
            let kept = c.kept_slots().len();
            let (ret, kept_rate) = if c.outcome == BlendOutcome::TwoDuplicates {
                (self.cycle - self.cycle_r - 1, self.cycle - self.cycle_r - 1)
            } else {
                (self.cycle - self.cycle_r, self.cycle - self.cycle_r)
            };
            self.state.ret_frames = ret;
            timecodes.push(kept, self.fps * kept_rate as f64 / self.cycle as f64)?;
        }
        self.state.video = video;
        debug!(
            output = n,
            cycle = first,
            video,
            kind = ?c.kind,
            dropped = ?c.dropped_slots(),
            "mode 3 group"
        );
        Ok(())
    }

    fn advance(&mut self, first: i64, annotator: &Annotator) -> Result<()> {
        let policy = self.vid_detect;
        let thresh = self.vid_thresh;
        if !self.window.curr.is_anchored() {
            self.window.reset(first);
            let w = &mut self.window;
            for c in [&mut w.prev, &mut w.curr, &mut w.next, &mut w.nbuf] {
                fill(c, annotator)?;
            }
            classify(&w.prev.clone(), &mut w.prev, thresh, policy);
            classify(&w.prev, &mut w.curr, thresh, policy);
            classify(&w.curr, &mut w.next, thresh, policy);
            classify(&w.next, &mut w.nbuf, thresh, policy);
        } else {
            while self.window.curr.frame < first {
                self.window.rotate();
                let w = &mut self.window;
                fill(&mut w.nbuf, annotator)?;
                classify(&w.next, &mut w.nbuf, thresh, policy);
            }
        }
        Ok(())
    }

    /// The source ran out while serving output `n`.
    fn end(&mut self, n: usize) -> Result<Poll<Decision>> {
        let last = n.saturating_sub(1);
        self.state.finished = Some(last);
        if let Some(mut timecodes) = self.timecodes.take() {
            timecodes.end_section()?;
            timecodes.comment(&format!("TDecimate Mode 3:  Last Frame = {}", last))?;
            timecodes.finish(&self.state.stats, self.num_frames)?;
        }
        debug!(last_frame = last, stats = ?self.state.stats, "mode 3 reached the end of the source");
        self.past_end(n, last)
    }

    fn past_end(&self, n: usize, last: usize) -> Result<Poll<Decision>> {
        match self.state.last_source {
            Some(frame) if !self.stop_early => {
                Ok(Poll::Ready(Decision::single(n, frame, !self.state.video)))
            }
            _ => Err(DecimateError::EndOfStream { last_frame: last }),
        }
    }

    /// Close the timecode file if the end was never reached.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if let Some(mut timecodes) = self.timecodes.take() {
            warn!(
                served = self.state.linear_count,
                "mode 3 finished before the end of the source"
            );
            timecodes.end_section()?;
            timecodes.finish(&self.state.stats, self.num_frames)?;
        }
        Ok(())
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

fn classify(prev: &Cycle, c: &mut Cycle, thresh: f64, policy: VideoDetect) {
    if c.is_empty() {
        return;
    }
    check_video_matches(prev, c);
    check_video_metrics(c, thresh, policy.variance_check());
}

#[cfg(test)]
mod tests {
    use super::super::Decimator;
    use super::*;
    use crate::config::{Hybrid, Mode};
    use crate::frame::{Frame, PixelFormat};
    use crate::rate::Rational;
    use crate::source::{FrameSource, MemorySource};
    use pretty_assertions::assert_eq;

    /// Three film cycles, each repeating its second frame.
    fn telecined() -> MemorySource {
        let lumas = [16, 40, 40, 64, 88, 112, 136, 136, 160, 184, 190, 200, 200, 210, 220];
        let frames = lumas
            .iter()
            .map(|&y| {
                let mut f = Frame::new(32, 32, PixelFormat::Yuv420p, 8);
                f.fill_plane(0, y);
                f
            })
            .collect();
        MemorySource::new(frames, Rational::ntsc_video())
    }

    fn config(dir: &tempfile::TempDir, se: bool) -> DecimateConfig {
        DecimateConfig {
            mode: Mode::Vfr,
            hybrid: Hybrid::Vfr,
            use_hints: false,
            se,
            timecodes_out: Some(dir.path().join("timecodes.txt")),
            ..Default::default()
        }
    }

    fn ready(dec: &mut Decimator, n: usize, source: &mut dyn FrameSource) -> Decision {
        match dec.decide(n, source).unwrap() {
            Poll::Ready(d) => d,
            Poll::Pending => panic!("source is immediate"),
        }
    }

    #[test]
    fn test_sequential_film_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = telecined();
        let mut dec = Decimator::new(&config(&dir, false), source.info()).unwrap();
        assert_eq!(dec.output_info().num_frames, 15);

        let shown: Vec<usize> = (0..12)
            .map(|n| match ready(&mut dec, n, &mut source).selection {
                Selection::Single(f) => f,
                other => panic!("unexpected blend {:?}", other),
            })
            .collect();
        assert_eq!(shown, vec![0, 1, 3, 4, 5, 6, 8, 9, 10, 11, 13, 14]);

        // Past the source end the last frame repeats up to the declared count.
        assert_eq!(ready(&mut dec, 12, &mut source).selection, Selection::Single(14));
        assert_eq!(ready(&mut dec, 14, &mut source).selection, Selection::Single(14));
        assert!(dec.decide(15, &mut source).is_err());

        let text = std::fs::read_to_string(dir.path().join("timecodes.txt")).unwrap();
        assert!(text.starts_with("# timecode format v1"));
        assert!(text.contains("# TDecimate Mode 3:  Last Frame = 11"));
        assert!(text.contains("# vfr stats:  15 - film  0 - video  15 - total"));
    }

    #[test]
    fn test_stop_early() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = telecined();
        let mut dec = Decimator::new(&config(&dir, true), source.info()).unwrap();
        for n in 0..12 {
            ready(&mut dec, n, &mut source);
        }
        assert!(matches!(
            dec.decide(12, &mut source),
            Err(DecimateError::EndOfStream { last_frame: 11 })
        ));
    }

    #[test]
    fn test_rejects_random_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = telecined();
        let mut dec = Decimator::new(&config(&dir, false), source.info()).unwrap();
        ready(&mut dec, 0, &mut source);
        assert!(matches!(
            dec.decide(5, &mut source),
            Err(DecimateError::NonLinearAccess {
                expected: 1,
                requested: 5
            })
        ));
        // Already decided frames stay available.
        assert_eq!(ready(&mut dec, 0, &mut source).selection, Selection::Single(0));
    }
}
