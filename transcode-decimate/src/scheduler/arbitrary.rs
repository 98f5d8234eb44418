//! Arbitrary rate conversion (mode 7).
//!
//! Output frame `n` sits between source frames `c1 = floor(n * ratio)` and
//! `c2 = c1 + 1`. Each source frame is graded as the same as, similar to,
//! or different from its predecessor, and the grades around `c1` and `c2`
//! pick the one that best continues the motion of the previous output.

use super::{Decision, Pull};
use crate::annotate::Annotator;
use crate::config::DecimateConfig;
use crate::error::{DecimateError, Result};
use crate::source::ClipInfo;
use std::collections::HashMap;
use std::task::Poll;
use tracing::trace;

/// How a frame relates to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Change {
    Same,
    Similar,
    Different,
}

/// Grade a frame from its metric `v1`, the previous frame's `v0` and the
/// next frame's `v2` (`None` for the last frame).
pub(crate) fn grade(v0: u64, v1: u64, v2: Option<u64>, diff: u64, same: u64) -> Change {
    let Some(v2) = v2 else {
        if v1 > diff || v1 * 2 > v0 * 3 {
            return Change::Different;
        }
        if v1 < same || v1 * 4 < v0 || (v1 * 2 < v0 && v0 > diff) {
            return Change::Same;
        }
        return Change::Similar;
    };
    if v1 > diff {
        return Change::Different;
    }
    if v1 < same {
        return Change::Same;
    }
    if v1 < v0 && v1 < v2 {
        let minn = v0.min(v2);
        if (v1 * 2 < minn && v0 > diff && v2 > diff) || v1 * 4 < minn {
            return Change::Same;
        }
    } else if v1 > v0 && v1 > v2 && v1 * 2 > v0.max(v2) * 3 {
        return Change::Different;
    }
    Change::Similar
}

/// Which candidate a decision settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    First,
    Second,
    Either,
    EitherByMetric,
    AfterSecond,
}

/// Mode 7 engine.
#[derive(Debug)]
pub struct Arbitrary {
    ratio: f64,
    last_frame: usize,
    output_frames: usize,
    diff_thresh: u64,
    same_thresh: u64,
    grades: HashMap<usize, Change>,
    chosen: HashMap<usize, usize>,
}

impl Arbitrary {
    pub(crate) fn new(config: &DecimateConfig, annotator: &Annotator, info: &ClipInfo) -> Self {
        let fps = info.fps();
        let provider = annotator.provider();
        Self {
            ratio: fps / config.rate,
            last_frame: info.last_frame(),
            output_frames: (info.num_frames as f64 * config.rate / fps) as usize,
            diff_thresh: provider.block_threshold(config.vid_thresh),
            same_thresh: provider.block_threshold(config.dup_thresh),
            grades: HashMap::new(),
            chosen: HashMap::new(),
        }
    }

    /// Number of output frames.
    pub fn output_frames(&self) -> usize {
        self.output_frames
    }

    pub(crate) fn decide(
        &mut self,
        n: usize,
        annotator: &mut Annotator,
        pull: &mut Pull<'_>,
    ) -> Result<Poll<Decision>> {
        if let Some(&frame) = self.chosen.get(&n) {
            return Ok(Poll::Ready(Decision::single(n, frame, true)));
        }
        let last = self.last_frame as i64;
        let pos = n as f64 * self.ratio;
        let c1 = pos as i64;
        let c2 = (pos + 1.0) as i64;
        let next = (((n + 1) as f64 * self.ratio) as i64).min(last);
        let prev = match n.checked_sub(1).and_then(|p| self.chosen.get(&p)) {
            Some(&f) => f as i64,
            None => (((n as f64 - 1.0) * self.ratio + 1.0) as i64).max(0),
        };

        let frame = if c1 > last || c2 > last {
            self.last_frame
        } else {
            let lo = (prev - 3).max(1) as usize;
            let hi = ((next + 2).min(last)).max(0) as usize;
            if lo <= hi {
                ready!(pull.prepare(annotator, lo..=hi)?);
            }
            let metrics = Metrics {
                annotator: &*annotator,
            };
            let rup = pos - c1 as f64 >= 0.5;
            let choice = self.choose(&metrics, prev, c1, c2, next)?;
            let pick = match choice {
                Choice::AfterSecond => c2 + 1,
                Choice::Either if rup => c2,
                Choice::EitherByMetric => {
                    let (m1, m2) = (metrics.get(c1 as usize)?, metrics.get(c2 as usize)?);
                    if m2 * 2 > m1 * 3 || (rup && m2 * 3 >= m1 * 2) {
                        c2
                    } else {
                        c1
                    }
                }
                Choice::Either | Choice::First => c1,
                Choice::Second => c2,
            };
            trace!(output = n, prev, c1, c2, next, ?choice, pick, "mode 7 pick");
            if pick < 0 || pick > last {
                return Err(DecimateError::internal(format!(
                    "mode 7 picked frame {} outside the clip",
                    pick
                )));
            }
            pick as usize
        };
        self.chosen.insert(n, frame);
        Ok(Poll::Ready(Decision::single(n, frame, true)))
    }

    fn choose(
        &mut self,
        m: &Metrics<'_>,
        prev: i64,
        c1: i64,
        c2: i64,
        next: i64,
    ) -> Result<Choice> {
        use Change::*;
        let choice = if self.diff(m, c1, c2)? == Same {
            if next - c2 > 1
                && self.diff(m, prev, c2)? <= Similar
                && self.diff(m, next, next + 1)? == Different
                && self.diff(m, c2, c2 + 1)? == Different
            {
                Choice::AfterSecond
            } else {
                Choice::Either
            }
        } else if self.diff(m, prev, c1)? == Same {
            Choice::Second
        } else if self.diff(m, prev, c1)? == Similar {
            if self.diff(m, c1, c2)? <= Similar && self.diff(m, c2, next)? != Same {
                Choice::EitherByMetric
            } else if self.diff(m, c1, c2)? == Different {
                Choice::Second
            } else {
                Choice::First
            }
        } else if self.diff(m, c2, next)? == Different {
            Choice::EitherByMetric
        } else if self.diff(m, c1, c2)? == Different
            && self.diff(m, c1 - 1, c1)? == Same
            && self.diff(m, c2, next)? == Same
            && self.diff(m, next, next + 1)? == Different
            && c1 - prev == 2
            && self.diff(m, prev - 1, prev)? == Different
        {
            Choice::Second
        } else {
            Choice::First
        };
        Ok(choice)
    }

    /// Largest change over the frames `(f1, f2]`.
    fn diff(&mut self, m: &Metrics<'_>, f1: i64, f2: i64) -> Result<Change> {
        if f2 < f1 || f2 < 0 || f1 > self.last_frame as i64 {
            return Err(DecimateError::internal(format!(
                "mode 7 compared frame {} against earlier frame {}",
                f2, f1
            )));
        }
        let f1 = f1.max(0) as usize;
        let f2 = (f2 as usize).min(self.last_frame);
        let mut max = Change::Same;
        for i in f1 + 1..=f2 {
            max = max.max(self.grade_frame(m, i)?);
        }
        Ok(max)
    }

    fn grade_frame(&mut self, m: &Metrics<'_>, i: usize) -> Result<Change> {
        if let Some(&g) = self.grades.get(&i) {
            return Ok(g);
        }
        let g = if i == 0 {
            Change::Different
        } else {
            let v2 = if i == self.last_frame {
                None
            } else {
                Some(m.get(i + 1)?)
            };
            grade(m.get(i - 1)?, m.get(i)?, v2, self.diff_thresh, self.same_thresh)
        };
        self.grades.insert(i, g);
        Ok(g)
    }
}

/// Worst-block metrics read from the annotator.
struct Metrics<'a> {
    annotator: &'a Annotator,
}

impl Metrics<'_> {
    fn get(&self, frame: usize) -> Result<u64> {
        if frame == 0 {
            return Ok(0);
        }
        self.annotator
            .store()
            .get(frame)
            .worst
            .ok_or_else(|| DecimateError::internal(format!("no metric for frame {}", frame)))
    }
}
