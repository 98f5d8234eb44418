//! Output scheduling.
//!
//! A [`Decimator`] maps output frame numbers to source frames. Every mode
//! has its own engine behind the same pull protocol:
//!
//! 1. [`Decimator::decide`] announces the source frames a decision needs
//!    through [`FrameSource::request`] and returns [`Poll::Pending`] until
//!    the source can deliver all of them.
//! 2. Once everything is fetchable the decision is made, memoized and
//!    returned as a [`Decision`]. Calling again for the same output returns
//!    the memoized decision without requesting anything.
//! 3. [`Decimator::render`] turns a decision into pixels, either from the
//!    analysis clip or from a separate output clip of equal length.
//!
//! Decisions for modes 0/1 come from a four-cycle [`Window`] that normally
//! advances one cycle at a time. Jumping elsewhere rebuilds the window from
//! the stream start, so the result never depends on access order.

/// Unwrap a `Poll`, returning `Ok(Poll::Pending)` from the enclosing
/// function when not ready.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            std::task::Poll::Ready(v) => v,
            std::task::Poll::Pending => return Ok(std::task::Poll::Pending),
        }
    };
}

mod arbitrary;
mod fixed;
mod remap;
mod vfr;
mod window;

pub use window::Window;

use crate::annotate::Annotator;
use crate::blend::{BlendRatios, FrameBlender};
use crate::config::{DecimateConfig, Mode};
use crate::error::{DecimateError, Result};
use crate::frame::Frame;
use crate::metrics_file::MetricsFile;
use crate::planner;
use crate::rate::Rational;
use crate::source::{ClipInfo, FrameSource};
use arbitrary::Arbitrary;
use fixed::FixedRatio;
use remap::Remap;
use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, trace};
use vfr::SinglePassVfr;

/// Which source frames make up one output frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Show a source frame unchanged.
    Single(usize),
    /// Blend two source frames; the weights sum to one.
    Blend {
        /// First source frame.
        frame1: usize,
        /// Second source frame.
        frame2: usize,
        /// Weight of `frame1`.
        a1: f64,
        /// Weight of `frame2`.
        a2: f64,
    },
}

impl Selection {
    /// Selection for a pair of blend ratios; a full weight collapses to a
    /// single frame.
    pub fn from_ratios(r: &BlendRatios) -> Self {
        let clamp = |f: i64| f.max(0) as usize;
        match r.single_frame() {
            Some(frame) => Self::Single(clamp(frame)),
            None => Self::Blend {
                frame1: clamp(r.frame1),
                frame2: clamp(r.frame2),
                a1: r.a1,
                a2: r.a2,
            },
        }
    }

    /// Source frames read by this selection.
    pub fn frames(&self) -> Vec<usize> {
        match *self {
            Self::Single(f) => vec![f],
            Self::Blend { frame1, frame2, .. } => vec![frame1, frame2],
        }
    }
}

/// Start and metrics of the cycle an output frame opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    /// First source frame of the cycle (negative before the stream start).
    pub start: i64,
    /// Raw frame difference of every valid slot.
    pub metrics: Vec<u64>,
}

/// The decision for one output frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Output frame number.
    pub output: usize,
    /// Source frames to show.
    pub selection: Selection,
    /// Frame comes from a film (decimated) section.
    pub film: bool,
    /// Set on the first output of a cycle.
    pub cycle: Option<CycleInfo>,
}

impl Decision {
    /// A decision showing one source frame.
    pub fn single(output: usize, frame: usize, film: bool) -> Self {
        Self {
            output,
            selection: Selection::Single(frame),
            film,
            cycle: None,
        }
    }
}

/// Request bookkeeping for one output frame in flight.
pub(crate) struct Pull<'a> {
    source: &'a mut dyn FrameSource,
    requested: &'a mut BTreeSet<usize>,
}

impl<'a> Pull<'a> {
    /// Request frames not requested yet for this output.
    pub(crate) fn request(&mut self, frames: impl IntoIterator<Item = usize>) {
        for frame in frames {
            if self.requested.insert(frame) {
                trace!(frame, "requesting source frame");
                self.source.request(frame);
            }
        }
    }

    /// The source being pulled from.
    pub(crate) fn source(&self) -> &dyn FrameSource {
        &*self.source
    }

    /// Request whatever is needed to analyze `frames`, then analyze them.
    pub(crate) fn prepare(
        &mut self,
        annotator: &mut Annotator,
        frames: RangeInclusive<usize>,
    ) -> Result<Poll<()>> {
        let deps = annotator.dependencies(frames.clone());
        self.request(deps);
        annotator.analyze(frames, self.source())
    }
}

#[derive(Debug)]
enum Engine {
    Fixed(Box<FixedRatio>),
    Vfr(Box<SinglePassVfr>),
    Remap(Remap),
    MetricsOnly,
    Arbitrary(Arbitrary),
}

/// The decimation filter.
#[derive(Debug)]
pub struct Decimator {
    config: DecimateConfig,
    input: ClipInfo,
    output: ClipInfo,
    annotator: Annotator,
    engine: Engine,
    decisions: HashMap<usize, Decision>,
    requested: BTreeSet<usize>,
    in_flight: Option<usize>,
    blender: FrameBlender,
}

impl Decimator {
    /// Validate `config` against the clip, load side files and, for the
    /// planned modes, build the whole output plan.
    pub fn new(config: &DecimateConfig, info: &ClipInfo) -> Result<Self> {
        let config = config.validate(info)?;
        let annotator = Annotator::new(&config, info)?;
        let mut output = info.clone();
        let engine = match config.mode {
            Mode::LongestString | Mode::MostSimilar => {
                let engine = FixedRatio::new(&config, &annotator, info);
                output.num_frames = engine.output_frames(info.num_frames);
                output.rate = engine.output_rate(info.rate);
                Engine::Fixed(Box::new(engine))
            }
            Mode::Planned => {
                output.rate = Rational::from_f64(config.rate)?;
                let remap = Remap::uniform(info.num_frames, info.fps(), config.rate);
                output.num_frames = remap.len();
                Engine::Remap(remap)
            }
            Mode::Vfr => Engine::Vfr(Box::new(SinglePassVfr::new(&config, &annotator, info)?)),
            Mode::MetricsOnly => Engine::MetricsOnly,
            Mode::TwoPassVfr | Mode::HighRateVfr => {
                let plan = if config.mode == Mode::TwoPassVfr {
                    planner::plan_two_pass(&config, &annotator, info)?
                } else {
                    planner::plan_high_rate(&config, &annotator, info)?
                };
                plan.write_files(&config, info)?;
                output.num_frames = plan.lut.len();
                output.rate = plan.rate;
                Engine::Remap(Remap::from_plan(plan))
            }
            Mode::Arbitrary => {
                output.rate = Rational::from_f64(config.rate)?;
                let engine = Arbitrary::new(&config, &annotator, info);
                output.num_frames = engine.output_frames();
                Engine::Arbitrary(engine)
            }
        };
        debug!(
            mode = config.mode.index(),
            input_frames = info.num_frames,
            output_frames = output.num_frames,
            rate = %output.rate,
            "decimator ready"
        );
        Ok(Self {
            config,
            input: info.clone(),
            output,
            annotator,
            engine,
            decisions: HashMap::new(),
            requested: BTreeSet::new(),
            in_flight: None,
            blender: FrameBlender::new(),
        })
    }

    /// Replace the mode 2 plan with the host's list of source frames to
    /// keep, one per output frame.
    pub fn with_keep_plan(mut self, plan: Vec<usize>) -> Result<Self> {
        if self.config.mode != Mode::Planned {
            return Err(DecimateError::invalid_params(
                "a keep plan can only be used in mode 2",
            ));
        }
        if plan.is_empty() {
            return Err(DecimateError::invalid_params("the keep plan is empty"));
        }
        if let Some(&frame) = plan.iter().find(|&&f| f >= self.input.num_frames) {
            return Err(DecimateError::invalid_params(format!(
                "the keep plan names frame {} but the clip has {} frames",
                frame, self.input.num_frames
            )));
        }
        self.output.num_frames = plan.len();
        self.engine = Engine::Remap(Remap::new(plan));
        self.decisions.clear();
        Ok(self)
    }

    /// Effective configuration after validation.
    pub fn config(&self) -> &DecimateConfig {
        &self.config
    }

    /// Properties of the decimated clip.
    pub fn output_info(&self) -> &ClipInfo {
        &self.output
    }

    /// Frame-level knowledge gathered so far.
    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Decide output frame `n`, pulling analysis frames from `source`.
    pub fn decide(&mut self, n: usize, source: &mut dyn FrameSource) -> Result<Poll<Decision>> {
        if let Some(decision) = self.decisions.get(&n) {
            return Ok(Poll::Ready(decision.clone()));
        }
        if n >= self.output.num_frames {
            return Err(DecimateError::EndOfStream {
                last_frame: self.output.num_frames.saturating_sub(1),
            });
        }
        if self.in_flight != Some(n) {
            self.requested.clear();
            self.in_flight = Some(n);
        }
        let mut pull = Pull {
            source,
            requested: &mut self.requested,
        };
        let annotator = &mut self.annotator;
        let result = match &mut self.engine {
            Engine::Fixed(engine) => engine.decide(n, annotator, &mut pull)?,
            Engine::Vfr(engine) => engine.decide(n, annotator, &mut pull)?,
            Engine::Remap(engine) => engine.decide(n)?,
            Engine::MetricsOnly => {
                ready!(pull.prepare(annotator, n..=n)?);
                Poll::Ready(Decision::single(n, n, false))
            }
            Engine::Arbitrary(engine) => engine.decide(n, annotator, &mut pull)?,
        };
        match &result {
            Poll::Ready(decision) => {
                trace!(output = n, selection = ?decision.selection, film = decision.film, "decided");
                self.decisions.insert(n, decision.clone());
                self.requested.clear();
                self.in_flight = None;
            }
            Poll::Pending => trace!(output = n, "waiting for source frames"),
        }
        Ok(result)
    }

    /// Materialize a decision with pixels from `pixels`.
    pub fn render(&self, decision: &Decision, pixels: &mut dyn FrameSource) -> Result<Poll<Arc<Frame>>> {
        if pixels.info().num_frames != self.input.num_frames {
            return Err(DecimateError::invalid_params(format!(
                "the output clip has {} frames but the analysis clip has {}",
                pixels.info().num_frames,
                self.input.num_frames
            )));
        }
        for frame in decision.selection.frames() {
            pixels.request(frame);
        }
        match decision.selection {
            Selection::Single(frame) => Ok(match pixels.fetch(frame) {
                Some(f) => Poll::Ready(f),
                None => Poll::Pending,
            }),
            Selection::Blend {
                frame1, frame2, a1, ..
            } => {
                let (Some(f1), Some(f2)) = (pixels.fetch(frame1), pixels.fetch(frame2)) else {
                    return Ok(Poll::Pending);
                };
                Ok(Poll::Ready(Arc::new(self.blender.blend(&f1, &f2, a1)?)))
            }
        }
    }

    /// Decide and render output frame `n` from a single clip.
    pub fn get_frame(&mut self, n: usize, source: &mut dyn FrameSource) -> Result<Poll<Arc<Frame>>> {
        let decision = ready!(self.decide(n, source)?);
        self.render(&decision, source)
    }

    /// Decide output frame `n` from `analysis` and render it from `pixels`.
    pub fn get_frame_with(
        &mut self,
        n: usize,
        analysis: &mut dyn FrameSource,
        pixels: &mut dyn FrameSource,
    ) -> Result<Poll<Arc<Frame>>> {
        let decision = ready!(self.decide(n, analysis)?);
        self.render(&decision, pixels)
    }

    /// Flush output files: the mode 3 timecode file if the stream end was
    /// never reached, and the metrics file.
    pub fn finish(&mut self, source: &mut dyn FrameSource) -> Result<()> {
        if let Engine::Vfr(engine) = &mut self.engine {
            engine.finish()?;
        }
        if let Some(path) = &self.config.metrics_out {
            self.annotator.settle_checksum(source)?;
            let header = self.annotator.output_header().ok_or_else(|| {
                DecimateError::internal("clip checksum unavailable after computing it")
            })?;
            MetricsFile::save(path, &header, &self.annotator.store().merged())?;
        }
        Ok(())
    }
}
