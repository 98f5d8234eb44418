//! # Transcode Decimate
//!
//! Inverse telecine frame decimation for the Transcode project.
//!
//! Telecined material repeats one frame in every five after field matching.
//! This crate finds those repeats and removes them, either at a fixed ratio
//! or by producing variable frame rate output with a Matroska timecode file:
//!
//! - **Difference metrics**: worst-block and whole-frame differences between
//!   consecutive frames, with optional pre-denoising
//! - **Cadence classification**: film versus video cycles from field match
//!   hints and metric evidence
//! - **Duplicate selection**: longest-string and most-similar strategies
//! - **Hybrid output**: blend video sections down to the film rate, or blend
//!   film up to the video rate
//! - **Variable frame rate**: single-pass and two-pass timecode output,
//!   120 fps material and arbitrary rate conversion
//! - **Side files**: overrides, match hints, metrics import/export
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use transcode_decimate::{DecimateConfig, Decimator, MemorySource};
//! use std::task::Poll;
//!
//! let mut source = MemorySource::new(frames, Rational::ntsc_video());
//! let mut decimator = Decimator::new(&DecimateConfig::default(), source.info())?;
//!
//! for n in 0..decimator.output_info().num_frames {
//!     match decimator.get_frame(n, &mut source)? {
//!         Poll::Ready(frame) => output.push(frame),
//!         Poll::Pending => unreachable!("memory sources deliver immediately"),
//!     }
//! }
//! decimator.finish(&mut source)?;
//! ```
//!
//! ## Pull Protocol
//!
//! Decisions need frames the host may not have decoded yet. A decision
//! requests them through [`FrameSource::request`] and returns
//! [`Poll::Pending`](std::task::Poll::Pending) until they can be fetched; the
//! host delivers the frames and asks again.
//!
//! ```rust,ignore
//! loop {
//!     match decimator.decide(n, &mut source)? {
//!         Poll::Ready(decision) => break decision,
//!         Poll::Pending => source.decode_requested()?,
//!     }
//! }
//! ```
//!
//! ## Variable Frame Rate
//!
//! ```rust,ignore
//! use transcode_decimate::{DecimateConfig, Hybrid, Mode};
//!
//! let config = DecimateConfig {
//!     mode: Mode::Vfr,
//!     hybrid: Hybrid::Vfr,
//!     timecodes_out: Some("timecodes.txt".into()),
//!     ..Default::default()
//! };
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod annotate;
pub mod blend;
pub mod classify;
pub mod config;
pub mod cycle;
pub mod denoise;
pub mod error;
pub mod frame;
pub mod hints;
pub mod metric;
pub mod metrics_file;
pub mod ovr;
pub mod planner;
pub mod rate;
pub mod scene;
pub mod scheduler;
pub mod select;
pub mod source;
pub mod store;
pub mod timecode;

// Re-export main types
pub use annotate::Annotator;
pub use blend::{BlendRatios, FrameBlender};
pub use classify::VideoDetect;
pub use config::{DecimateConfig, Hybrid, Mode};
pub use cycle::{BlendOutcome, Cycle, CycleType, MatchCode};
pub use error::{DecimateError, Result};
pub use frame::{Frame, FrameHints, PixelFormat};
pub use hints::MatchHints;
pub use metric::{FrameDiff, MetricConfig, MetricProvider};
pub use metrics_file::{MetricsFile, MetricsHeader};
pub use ovr::Overrides;
pub use planner::{Section, VfrPlan};
pub use rate::Rational;
pub use scheduler::{CycleInfo, Decimator, Decision, Selection};
pub use select::{Selector, SelectorConfig, Strategy};
pub use source::{ClipInfo, FrameSource, MemorySource};
pub use store::{FrameMetrics, MetricStore};
pub use timecode::{TimecodeFormat, TimecodeWriter, VfrStats};
