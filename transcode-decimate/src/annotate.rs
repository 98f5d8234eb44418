//! Per-frame analysis state shared by every mode.
//!
//! The [`Annotator`] owns everything known about individual source frames:
//! override directives, match hints (from a file or from the frames
//! themselves) and difference metrics, imported or computed on demand.
//! Cycles are rebuilt from it whenever the window moves.

use crate::config::{DecimateConfig, Mode};
use crate::cycle::{Cycle, MatchCode};
use crate::error::{DecimateError, Result};
use crate::frame::Frame;
use crate::hints::MatchHints;
use crate::metric::MetricProvider;
use crate::metrics_file::{clip_checksum, MetricsFile, MetricsHeader, CHECKSUM_FRAMES};
use crate::ovr::Overrides;
use crate::source::{ClipInfo, FrameSource};
use crate::store::{FrameMatch, FrameMetrics, MetricStore};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, trace};

/// Clip checksum bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checksum {
    /// Nothing depends on it.
    Unused,
    /// Must be computed before the first decision.
    Pending,
    /// Computed.
    Known(u32),
}

/// Frame-level knowledge for one clip.
#[derive(Debug)]
pub struct Annotator {
    provider: MetricProvider,
    overrides: Option<Overrides>,
    hints: Option<MatchHints>,
    store: MetricStore,
    header: Option<MetricsHeader>,
    checksum: Checksum,
    use_hints: bool,
    batch: bool,
    num_frames: usize,
}

impl Annotator {
    /// Load the side files named by `config` and check them against the clip.
    pub fn new(config: &DecimateConfig, info: &ClipInfo) -> Result<Self> {
        let n = info.num_frames;
        let provider = MetricProvider::new(
            config.metric_config(),
            info.width,
            info.height,
            info.format,
            info.bit_depth,
        )?;

        let overrides = match &config.overrides {
            Some(path) => Some(Overrides::load(path, n)?),
            None => None,
        };

        let mut hints = match &config.hints_in {
            Some(path) if config.use_hints => Some(MatchHints::load(path, n, config.ex_pp)?),
            _ => None,
        };
        if config.mode == Mode::TwoPassVfr && config.use_hints {
            match &hints {
                Some(h) => h.require_complete()?,
                None => hints = Some(MatchHints::all_current(n)),
            }
        }

        let mut store = MetricStore::new(n);
        let mut header = None;
        if let Some(path) = &config.metrics_in {
            let mut file = MetricsFile::load(path, n)?;
            if !config.batch {
                file.check_settings(config.block_x, config.block_y, config.chroma)?;
            }
            if matches!(config.mode, Mode::TwoPassVfr | Mode::HighRateVfr) {
                if config.batch {
                    file.fill_missing();
                }
                if let Some(frame) = file.first_missing() {
                    return Err(DecimateError::invalid_params(format!(
                        "metrics file has no entry for frame {} (mode {} needs every frame)",
                        frame,
                        config.mode.index()
                    )));
                }
            }
            header = file.header;
            store = store.with_imported(file.entries);
        }

        let verify = header.is_some() && !config.batch;
        let checksum = if verify || config.metrics_out.is_some() {
            Checksum::Pending
        } else {
            Checksum::Unused
        };

        debug!(
            overrides = overrides.is_some(),
            hints = hints.is_some(),
            imported_metrics = header.is_some() || store.imported_complete(),
            "annotator ready"
        );
        Ok(Self {
            provider,
            overrides,
            hints,
            store,
            header,
            checksum,
            use_hints: config.use_hints,
            batch: config.batch,
            num_frames: n,
        })
    }

    /// Metric provider in use.
    pub fn provider(&self) -> &MetricProvider {
        &self.provider
    }

    /// Metric storage.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Override directives, if a file was loaded.
    pub fn overrides(&self) -> Option<&Overrides> {
        self.overrides.as_ref()
    }

    /// Whether anything about `frame` still has to be read from the clip.
    pub fn needs_analysis(&self, frame: usize) -> bool {
        if frame >= self.num_frames {
            return false;
        }
        if !self.store.is_known(frame) {
            return true;
        }
        self.use_hints
            && self.hints.as_ref().and_then(|h| h.get(frame)).is_none()
            && self.store.match_at(frame).is_none()
    }

    /// Source frames that must be fetched to analyze `frames`.
    pub fn dependencies(&self, frames: RangeInclusive<usize>) -> BTreeSet<usize> {
        let mut deps = BTreeSet::new();
        if self.checksum == Checksum::Pending {
            deps.extend(0..CHECKSUM_FRAMES.min(self.num_frames));
        }
        for f in frames.filter(|&f| self.needs_analysis(f)) {
            deps.insert(f.saturating_sub(1));
            deps.insert(f);
        }
        deps
    }

    /// Analyze every frame of `frames` that is not known yet.
    ///
    /// Returns `Pending` without recording anything for a frame whose
    /// inputs are not fetchable yet.
    pub fn analyze(
        &mut self,
        frames: RangeInclusive<usize>,
        source: &dyn FrameSource,
    ) -> Result<Poll<()>> {
        if self.checksum == Checksum::Pending {
            match self.compute_checksum(source)? {
                Poll::Ready(()) => {}
                Poll::Pending => return Ok(Poll::Pending),
            }
        }
        let mut pending = false;
        let todo: Vec<usize> = frames.filter(|&f| self.needs_analysis(f)).collect();
        for f in todo {
            let prev = source.fetch(f.saturating_sub(1));
            let curr = source.fetch(f);
            let (Some(prev), Some(curr)) = (prev, curr) else {
                pending = true;
                continue;
            };
            self.measure(f, &prev, &curr)?;
        }
        Ok(if pending { Poll::Pending } else { Poll::Ready(()) })
    }

    fn measure(&mut self, f: usize, prev: &Frame, curr: &Frame) -> Result<()> {
        if !self.store.is_known(f) {
            let metrics = if f == 0 {
                FrameMetrics::new(0, 0)
            } else {
                let diff = self.provider.compute(prev, curr)?;
                FrameMetrics::new(diff.worst, diff.scene)
            };
            trace!(frame = f, worst = ?metrics.worst, scene = ?metrics.scene, "measured frame");
            self.store.record(f, metrics);
        }
        if self.use_hints && self.store.match_at(f).is_none() {
            let hints = curr.hints();
            self.store.record_match(
                f,
                FrameMatch {
                    code: hints.normalized_match(),
                    film_d2v: hints.film_d2v,
                },
            );
        }
        Ok(())
    }

    fn compute_checksum(&mut self, source: &dyn FrameSource) -> Result<Poll<()>> {
        let count = CHECKSUM_FRAMES.min(self.num_frames);
        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            match source.fetch(i) {
                Some(frame) => frames.push(frame),
                None => return Ok(Poll::Pending),
            }
        }
        let crc = clip_checksum(frames.iter().map(Arc::as_ref));
        if let Some(header) = &self.header {
            if !self.batch {
                header.check_checksum(crc)?;
            }
        }
        debug!(crc, "clip checksum");
        self.checksum = Checksum::Known(crc);
        Ok(Poll::Ready(()))
    }

    /// Fill a freshly anchored cycle with everything known about its frames.
    ///
    /// Returns whether the cycle is fully populated; `metrics_set` is set
    /// accordingly.
    pub fn populate(&self, c: &mut Cycle) -> bool {
        if let Some(ovr) = &self.overrides {
            ovr.apply(c);
        }
        if let Some(hints) = &self.hints {
            hints.apply(c);
        }
        let complete = self.store.apply(c, self.provider.max_diff());
        if !self.use_hints {
            for slot in c.slots() {
                c.matches[slot].get_or_insert(MatchCode::Unknown);
            }
        }
        c.set_is_film_d2v();
        c.metrics_set = complete && c.is_populated();
        c.metrics_set
    }

    /// Header for a metrics file written from this run.
    pub fn output_header(&self) -> Option<MetricsHeader> {
        let Checksum::Known(crc) = self.checksum else {
            return None;
        };
        let config = self.provider.config();
        Some(MetricsHeader {
            crc,
            block_x: config.block_x,
            block_y: config.block_y,
            chroma: config.chroma,
        })
    }

    /// Make sure the checksum is known, fetching the leading frames.
    pub fn settle_checksum(&mut self, source: &mut dyn FrameSource) -> Result<()> {
        if self.checksum == Checksum::Unused {
            self.checksum = Checksum::Pending;
        }
        if self.checksum != Checksum::Pending {
            return Ok(());
        }
        let count = CHECKSUM_FRAMES.min(self.num_frames);
        for i in 0..count {
            source.request(i);
        }
        match self.compute_checksum(source)? {
            Poll::Ready(()) => Ok(()),
            Poll::Pending => {
                let missing = (0..count)
                    .find(|&i| source.fetch(i).is_none())
                    .unwrap_or(0);
                Err(DecimateError::FrameUnavailable(missing))
            }
        }
    }
}
