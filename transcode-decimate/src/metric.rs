//! Block-based frame difference metrics.
//!
//! Differences are accumulated into four overlapping block grids offset by
//! half a block horizontally, vertically and diagonally, so motion that
//! straddles a block edge is still caught by one of the grids. The worst
//! block across all grids is the frame difference; the sum of the
//! unshifted luma grid is the scene difference.

use crate::denoise::{blur_frame, PREDENOISE_ITERATIONS};
use crate::error::{DecimateError, Result};
use crate::frame::{Frame, PixelFormat};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Luma excursion of nominal-range 8-bit video.
const LUMA_RANGE: f64 = 219.0;
/// Chroma excursion of nominal-range 8-bit video.
const CHROMA_RANGE: f64 = 224.0;

/// Metric computation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Block width, a power of two in 4..=2048.
    pub block_x: u32,
    /// Block height, a power of two in 4..=2048.
    pub block_y: u32,
    /// Noise threshold; per-pixel differences at or below it are ignored.
    pub nt: u32,
    /// Sum of squared differences instead of absolute differences.
    pub ssd: bool,
    /// Include chroma planes.
    pub chroma: bool,
    /// Blur both frames before measuring.
    pub predenoise: bool,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            block_x: 32,
            block_y: 32,
            nt: 0,
            ssd: false,
            chroma: true,
            predenoise: false,
        }
    }
}

impl MetricConfig {
    /// Validate block sizes.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("block_x", self.block_x), ("block_y", self.block_y)] {
            if !v.is_power_of_two() || !(4..=2048).contains(&v) {
                return Err(DecimateError::invalid_params(format!(
                    "{} must be a power of two between 4 and 2048 (got {})",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

/// Result of comparing two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDiff {
    /// Largest block difference over all grids.
    pub worst: u64,
    /// Whole-frame luma difference.
    pub scene: u64,
    /// Scratch index of the worst block.
    pub worst_block: usize,
}

/// Computes difference metrics between frames of one clip geometry.
#[derive(Debug)]
pub struct MetricProvider {
    config: MetricConfig,
    width: u32,
    height: u32,
    format: PixelFormat,
    bit_depth: u32,
    shift_x: u32,
    shift_y: u32,
    xblocks: usize,
    yblocks: usize,
    scratch: Vec<u64>,
    max_diff: u64,
    scene_divisor: u64,
}

impl MetricProvider {
    /// Create a provider for frames of the given geometry.
    pub fn new(
        config: MetricConfig,
        width: u32,
        height: u32,
        format: PixelFormat,
        bit_depth: u32,
    ) -> Result<Self> {
        config.validate()?;
        if !(8..=16).contains(&bit_depth) {
            return Err(DecimateError::unsupported_format(format!(
                "only 8-16 bit samples are supported (got {})",
                bit_depth
            )));
        }
        let shift_x = config.block_x.trailing_zeros();
        let shift_y = config.block_y.trailing_zeros();
        let xblocks = ((width + config.block_x / 2) >> shift_x) as usize + 1;
        let yblocks = ((height + config.block_y / 2) >> shift_y) as usize + 1;

        let luma = LUMA_RANGE * config.block_x as f64 * config.block_y as f64;
        let (sw, sh) = format.chroma_shift();
        let chroma_area = if config.chroma && format.num_planes() > 1 {
            (config.block_x >> sw) as f64 * (config.block_y >> sh) as f64 * 2.0
        } else {
            0.0
        };
        let max_diff = if config.ssd {
            (LUMA_RANGE * luma + CHROMA_RANGE * CHROMA_RANGE * chroma_area).sqrt() as u64
        } else {
            (luma + CHROMA_RANGE * chroma_area) as u64
        };
        let area = width as f64 * height as f64;
        let scene_divisor = if config.ssd {
            (LUMA_RANGE * LUMA_RANGE * area).sqrt() as u64
        } else {
            (LUMA_RANGE * area) as u64
        };

        Ok(Self {
            config,
            width,
            height,
            format,
            bit_depth,
            shift_x,
            shift_y,
            xblocks,
            yblocks,
            scratch: vec![0; xblocks * yblocks * 4],
            max_diff,
            scene_divisor,
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    /// Largest possible block difference.
    pub fn max_diff(&self) -> u64 {
        self.max_diff
    }

    /// Largest possible scene difference.
    pub fn scene_divisor(&self) -> u64 {
        self.scene_divisor
    }

    /// Number of blocks per grid as (columns, rows).
    pub fn grid(&self) -> (usize, usize) {
        (self.xblocks, self.yblocks)
    }

    /// Scale a raw block difference to 0..100.
    pub fn normalize(&self, raw: u64) -> f64 {
        raw as f64 * 100.0 / self.max_diff as f64
    }

    /// Raw scene threshold for a percentage threshold.
    pub fn scene_threshold(&self, percent: f64) -> u64 {
        (percent * self.scene_divisor as f64 / 100.0) as u64
    }

    /// Raw block threshold for a percentage threshold.
    pub fn block_threshold(&self, percent: f64) -> u64 {
        (percent * self.max_diff as f64 / 100.0) as u64
    }

    /// Compare `curr` against `prev`.
    pub fn compute(&mut self, prev: &Frame, curr: &Frame) -> Result<FrameDiff> {
        self.check_frame(prev)?;
        self.check_frame(curr)?;

        if self.config.predenoise {
            let prev = blur_frame(prev, PREDENOISE_ITERATIONS, self.config.chroma);
            let curr = blur_frame(curr, PREDENOISE_ITERATIONS, self.config.chroma);
            Ok(self.measure(&prev, &curr))
        } else {
            Ok(self.measure(prev, curr))
        }
    }

    fn check_frame(&self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(DecimateError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        if frame.format() != self.format || frame.bit_depth() != self.bit_depth {
            return Err(DecimateError::unsupported_format(format!(
                "expected {} {}-bit, got {} {}-bit",
                self.format,
                self.bit_depth,
                frame.format(),
                frame.bit_depth()
            )));
        }
        Ok(())
    }

    fn measure(&mut self, prev: &Frame, curr: &Frame) -> FrameDiff {
        self.scratch.fill(0);
        let planes = if self.config.chroma {
            prev.num_planes()
        } else {
            1
        };

        let mut scene = 0u64;
        for plane in 0..planes {
            self.accumulate_plane(prev, curr, plane);
            if plane == 0 {
                scene = self.scratch.iter().step_by(4).sum();
            }
        }

        let mut worst = 0u64;
        let mut worst_block = 0usize;
        for (i, &v) in self.scratch.iter().enumerate() {
            if v > worst {
                worst = v;
                worst_block = i;
            }
        }
        if self.config.ssd {
            worst = (worst as f64).sqrt() as u64;
            scene = (scene as f64).sqrt() as u64;
        }
        trace!(worst, scene, worst_block, "frame difference");
        FrameDiff {
            worst,
            scene,
            worst_block,
        }
    }

    fn accumulate_plane(&mut self, prev: &Frame, curr: &Frame, plane: usize) {
        let (a, b) = match (prev.plane(plane), curr.plane(plane)) {
            (Some(a), Some(b)) => (a, b),
            _ => return,
        };
        let width = prev.plane_width(plane) as usize;
        let height = prev.plane_height(plane) as usize;
        let (sx, sy) = if plane == 0 {
            (0, 0)
        } else {
            self.format.chroma_shift()
        };
        let depth_shift = self.bit_depth - 8;
        let scale = if self.config.ssd {
            2 * depth_shift
        } else {
            depth_shift
        };
        let nt = self.config.nt as u64;
        let half_x = (self.config.block_x / 2) as usize;
        let half_y = (self.config.block_y / 2) as usize;
        let stride4 = self.xblocks * 4;

        for y in 0..height {
            let ly = y << sy;
            let row1 = (ly >> self.shift_y) * stride4;
            let row2 = ((ly + half_y) >> self.shift_y) * stride4;
            let offset = y * width;
            for x in 0..width {
                let d = (a[offset + x] as i64 - b[offset + x] as i64).unsigned_abs();
                let d = (if self.config.ssd { d * d } else { d }) >> scale;
                if d <= nt {
                    continue;
                }
                let lx = x << sx;
                let col1 = (lx >> self.shift_x) << 2;
                let col2 = ((lx + half_x) >> self.shift_x) << 2;
                self.scratch[row1 + col1] += d;
                self.scratch[row1 + col2 + 1] += d;
                self.scratch[row2 + col1 + 2] += d;
                self.scratch[row2 + col2 + 3] += d;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider(config: MetricConfig) -> MetricProvider {
        MetricProvider::new(config, 64, 64, PixelFormat::Yuv420p, 8).unwrap()
    }

    #[test]
    fn test_identical_frames() {
        let mut p = provider(MetricConfig::default());
        let f = Frame::new(64, 64, PixelFormat::Yuv420p, 8);
        let diff = p.compute(&f, &f).unwrap();
        assert_eq!(diff, FrameDiff::default());
    }

    #[test]
    fn test_max_diff() {
        let p = provider(MetricConfig::default());
        assert_eq!(p.max_diff(), 219 * 32 * 32 + 224 * 16 * 16 * 2);
        let luma_only = provider(MetricConfig {
            chroma: false,
            ..Default::default()
        });
        assert_eq!(luma_only.max_diff(), 219 * 32 * 32);
        assert_eq!(luma_only.grid(), (3, 3));
        assert_eq!(luma_only.normalize(219 * 32 * 32), 100.0);
        assert_eq!(luma_only.block_threshold(100.0), 219 * 32 * 32);
    }

    #[test]
    fn test_single_block_change() {
        let mut p = provider(MetricConfig {
            chroma: false,
            ..Default::default()
        });
        let a = Frame::new(64, 64, PixelFormat::Yuv420p, 8);
        let mut b = a.clone();
        {
            let plane = b.plane_mut(0).unwrap();
            for y in 0..8 {
                for x in 0..8 {
                    plane[y * 64 + x] = 10;
                }
            }
        }
        let diff = p.compute(&a, &b).unwrap();
        assert_eq!(diff.worst, 640);
        assert_eq!(diff.scene, 640);
    }

    #[test]
    fn test_noise_threshold() {
        let mut p = provider(MetricConfig {
            nt: 3,
            chroma: false,
            ..Default::default()
        });
        let a = Frame::new(64, 64, PixelFormat::Yuv420p, 8);
        let mut b = a.clone();
        b.fill_plane(0, 3);
        assert_eq!(p.compute(&a, &b).unwrap().worst, 0);
        b.fill_plane(0, 4);
        assert!(p.compute(&a, &b).unwrap().worst > 0);
    }

    #[test]
    fn test_high_bit_depth_scaled() {
        let config = MetricConfig {
            chroma: false,
            ..Default::default()
        };
        let mut p8 = MetricProvider::new(config, 32, 32, PixelFormat::Gray, 8).unwrap();
        let mut p10 = MetricProvider::new(config, 32, 32, PixelFormat::Gray, 10).unwrap();
        let mut a8 = Frame::new(32, 32, PixelFormat::Gray, 8);
        let mut a10 = Frame::new(32, 32, PixelFormat::Gray, 10);
        let b8 = a8.clone();
        let b10 = a10.clone();
        a8.fill_plane(0, 5);
        a10.fill_plane(0, 20);
        let d8 = p8.compute(&a8, &b8).unwrap();
        let d10 = p10.compute(&a10, &b10).unwrap();
        assert_eq!(d8.worst, d10.worst);
    }

    #[test]
    fn test_ssd_square_root() {
        let mut p = provider(MetricConfig {
            ssd: true,
            chroma: false,
            ..Default::default()
        });
        let a = Frame::new(64, 64, PixelFormat::Yuv420p, 8);
        let mut b = a.clone();
        b.plane_mut(0).unwrap()[0] = 4;
        let diff = p.compute(&a, &b).unwrap();
        assert_eq!(diff.worst, 4);
    }

    #[test]
    fn test_rejects_bad_block_size() {
        let config = MetricConfig {
            block_x: 24,
            ..Default::default()
        };
        assert!(MetricProvider::new(config, 64, 64, PixelFormat::Yuv420p, 8).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut p = provider(MetricConfig::default());
        let a = Frame::new(64, 64, PixelFormat::Yuv420p, 8);
        let b = Frame::new(32, 64, PixelFormat::Yuv420p, 8);
        assert!(matches!(
            p.compute(&a, &b),
            Err(DecimateError::DimensionMismatch { .. })
        ));
    }
}
