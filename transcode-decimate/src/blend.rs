//! Blend ratios and frame blending.
//!
//! Two kinds of rate conversion produce blended output:
//!
//! - **Down-conversion** (video cycles under hybrid 1) spreads `cycle - r`
//!   output positions evenly over the `cycle` source frames.
//! - **Post-decimation up-conversion** (film cycles under hybrid 3) spreads
//!   `cycle` output positions over the frames that survive decimation.
//!
//! Both yield a pair of source frames with weights that sum to one.

use crate::cycle::Cycle;
use crate::error::Result;
use crate::frame::Frame;

/// Fixed-point scale of the pixel blend weight.
const WEIGHT_ONE: u32 = 32768;

/// Source frames and weights for one output frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendRatios {
    /// First source frame.
    pub frame1: i64,
    /// Second source frame.
    pub frame2: i64,
    /// Weight of the first frame.
    pub a1: f64,
    /// Weight of the second frame, `1 - a1`.
    pub a2: f64,
}

impl BlendRatios {
    /// The frame to show alone when one weight is full.
    pub fn single_frame(&self) -> Option<i64> {
        if self.a1 >= 1.0 {
            Some(self.frame1)
        } else if self.a2 >= 1.0 {
            Some(self.frame2)
        } else {
            None
        }
    }

    fn at(pos: f64, frame1: i64, frame2: i64) -> Self {
        let frac = pos - pos.floor();
        Self {
            frame1,
            frame2,
            a1: 1.0 - frac,
            a2: frac,
        }
    }
}

/// Ratios for output `n` of a video cycle starting at `base` with
/// `valid_len` frames, reduced by `cycle_r` per cycle of `cycle`.
pub fn down_convert_ratios(
    n: usize,
    base: i64,
    cycle: usize,
    cycle_r: usize,
    valid_len: usize,
    last_frame: i64,
) -> BlendRatios {
    let len = valid_len as f64;
    let kept = valid_len.saturating_sub(cycle_r).max(1) as f64;
    let step = len / kept;
    let offset = ((len - 1.0) - step * (kept - 1.0)) * 0.5;
    let index = n % (cycle - cycle_r).max(1);
    let pos = base as f64 + index as f64 * step + offset;
    let frame1 = (pos.floor() as i64).clamp(0, last_frame);
    let frame2 = ((pos + 1.0).floor() as i64).clamp(0, last_frame);
    BlendRatios::at(pos, frame1, frame2)
}

/// Ratios for output `n` of an up-converted film cycle with `remove`
/// frames decimated.
///
/// Positions run over the last kept frame of `prev`, the kept frames of
/// `curr` and the first kept frame of `next`, clamped to the stream.
pub fn post_decimation_ratios(
    n: usize,
    prev: &Cycle,
    curr: &Cycle,
    next: &Cycle,
    remove: usize,
    last_frame: i64,
) -> BlendRatios {
    let cycle_i = curr.valid_len();
    let cycle_d = cycle_i.saturating_sub(remove);
    let step = cycle_d as f64 / cycle_i.max(1) as f64;
    let span = (cycle_i as f64 - 1.0) * step;
    let offset = (span - span.floor()) * 0.5;
    let pos = 1.0 + (n % curr.length) as f64 * step - offset;

    let mut lut: Vec<Option<i64>> = vec![None; cycle_i + 2];
    lut[0] = prev
        .slots()
        .rev()
        .find(|&i| !prev.is_dropped(i))
        .map(|i| prev.source_frame(i));
    let kept = curr.kept_slots();
    for (k, &slot) in kept.iter().enumerate() {
        lut[k + 1] = Some(curr.source_frame(slot));
    }
    // next is assumed to follow the same pattern
    if let Some(&first) = kept.first() {
        lut[kept.len() + 1] = Some(next.frame_so + (first - curr.cycle_s) as i64);
    }
    let lookup = |pos: f64| {
        let idx = (pos.floor().max(0.0) as usize).min(lut.len() - 1);
        lut[idx].unwrap_or(0).clamp(0, last_frame)
    };
    BlendRatios::at(pos, lookup(pos), lookup(pos + 1.0))
}

/// Pixel blender with 15-bit fixed-point weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBlender;

impl FrameBlender {
    /// Create a blender.
    pub fn new() -> Self {
        Self
    }

    /// Fixed-point weight of the first frame.
    pub fn weight(a1: f64) -> i32 {
        (a1 as f32 * WEIGHT_ONE as f32 + 0.5) as i32
    }

    /// Blend two frames, `a1` being the weight of `frame1`.
    ///
    /// A full weight copies one of the inputs unchanged.
    pub fn blend(&self, frame1: &Frame, frame2: &Frame, a1: f64) -> Result<Frame> {
        frame1.check_compatible(frame2)?;
        let weight = Self::weight(a1);
        if weight >= WEIGHT_ONE as i32 {
            return Ok(frame1.clone());
        }
        if weight <= 0 {
            return Ok(frame2.clone());
        }
        let mut output = frame1.clone();
        for plane in 0..frame1.num_planes() {
            if let (Some(a), Some(b), Some(dst)) = (
                frame1.plane(plane),
                frame2.plane(plane),
                output.plane_mut(plane),
            ) {
                blend_plane(a, b, dst, weight as u32);
            }
        }
        Ok(output)
    }
}

fn blend_plane(a: &[u16], b: &[u16], dst: &mut [u16], weight: u32) {
    let inv = WEIGHT_ONE - weight;
    for ((d, &x), &y) in dst.iter_mut().zip(a).zip(b) {
        *d = ((x as u32 * weight + y as u32 * inv + (WEIGHT_ONE >> 1)) >> 15) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::tests::cycle_with;
    use crate::frame::PixelFormat;
    use pretty_assertions::assert_eq;

    fn flat(value: u16) -> Frame {
        let mut frame = Frame::new(16, 16, PixelFormat::Yuv420p, 8);
        frame.fill_plane(0, value);
        frame
    }

    #[test]
    fn test_down_convert_positions() {
        // five video frames spread over four outputs
        let r: Vec<BlendRatios> = (0..4)
            .map(|n| down_convert_ratios(n, 10, 5, 1, 5, 100))
            .collect();
        assert_eq!(r[0].frame1, 10);
        assert!((r[0].a1 - 0.875).abs() < 1e-9);
        assert_eq!(r[3].frame1, 13);
        assert_eq!(r[3].frame2, 14);
        assert!((r[3].a2 - 0.875).abs() < 1e-9);
        for ratio in r {
            assert!((ratio.a1 + ratio.a2 - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_post_decimation_positions() {
        let mut p = cycle_with(0, &[9, 9, 9, 9, 9], "ccccc");
        let mut c = cycle_with(5, &[9, 9, 9, 9, 9], "ccccc");
        let n = cycle_with(10, &[9, 9, 9, 9, 9], "ccccc");
        p.drop_slot(4);
        c.drop_slot(2);
        let first = post_decimation_ratios(0, &p, &c, &n, 1, 100);
        // lut = [3, 5, 6, 8, 9, 10]
        assert_eq!(first.frame1, 3);
        assert_eq!(first.frame2, 5);
        assert!((first.a2 - 0.9).abs() < 1e-9);
        let last = post_decimation_ratios(4, &p, &c, &n, 1, 100);
        assert_eq!(last.frame1, 9);
        assert_eq!(last.frame2, 10);
    }

    #[test]
    fn test_single_frame() {
        let r = BlendRatios {
            frame1: 3,
            frame2: 4,
            a1: 1.0,
            a2: 0.0,
        };
        assert_eq!(r.single_frame(), Some(3));
        let r = BlendRatios { a1: 0.0, a2: 1.0, ..r };
        assert_eq!(r.single_frame(), Some(4));
        let r = BlendRatios { a1: 0.5, a2: 0.5, ..r };
        assert_eq!(r.single_frame(), None);
    }

    #[test]
    fn test_blend_equal_weight() {
        let blender = FrameBlender::new();
        let out = blender.blend(&flat(100), &flat(201), 0.5).unwrap();
        assert!(out.plane(0).unwrap().iter().all(|&v| v == 151));
    }

    #[test]
    fn test_blend_full_weights_copy() {
        let blender = FrameBlender::new();
        let a = flat(100);
        let b = flat(200);
        assert_eq!(blender.blend(&a, &b, 1.0).unwrap(), a);
        assert_eq!(blender.blend(&a, &b, 0.0).unwrap(), b);
        assert_eq!(FrameBlender::weight(0.99999), 32768);
    }

    #[test]
    fn test_blend_dimension_mismatch() {
        let blender = FrameBlender::new();
        let a = flat(100);
        let b = Frame::new(32, 32, PixelFormat::Yuv420p, 8);
        assert!(blender.blend(&a, &b, 0.5).is_err());
    }
}
