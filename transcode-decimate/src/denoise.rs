//! Pre-metric denoising.
//!
//! A separable `[1 2 1] / 4` blur applied before measuring differences so
//! grain does not masquerade as motion. Edge samples use `[1 1] / 2`.

use crate::frame::Frame;
use tracing::trace;

/// Number of blur passes used before measuring.
pub const PREDENOISE_ITERATIONS: usize = 2;

/// Blur a frame `iterations` times.
///
/// Chroma planes are blurred only when `chroma` is set, otherwise they are
/// copied through.
pub fn blur_frame(src: &Frame, iterations: usize, chroma: bool) -> Frame {
    let mut out = src.clone();
    let planes = if chroma { src.num_planes() } else { 1 };
    let mut scratch = Vec::new();
    for p in 0..planes {
        let width = src.plane_width(p) as usize;
        let height = src.plane_height(p) as usize;
        if let Some(data) = out.plane_mut(p) {
            for _ in 0..iterations {
                scratch.resize(data.len(), 0);
                blur_horizontal(data, &mut scratch, width, height);
                blur_vertical(&scratch, data, width, height);
            }
        }
    }
    trace!(iterations, planes, "blurred frame");
    out
}

#[inline]
fn tap2(a: u16, b: u16) -> u16 {
    ((a as u32 + b as u32 + 1) >> 1) as u16
}

#[inline]
fn tap3(a: u16, b: u16, c: u16) -> u16 {
    ((a as u32 + ((b as u32) << 1) + c as u32 + 2) >> 2) as u16
}

fn blur_horizontal(src: &[u16], dst: &mut [u16], width: usize, height: usize) {
    if width < 2 {
        dst.copy_from_slice(src);
        return;
    }
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        let out = &mut dst[y * width..(y + 1) * width];
        out[0] = tap2(row[0], row[1]);
        for x in 1..width - 1 {
            out[x] = tap3(row[x - 1], row[x], row[x + 1]);
        }
        out[width - 1] = tap2(row[width - 2], row[width - 1]);
    }
}

fn blur_vertical(src: &[u16], dst: &mut [u16], width: usize, height: usize) {
    if height < 2 {
        dst.copy_from_slice(src);
        return;
    }
    for x in 0..width {
        dst[x] = tap2(src[x], src[width + x]);
        let last = (height - 1) * width;
        dst[last + x] = tap2(src[last + x], src[last - width + x]);
    }
    for y in 1..height - 1 {
        for x in 0..width {
            let i = y * width + x;
            dst[i] = tap3(src[i - width], src[i], src[i + width]);
        }
    }
}
