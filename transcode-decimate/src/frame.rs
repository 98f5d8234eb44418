//! Planar video frames as seen by the decimator.
//!
//! Samples are stored as `u16` regardless of bit depth so the metric and
//! blend kernels share one code path for 8-16 bit input.

use crate::cycle::MatchCode;
use crate::error::{DecimateError, Result};
use std::fmt;

/// Pixel format of a planar frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0.
    #[default]
    Yuv420p,
    /// Planar YUV 4:2:2.
    Yuv422p,
    /// Planar YUV 4:4:4.
    Yuv444p,
    /// Planar YUV 4:1:1.
    Yuv411p,
    /// Planar YUV 4:1:0.
    Yuv410p,
    /// Single luma plane.
    Gray,
    /// Planar RGB.
    Rgbp,
}

impl PixelFormat {
    /// Get the number of planes for this pixel format.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Gray => 1,
            _ => 3,
        }
    }

    /// Whether this format belongs to the YUV family.
    pub fn is_yuv(&self) -> bool {
        !matches!(self, Self::Gray | Self::Rgbp)
    }

    /// Chroma subsampling as log2 shifts (horizontal, vertical).
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (1, 1),
            Self::Yuv422p => (1, 0),
            Self::Yuv411p => (2, 0),
            Self::Yuv410p => (2, 2),
            Self::Yuv444p | Self::Gray | Self::Rgbp => (0, 0),
        }
    }

    /// Dimensions of the given plane for a frame of `width`x`height`.
    pub fn plane_dimensions(&self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        if plane == 0 {
            return (width, height);
        }
        let (sw, sh) = self.chroma_shift();
        (width >> sw, height >> sh)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuv420p => write!(f, "yuv420p"),
            Self::Yuv422p => write!(f, "yuv422p"),
            Self::Yuv444p => write!(f, "yuv444p"),
            Self::Yuv411p => write!(f, "yuv411p"),
            Self::Yuv410p => write!(f, "yuv410p"),
            Self::Gray => write!(f, "gray"),
            Self::Rgbp => write!(f, "rgbp"),
        }
    }
}

/// Field-matching metadata attached to a frame by the upstream matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHints {
    /// Match code chosen for this frame, if the matcher supplied one.
    pub match_code: Option<MatchCode>,
    /// Frame is a repeated field of d2v film material.
    pub film_d2v: bool,
    /// Matcher ran with top field as the base field.
    pub top_field: bool,
}

impl FrameHints {
    /// Hints for a frame matched with `code` against the bottom field.
    pub fn with_match(code: MatchCode) -> Self {
        Self {
            match_code: Some(code),
            ..Default::default()
        }
    }

    /// Match code normalized to bottom-field orientation.
    ///
    /// With a top base field, previous/next matches swap meaning with the
    /// blended-field variants.
    pub fn normalized_match(&self) -> MatchCode {
        match self.match_code {
            None => MatchCode::Unknown,
            Some(code) if self.top_field => code.swap_field(),
            Some(code) => code,
        }
    }
}

/// A decoded planar video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    bit_depth: u32,
    planes: Vec<Vec<u16>>,
    hints: FrameHints,
}

impl Frame {
    /// Create a black frame.
    pub fn new(width: u32, height: u32, format: PixelFormat, bit_depth: u32) -> Self {
        let mid = 1u16 << (bit_depth.clamp(8, 16) - 1);
        let planes = (0..format.num_planes())
            .map(|p| {
                let (w, h) = format.plane_dimensions(p, width, height);
                let fill = if p == 0 || !format.is_yuv() { 0 } else { mid };
                vec![fill; w as usize * h as usize]
            })
            .collect();
        Self {
            width,
            height,
            format,
            bit_depth,
            planes,
            hints: FrameHints::default(),
        }
    }

    /// Create a frame from existing plane data.
    pub fn from_planes(
        width: u32,
        height: u32,
        format: PixelFormat,
        bit_depth: u32,
        planes: Vec<Vec<u16>>,
    ) -> Result<Self> {
        if planes.len() != format.num_planes() {
            return Err(DecimateError::invalid_params(format!(
                "{} expects {} planes, got {}",
                format,
                format.num_planes(),
                planes.len()
            )));
        }
        for (p, data) in planes.iter().enumerate() {
            let (w, h) = format.plane_dimensions(p, width, height);
            if data.len() != w as usize * h as usize {
                return Err(DecimateError::invalid_params(format!(
                    "plane {} has {} samples, expected {}",
                    p,
                    data.len(),
                    w as usize * h as usize
                )));
            }
        }
        Ok(Self {
            width,
            height,
            format,
            bit_depth,
            planes,
            hints: FrameHints::default(),
        })
    }

    /// Attach matcher hints to this frame.
    pub fn with_hints(mut self, hints: FrameHints) -> Self {
        self.hints = hints;
        self
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bits per sample.
    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    /// Matcher hints attached to this frame.
    pub fn hints(&self) -> &FrameHints {
        &self.hints
    }

    /// Number of planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Width of a plane in samples.
    pub fn plane_width(&self, plane: usize) -> u32 {
        self.format.plane_dimensions(plane, self.width, self.height).0
    }

    /// Height of a plane in rows.
    pub fn plane_height(&self, plane: usize) -> u32 {
        self.format.plane_dimensions(plane, self.width, self.height).1
    }

    /// Samples of a plane, row-major with stride equal to the plane width.
    pub fn plane(&self, plane: usize) -> Option<&[u16]> {
        self.planes.get(plane).map(|p| p.as_slice())
    }

    /// Mutable samples of a plane.
    pub fn plane_mut(&mut self, plane: usize) -> Option<&mut [u16]> {
        self.planes.get_mut(plane).map(|p| p.as_mut_slice())
    }

    /// Fill every sample of a plane with `value`.
    pub fn fill_plane(&mut self, plane: usize, value: u16) {
        if let Some(p) = self.planes.get_mut(plane) {
            p.fill(value);
        }
    }

    /// Check that `other` has the same geometry and format.
    pub fn check_compatible(&self, other: &Frame) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(DecimateError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width,
                actual_height: other.height,
            });
        }
        if self.format != other.format || self.bit_depth != other.bit_depth {
            return Err(DecimateError::unsupported_format(format!(
                "cannot combine {} {}-bit with {} {}-bit",
                self.format, self.bit_depth, other.format, other.bit_depth
            )));
        }
        Ok(())
    }
}
