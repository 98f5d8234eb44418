//! Metrics files.
//!
//! Difference metrics are expensive, so a run can save them and a later run
//! (or a two-pass mode) can load them back:
//!
//! ```text
//! #TDecimate 0.1.0
//! crc32 = 7a3c91d2, blockx = 32, blocky = 32, chroma = T
//! 0 0 0
//! 1 1834 290113
//! ```
//!
//! The checksum ties the file to the clip it was made from; block size and
//! chroma must match because they change the metric scale.

use crate::error::{DecimateError, Result};
use crate::frame::Frame;
use crate::store::FrameMetrics;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::debug;

const FILE: &str = "metrics";

/// Frames covered by the clip checksum.
pub const CHECKSUM_FRAMES: usize = 15;

/// Settings a metrics file was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsHeader {
    /// Clip checksum.
    pub crc: u32,
    /// Metric block width.
    pub block_x: u32,
    /// Metric block height.
    pub block_y: u32,
    /// Chroma was included.
    pub chroma: bool,
}

impl MetricsHeader {
    /// Check the clip checksum.
    pub fn check_checksum(&self, crc: u32) -> Result<()> {
        if self.crc == crc {
            return Ok(());
        }
        Err(DecimateError::HeaderMismatch(format!(
            "crc32 {:#x} does not match that of the current clip ({:#x})",
            self.crc, crc
        )))
    }
}

/// A parsed metrics file.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsFile {
    /// Header line, when present.
    pub header: Option<MetricsHeader>,
    /// Metrics indexed by frame.
    pub entries: Vec<FrameMetrics>,
}

impl MetricsFile {
    /// Read and parse a metrics file.
    pub fn load(path: &Path, num_frames: usize) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file = Self::parse(&text, num_frames)?;
        debug!(
            path = %path.display(),
            complete = file.is_complete(),
            "loaded metrics file"
        );
        Ok(file)
    }

    /// Parse metrics text for a clip of `num_frames` frames.
    pub fn parse(text: &str, num_frames: usize) -> Result<Self> {
        let mut file = Self {
            header: None,
            entries: vec![FrameMetrics::default(); num_frames],
        };
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.to_ascii_lowercase().starts_with("crc32") {
                file.header = Some(parse_header(line, line_no)?);
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[frame, worst, scene] = fields.as_slice() else {
                return Err(DecimateError::parse(FILE, line_no, "expected 'frame metric metric'"));
            };
            let number = |s: &str| {
                s.parse::<u64>().map_err(|_| {
                    DecimateError::parse(FILE, line_no, format!("invalid number '{}'", s))
                })
            };
            let frame = number(frame)? as usize;
            if frame >= num_frames {
                return Err(DecimateError::parse(FILE, line_no, "out of range frame number"));
            }
            let known = |v: u64| (v != u64::MAX).then_some(v);
            file.entries[frame] = FrameMetrics {
                worst: known(number(worst)?),
                scene: known(number(scene)?),
            };
        }
        Ok(file)
    }

    /// Whether every frame has metrics.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|m| m.worst.is_some())
    }

    /// First frame without metrics.
    pub fn first_missing(&self) -> Option<usize> {
        self.entries.iter().position(|m| m.worst.is_none())
    }

    /// Replace missing entries with zero metrics.
    pub fn fill_missing(&mut self) {
        for m in self.entries.iter_mut().filter(|m| !m.is_complete()) {
            *m = FrameMetrics::new(m.worst.unwrap_or(0), m.scene.unwrap_or(0));
        }
    }

    /// Check block size and chroma against the current settings.
    pub fn check_settings(&self, block_x: u32, block_y: u32, chroma: bool) -> Result<()> {
        let Some(header) = self.header else {
            return Ok(());
        };
        if header.block_x != block_x {
            return Err(DecimateError::HeaderMismatch(format!(
                "blockx {} does not match the current value {}",
                header.block_x, block_x
            )));
        }
        if header.block_y != block_y {
            return Err(DecimateError::HeaderMismatch(format!(
                "blocky {} does not match the current value {}",
                header.block_y, block_y
            )));
        }
        if header.chroma != chroma {
            return Err(DecimateError::HeaderMismatch(
                "chroma setting does not match the current value".into(),
            ));
        }
        Ok(())
    }

    /// Check the clip checksum.
    pub fn check_checksum(&self, crc: u32) -> Result<()> {
        match &self.header {
            Some(header) => header.check_checksum(crc),
            None => Ok(()),
        }
    }

    /// Render a metrics file; frames with no metrics are left out.
    pub fn render(header: &MetricsHeader, entries: &[FrameMetrics]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#TDecimate {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(
            out,
            "crc32 = {:x}, blockx = {}, blocky = {}, chroma = {}",
            header.crc,
            header.block_x,
            header.block_y,
            if header.chroma { 'T' } else { 'F' }
        );
        for (frame, m) in entries.iter().enumerate() {
            if m.worst.is_none() && m.scene.is_none() {
                continue;
            }
            let _ = writeln!(
                out,
                "{} {} {}",
                frame,
                m.worst.unwrap_or(u64::MAX),
                m.scene.unwrap_or(u64::MAX)
            );
        }
        out
    }

    /// Write a metrics file.
    pub fn save(path: &Path, header: &MetricsHeader, entries: &[FrameMetrics]) -> Result<()> {
        fs::write(path, Self::render(header, entries))?;
        debug!(path = %path.display(), "wrote metrics file");
        Ok(())
    }
}

fn parse_header(line: &str, line_no: usize) -> Result<MetricsHeader> {
    let mut crc = None;
    let mut block_x = None;
    let mut block_y = None;
    let mut chroma = None;
    for field in line.split(',') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let bad = || DecimateError::parse(FILE, line_no, format!("invalid header value '{}'", value));
        match key.trim().to_ascii_lowercase().as_str() {
            "crc32" => crc = Some(u32::from_str_radix(value, 16).map_err(|_| bad())?),
            "blockx" => block_x = Some(value.parse().map_err(|_| bad())?),
            "blocky" => block_y = Some(value.parse().map_err(|_| bad())?),
            "chroma" => {
                chroma = Some(match value.chars().next() {
                    Some('T' | 't') => true,
                    Some('F' | 'f') => false,
                    _ => return Err(bad()),
                })
            }
            _ => {}
        }
    }
    match (crc, block_x, block_y, chroma) {
        (Some(crc), Some(block_x), Some(block_y), Some(chroma)) => Ok(MetricsHeader {
            crc,
            block_x,
            block_y,
            chroma,
        }),
        _ => Err(DecimateError::parse(FILE, line_no, "incomplete header")),
    }
}

/// Incremental CRC-32 (IEEE polynomial).
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Start a checksum.
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    /// Feed bytes.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state ^= byte as u32;
            for _ in 0..8 {
                if self.state & 1 != 0 {
                    self.state = (self.state >> 1) ^ 0xEDB8_8320;
                } else {
                    self.state >>= 1;
                }
            }
        }
    }

    /// Final value.
    pub fn finish(&self) -> u32 {
        !self.state
    }
}

/// Checksum of the luma planes of the leading frames of a clip.
///
/// 8-bit samples contribute one byte each, deeper samples two bytes in
/// little-endian order.
pub fn clip_checksum<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> u32 {
    let mut crc = Crc32::new();
    for frame in frames.into_iter().take(CHECKSUM_FRAMES) {
        let Some(luma) = frame.plane(0) else {
            continue;
        };
        if frame.bit_depth() <= 8 {
            let bytes: Vec<u8> = luma.iter().map(|&v| v as u8).collect();
            crc.update(&bytes);
        } else {
            for &v in luma {
                crc.update(&v.to_le_bytes());
            }
        }
    }
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "#TDecimate 0.1.0\n\
        crc32 = 1a2b, blockx = 32, blocky = 16, chroma = F\n\
        0 0 0\n\
        2 150 3000\n";

    #[test]
    fn test_parse() {
        let file = MetricsFile::parse(SAMPLE, 3).unwrap();
        assert_eq!(
            file.header,
            Some(MetricsHeader {
                crc: 0x1a2b,
                block_x: 32,
                block_y: 16,
                chroma: false,
            })
        );
        assert_eq!(file.entries[2], FrameMetrics::new(150, 3000));
        assert_eq!(file.first_missing(), Some(1));
        assert!(!file.is_complete());
    }

    #[test]
    fn test_header_checks() {
        let file = MetricsFile::parse(SAMPLE, 3).unwrap();
        assert!(file.check_settings(32, 16, false).is_ok());
        assert!(matches!(
            file.check_settings(32, 32, false),
            Err(DecimateError::HeaderMismatch(_))
        ));
        assert!(file.check_settings(32, 16, true).is_err());
        assert!(file.check_checksum(0x1a2b).is_ok());
        assert!(file.check_checksum(0x1a2c).is_err());
    }

    #[test]
    fn test_out_of_range_frame() {
        assert!(matches!(
            MetricsFile::parse("9 1 1\n", 3),
            Err(DecimateError::Parse { line: 1, .. })
        ));
        assert!(MetricsFile::parse("1 x 1\n", 3).is_err());
    }

    #[test]
    fn test_render_then_parse() {
        let header = MetricsHeader {
            crc: 0xdead_beef,
            block_x: 16,
            block_y: 16,
            chroma: true,
        };
        let entries = vec![
            FrameMetrics::new(0, 0),
            FrameMetrics::default(),
            FrameMetrics::new(42, 4242),
        ];
        let text = MetricsFile::render(&header, &entries);
        assert!(text.contains("crc32 = deadbeef, blockx = 16, blocky = 16, chroma = T"));
        assert!(!text.contains("\n1 "));
        let file = MetricsFile::parse(&text, 3).unwrap();
        assert_eq!(file.header, Some(header));
        assert_eq!(file.entries, entries);
    }

    #[test]
    fn test_fill_missing() {
        let mut file = MetricsFile::parse("1 5 6\n", 3).unwrap();
        file.fill_missing();
        assert!(file.is_complete());
        assert_eq!(file.entries[0], FrameMetrics::new(0, 0));
    }

    #[test]
    fn test_crc32_known_value() {
        let mut crc = Crc32::new();
        crc.update(b"123456789");
        assert_eq!(crc.finish(), 0xCBF4_3926);
    }

    #[test]
    fn test_clip_checksum_depends_on_content() {
        let a = Frame::new(8, 8, PixelFormat::Yuv420p, 8);
        let mut b = a.clone();
        b.fill_plane(0, 3);
        assert_ne!(clip_checksum([&a]), clip_checksum([&b]));
        assert_eq!(clip_checksum([&a, &b]), clip_checksum([&a, &b]));
    }
}
