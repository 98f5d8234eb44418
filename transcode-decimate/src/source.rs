//! Upstream frame sources driven by the pull protocol.

use crate::frame::{Frame, PixelFormat};
use crate::rate::Rational;
use std::collections::HashSet;
use std::sync::Arc;

/// Static properties of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    /// Number of frames in the clip.
    pub num_frames: usize,
    /// Frame rate.
    pub rate: Rational,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Bits per sample.
    pub bit_depth: u32,
}

impl ClipInfo {
    /// Index of the last frame.
    pub fn last_frame(&self) -> usize {
        self.num_frames.saturating_sub(1)
    }

    /// Frame rate as a float.
    pub fn fps(&self) -> f64 {
        self.rate.to_f64()
    }
}

/// A clip that frames are pulled from.
///
/// The decimator first announces every frame it depends on through
/// [`request`](FrameSource::request), then tries to [`fetch`](FrameSource::fetch)
/// them. A `None` from `fetch` means the frame is not ready yet and the
/// decimator will report the output as pending.
pub trait FrameSource {
    /// Clip properties.
    fn info(&self) -> &ClipInfo;

    /// Announce that `index` will be needed.
    fn request(&mut self, index: usize);

    /// Get a frame if it is ready.
    fn fetch(&self, index: usize) -> Option<Arc<Frame>>;
}

/// In-memory frame source.
///
/// In deferred mode a requested frame only becomes fetchable after
/// [`deliver`](MemorySource::deliver) is called, which mimics a host that
/// resolves requests asynchronously.
#[derive(Debug, Clone)]
pub struct MemorySource {
    info: ClipInfo,
    frames: Vec<Arc<Frame>>,
    deferred: bool,
    requested: HashSet<usize>,
    ready: HashSet<usize>,
    request_count: usize,
}

impl MemorySource {
    /// Create a source over the given frames.
    ///
    /// Geometry is taken from the first frame; an empty list yields an
    /// empty 8-bit 4:2:0 clip.
    pub fn new(frames: Vec<Frame>, rate: Rational) -> Self {
        let (width, height, format, bit_depth) = frames
            .first()
            .map(|f| (f.width(), f.height(), f.format(), f.bit_depth()))
            .unwrap_or((0, 0, PixelFormat::Yuv420p, 8));
        let info = ClipInfo {
            num_frames: frames.len(),
            rate,
            width,
            height,
            format,
            bit_depth,
        };
        Self {
            info,
            frames: frames.into_iter().map(Arc::new).collect(),
            deferred: false,
            requested: HashSet::new(),
            ready: HashSet::new(),
            request_count: 0,
        }
    }

    /// Switch to deferred delivery.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Make every outstanding request fetchable.
    pub fn deliver(&mut self) {
        self.ready.extend(self.requested.drain());
    }

    /// Total number of `request` calls received.
    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Whether `index` has been requested and not yet delivered.
    pub fn is_outstanding(&self, index: usize) -> bool {
        self.requested.contains(&index)
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &ClipInfo {
        &self.info
    }

    fn request(&mut self, index: usize) {
        self.request_count += 1;
        if self.deferred && !self.ready.contains(&index) {
            self.requested.insert(index);
        }
    }

    fn fetch(&self, index: usize) -> Option<Arc<Frame>> {
        if self.deferred && !self.ready.contains(&index) {
            return None;
        }
        self.frames.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|i| {
                let mut f = Frame::new(16, 16, PixelFormat::Yuv420p, 8);
                f.fill_plane(0, i as u16);
                f
            })
            .collect()
    }

    #[test]
    fn test_immediate_fetch() {
        let src = MemorySource::new(frames(3), Rational::ntsc_video());
        assert_eq!(src.info().num_frames, 3);
        assert_eq!(src.info().last_frame(), 2);
        assert_eq!(src.fetch(2).unwrap().plane(0).unwrap()[0], 2);
        assert!(src.fetch(3).is_none());
    }

    #[test]
    fn test_deferred_delivery() {
        let mut src = MemorySource::new(frames(4), Rational::ntsc_video()).deferred();
        assert!(src.fetch(1).is_none());
        src.request(1);
        assert!(src.is_outstanding(1));
        assert!(src.fetch(1).is_none());
        src.deliver();
        assert!(src.fetch(1).is_some());
        assert!(src.fetch(2).is_none());
        assert_eq!(src.request_count(), 1);
    }
}
