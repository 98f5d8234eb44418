//! Override files.
//!
//! An override file forces decisions for individual frames or ranges:
//!
//! ```text
//! # single frames
//! 120 -        drop frame 120
//! 121 +        never drop frame 121
//! 300 v        frame 300 is video
//! # ranges, an end of 0 means the last frame
//! 400,499 f    film
//! 500,0 +-+++  repeat the keep/drop pattern over the range
//! ```

use crate::cycle::{Cycle, CycleType, SlotDecision};
use crate::error::{DecimateError, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

const FILE: &str = "overrides";

/// Forced content type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOverride {
    /// Frame belongs to film.
    Film,
    /// Frame belongs to video.
    Video,
}

/// Everything the override file says about one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameOverride {
    /// Forced keep or drop.
    pub decision: SlotDecision,
    /// Forced content type.
    pub content: Option<ContentOverride>,
}

/// Parsed override file, one entry per source frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    frames: Vec<FrameOverride>,
}

impl Overrides {
    /// Overrides that force nothing.
    pub fn empty(num_frames: usize) -> Self {
        Self {
            frames: vec![FrameOverride::default(); num_frames],
        }
    }

    /// Read and parse an override file.
    pub fn load(path: &Path, num_frames: usize) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let ovr = Self::parse(&text, num_frames)?;
        debug!(path = %path.display(), "loaded override file");
        Ok(ovr)
    }

    /// Parse override text for a clip of `num_frames` frames.
    pub fn parse(text: &str, num_frames: usize) -> Result<Self> {
        let mut ovr = Self::empty(num_frames);
        let last = num_frames.saturating_sub(1);
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            if line.trim().is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(target), Some(symbol)) = (parts.next(), parts.next()) else {
                return Err(DecimateError::parse(FILE, line_no, "missing specifier"));
            };
            let (start, end) = parse_target(target, last, line_no)?;
            ovr.apply_symbol(start, end, symbol, line_no)?;
        }
        Ok(ovr)
    }

    fn apply_symbol(&mut self, start: usize, end: usize, symbol: &str, line: usize) -> Result<()> {
        let mut chars = symbol.chars();
        let first = chars.next().unwrap_or(' ');
        match first {
            'f' | 'v' => {
                let content = if first == 'f' {
                    ContentOverride::Film
                } else {
                    ContentOverride::Video
                };
                for entry in &mut self.frames[start..=end] {
                    entry.content = Some(content);
                }
            }
            '+' | '-' => {
                let pattern = symbol
                    .chars()
                    .map(|c| {
                        decision_symbol(c).ok_or_else(|| {
                            DecimateError::parse(
                                FILE,
                                line,
                                format!("invalid symbol '{}' in pattern '{}'", c, symbol),
                            )
                        })
                    })
                    .collect::<Result<Vec<SlotDecision>>>()?;
                // a lone symbol covers the whole range, a longer one repeats
                for (k, entry) in self.frames[start..=end].iter_mut().enumerate() {
                    entry.decision = pattern[k % pattern.len()];
                }
            }
            _ => {
                return Err(DecimateError::parse(
                    FILE,
                    line,
                    format!("invalid specifier '{}'", symbol),
                ))
            }
        }
        Ok(())
    }

    /// Override of one frame.
    pub fn get(&self, frame: usize) -> FrameOverride {
        self.frames.get(frame).copied().unwrap_or_default()
    }

    /// Number of frames covered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the file covers no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether any frame carries a directive.
    pub fn has_directives(&self) -> bool {
        self.frames.iter().any(|f| *f != FrameOverride::default())
    }

    /// Apply the directives to a freshly anchored cycle.
    ///
    /// Drops are taken in order until the cycle's drop quota is reached and
    /// force the cycle to film. A cycle whose every frame is marked video
    /// becomes forced video, one marked film throughout becomes forced film.
    pub fn apply(&self, c: &mut Cycle) {
        let quota = c.drop_quota();
        let mut drops = 0;
        let mut video = 0;
        let mut film = 0;
        for slot in c.slots() {
            let Ok(frame) = usize::try_from(c.source_frame(slot)) else {
                continue;
            };
            let entry = self.get(frame);
            match entry.decision {
                SlotDecision::Drop if drops < quota => {
                    if c.drop_slot(slot) {
                        drops += 1;
                        c.kind = CycleType::ForcedFilm;
                    }
                }
                SlotDecision::Keep => {
                    c.forced_keep[slot] = true;
                    c.decimate[slot] = SlotDecision::Keep;
                    c.decimate2[slot] = SlotDecision::Keep;
                }
                _ => {}
            }
            match entry.content {
                Some(ContentOverride::Video) => video += 1,
                Some(ContentOverride::Film) => film += 1,
                None => {}
            }
        }
        let len = c.valid_len();
        if video > 0 && video == len && c.kind != CycleType::ForcedFilm {
            c.kind = CycleType::ForcedVideo;
        }
        if film > 0 && film == len && c.kind != CycleType::ForcedVideo {
            c.kind = CycleType::ForcedFilm;
        }
    }

    /// Frames forced to drop, in order.
    pub fn forced_drops(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.decision == SlotDecision::Drop)
            .map(|(i, _)| i)
    }
}

fn decision_symbol(c: char) -> Option<SlotDecision> {
    match c {
        '-' => Some(SlotDecision::Drop),
        '+' => Some(SlotDecision::Keep),
        _ => None,
    }
}

fn parse_frame(s: &str, line: usize) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| DecimateError::parse(FILE, line, format!("invalid frame number '{}'", s)))
}

fn parse_target(target: &str, last: usize, line: usize) -> Result<(usize, usize)> {
    let (start, end) = match target.split_once(',') {
        Some((a, b)) => {
            let a = parse_frame(a, line)?;
            let b = parse_frame(b, line)?;
            (a, if b == 0 { last } else { b })
        }
        None => {
            let a = parse_frame(target, line)?;
            (a, a)
        }
    };
    if start > last || end > last || end < start {
        return Err(DecimateError::parse(FILE, line, "out of range frame number"));
    }
    Ok((start, end))
}
