//! Field-matching hints files.
//!
//! The matcher can log its decisions to a text file instead of (or in
//! addition to) attaching them to frames:
//!
//! ```text
//! field = bottom
//! 0 c
//! 1 p +
//! 2 c - 1
//! ```
//!
//! Each entry names a frame and its match code, optionally followed by a
//! post-processing flag (`+` combed, `-` clean) and a `1` for frames of
//! d2v film.

use crate::cycle::{Cycle, MatchCode};
use crate::error::{DecimateError, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const FILE: &str = "hints";

/// One frame's hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintEntry {
    /// Match code in bottom-field terms.
    pub match_code: MatchCode,
    /// Frame is d2v film.
    pub film_d2v: bool,
}

/// Parsed hints file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchHints {
    entries: Vec<Option<HintEntry>>,
    top_field: bool,
}

impl MatchHints {
    /// Hints giving every frame a `c` match, used by the two-pass mode
    /// when no file is supplied.
    pub fn all_current(num_frames: usize) -> Self {
        Self {
            entries: vec![
                Some(HintEntry {
                    match_code: MatchCode::C,
                    film_d2v: false,
                });
                num_frames
            ],
            top_field: false,
        }
    }

    /// Read and parse a hints file.
    pub fn load(path: &Path, num_frames: usize, use_pp: bool) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let hints = Self::parse(&text, num_frames, use_pp)?;
        debug!(
            path = %path.display(),
            complete = hints.is_complete(),
            "loaded hints file"
        );
        Ok(hints)
    }

    /// Parse hints text. With `use_pp`, combed frames (`+`) are promoted to
    /// the post-processed L/H codes.
    pub fn parse(text: &str, num_frames: usize, use_pp: bool) -> Result<Self> {
        let mut hints = Self {
            entries: vec![None; num_frames],
            top_field: false,
        };
        let mut first = true;
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || raw.starts_with('#') || raw.starts_with(';') {
                continue;
            }
            let is_first = std::mem::replace(&mut first, false);
            if let Some(field) = line.to_ascii_lowercase().strip_prefix("field") {
                if is_first {
                    hints.top_field = field.trim_start_matches([' ', '=']).starts_with("top");
                }
                continue;
            }
            let (frame, entry) = hints.parse_entry(line, num_frames, use_pp, line_no)?;
            hints.entries[frame] = Some(entry);
        }
        Ok(hints)
    }

    fn parse_entry(
        &self,
        line: &str,
        num_frames: usize,
        use_pp: bool,
        line_no: usize,
    ) -> Result<(usize, HintEntry)> {
        let mut parts = line.split_whitespace();
        let frame_str = parts.next().unwrap_or_default();
        let frame: usize = frame_str.parse().map_err(|_| {
            DecimateError::parse(FILE, line_no, format!("invalid frame number '{}'", frame_str))
        })?;
        if frame >= num_frames {
            return Err(DecimateError::parse(FILE, line_no, "out of range frame number"));
        }
        let code = parts
            .next()
            .and_then(|s| s.chars().next())
            .ok_or_else(|| DecimateError::parse(FILE, line_no, "missing match specifier"))?;
        let mut match_code = match code {
            'p' | 'c' | 'n' | 'b' | 'u' | 'l' | 'h' => MatchCode::from_char(code),
            _ => None,
        }
        .ok_or_else(|| {
            DecimateError::parse(FILE, line_no, format!("invalid match specifier '{}'", code))
        })?;
        if self.top_field {
            match_code = match_code.swap_field();
        }

        let mut film_d2v = false;
        let mut marked = false;
        if let Some(flag) = parts.next().and_then(|s| s.chars().next()) {
            match flag {
                '-' => {}
                '+' => {
                    let promotable = !matches!(match_code, MatchCode::L | MatchCode::H);
                    if use_pp && promotable {
                        match_code = if self.top_field {
                            MatchCode::H
                        } else {
                            MatchCode::L
                        };
                    }
                }
                '1' => {
                    film_d2v = true;
                    marked = true;
                }
                '[' => marked = true,
                other => {
                    return Err(DecimateError::parse(
                        FILE,
                        line_no,
                        format!("invalid specifier '{}'", other),
                    ))
                }
            }
        }
        if !marked {
            film_d2v = parts.next().and_then(|s| s.chars().next()) == Some('1');
        }
        Ok((
            frame,
            HintEntry {
                match_code,
                film_d2v,
            },
        ))
    }

    /// Hint for a frame.
    pub fn get(&self, frame: usize) -> Option<HintEntry> {
        self.entries.get(frame).copied().flatten()
    }

    /// Whether the file names the top field as base.
    pub fn top_field(&self) -> bool {
        self.top_field
    }

    /// Whether every frame has an entry.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }

    /// Fail unless every frame has an entry.
    pub fn require_complete(&self) -> Result<()> {
        match self.entries.iter().position(Option::is_none) {
            Some(frame) => Err(DecimateError::invalid_params(format!(
                "hints file has no entry for frame {} (every frame is required)",
                frame
            ))),
            None => Ok(()),
        }
    }

    /// Copy hints into a cycle, leaving slots without an entry untouched.
    pub fn apply(&self, c: &mut Cycle) {
        for slot in c.slots() {
            let Ok(frame) = usize::try_from(c.source_frame(slot)) else {
                continue;
            };
            match self.get(frame) {
                Some(entry) => {
                    c.matches[slot] = Some(entry.match_code);
                    if entry.film_d2v {
                        c.film_d2v[slot] = true;
                    }
                }
                None if frame < self.entries.len() => {
                    warn!(frame, "no hints entry for frame");
                }
                None => {}
            }
        }
        c.set_is_film_d2v();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bottom_field_entries() {
        let text = "field = bottom\n0 c\n1 p\n2 n - 1\n3 c 1\n";
        let hints = MatchHints::parse(text, 4, false).unwrap();
        assert!(!hints.top_field());
        assert_eq!(hints.get(1).unwrap().match_code, MatchCode::P);
        assert!(hints.get(2).unwrap().film_d2v);
        assert!(hints.get(3).unwrap().film_d2v);
        assert!(!hints.get(0).unwrap().film_d2v);
        assert!(hints.is_complete());
    }

    #[test]
    fn test_top_field_swaps() {
        let text = "field = top\n0 p\n1 n\n2 c\n";
        let hints = MatchHints::parse(text, 3, false).unwrap();
        assert!(hints.top_field());
        assert_eq!(hints.get(0).unwrap().match_code, MatchCode::B);
        assert_eq!(hints.get(1).unwrap().match_code, MatchCode::U);
        assert_eq!(hints.get(2).unwrap().match_code, MatchCode::C);
    }

    #[test]
    fn test_post_processing_promotion() {
        let hints = MatchHints::parse("0 c +\n", 1, true).unwrap();
        assert_eq!(hints.get(0).unwrap().match_code, MatchCode::L);
        let hints = MatchHints::parse("field = top\n0 c +\n", 1, true).unwrap();
        assert_eq!(hints.get(0).unwrap().match_code, MatchCode::H);
        let hints = MatchHints::parse("0 c +\n", 1, false).unwrap();
        assert_eq!(hints.get(0).unwrap().match_code, MatchCode::C);
    }

    #[test]
    fn test_errors() {
        assert!(MatchHints::parse("0 x\n", 1, false).is_err());
        assert!(MatchHints::parse("5 c\n", 2, false).is_err());
        assert!(matches!(
            MatchHints::parse("0 c\n1 c ?\n", 2, false),
            Err(DecimateError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_incomplete() {
        let hints = MatchHints::parse("0 c\n", 2, false).unwrap();
        assert!(!hints.is_complete());
        assert!(hints.require_complete().is_err());
        assert!(MatchHints::all_current(3).require_complete().is_ok());
    }
}
