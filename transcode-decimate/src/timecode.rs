//! Matroska timecode files for variable frame rate output.
//!
//! Two formats are supported:
//!
//! - **v2** lists one timestamp in milliseconds per output frame.
//! - **v1** assumes a default rate and lists `start,end,fps` ranges for
//!   every section that runs at a different rate.
//!
//! The decimator feeds sections to a [`TimecodeWriter`] as it decides them
//! and ends the file with a short statistics trailer.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Rates closer than this are treated as equal.
const RATE_EPSILON: f64 = 1e-6;

/// Timecode file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimecodeFormat {
    /// Default rate plus ranges.
    #[default]
    V1,
    /// One timestamp per frame.
    V2,
}

impl TimecodeFormat {
    /// Format selected by the `tcfv1` setting.
    pub fn from_v1_flag(v1: bool) -> Self {
        if v1 {
            Self::V1
        } else {
            Self::V2
        }
    }
}

/// Film/video statistics written at the end of a timecode file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VfrStats {
    /// Source frames in film sections.
    pub film: usize,
    /// Source frames in video sections.
    pub video: usize,
    /// Longest video section in source frames.
    pub longest_video: usize,
    /// Number of video sections.
    pub video_sections: usize,
    run: usize,
}

impl VfrStats {
    /// Count a video cycle of `frames` source frames.
    pub fn add_video(&mut self, frames: usize) {
        self.video += frames;
        self.run += frames;
    }

    /// Count a film cycle of `frames` source frames.
    pub fn add_film(&mut self, frames: usize) {
        self.film += frames;
        self.close_run();
    }

    /// End the video section in progress, if any.
    pub fn close_run(&mut self) {
        if self.run > 0 {
            self.longest_video = self.longest_video.max(self.run);
            self.video_sections += 1;
            self.run = 0;
        }
    }

    /// Trailer lines for a clip of `total` source frames.
    pub fn render(&self, total: usize) -> String {
        let pct = |v: usize| v as f64 * 100.0 / total.max(1) as f64;
        format!(
            "# vfr stats:  {:05.2}% film  {:05.2}% video\n\
             # vfr stats:  {} - film  {} - video  {} - total\n\
             # vfr stats:  longest vid section - {} frames\n\
             # vfr stats:  # of detected vid sections - {}\n",
            pct(self.film),
            pct(self.video),
            self.film,
            self.video,
            total,
            self.longest_video,
            self.video_sections
        )
    }
}

/// Streams output frame timing to a timecode file.
#[derive(Debug)]
pub struct TimecodeWriter<W: Write> {
    out: W,
    format: TimecodeFormat,
    assumed_fps: f64,
    timestamp: f64,
    frames: usize,
    run: Option<(usize, f64)>,
}

impl<W: Write> TimecodeWriter<W> {
    /// Write the header. `assumed_fps` is the v1 default rate.
    pub fn new(mut out: W, format: TimecodeFormat, assumed_fps: f64, mode: u32) -> Result<Self> {
        match format {
            TimecodeFormat::V1 => {
                writeln!(out, "# timecode format v1")?;
                writeln!(out, "Assume {:.6}", assumed_fps)?;
            }
            TimecodeFormat::V2 => writeln!(out, "# timecode format v2")?,
        }
        writeln!(out, "# TDecimate {} (transcode-decimate)", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "# Mode {} - Auto-generated mkv timecodes file", mode)?;
        Ok(Self {
            out,
            format,
            assumed_fps,
            timestamp: 0.0,
            frames: 0,
            run: None,
        })
    }

    /// Append `count` output frames shown at `fps`.
    pub fn push(&mut self, count: usize, fps: f64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        match self.format {
            TimecodeFormat::V2 => {
                let step = 1000.0 / fps;
                for _ in 0..count {
                    writeln!(self.out, "{:.6}", self.timestamp)?;
                    self.timestamp += step;
                }
            }
            TimecodeFormat::V1 => match self.run {
                Some((_, rate)) if (rate - fps).abs() < RATE_EPSILON => {}
                _ => {
                    self.end_section()?;
                    self.run = Some((self.frames, fps));
                }
            },
        }
        self.frames += count;
        Ok(())
    }

    /// Close the v1 range in progress.
    pub fn end_section(&mut self) -> Result<()> {
        if let Some((start, rate)) = self.run.take() {
            if (rate - self.assumed_fps).abs() >= RATE_EPSILON && self.frames > start {
                writeln!(self.out, "{},{},{:.6}", start, self.frames - 1, rate)?;
            }
        }
        Ok(())
    }

    /// Append a comment line.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "# {}", text)?;
        Ok(())
    }

    /// Output frames written so far.
    pub fn frames_written(&self) -> usize {
        self.frames
    }

    /// Close the last range, write the statistics trailer and flush.
    pub fn finish(mut self, stats: &VfrStats, total: usize) -> Result<W> {
        self.end_section()?;
        let mut stats = *stats;
        stats.close_run();
        self.out.write_all(stats.render(total).as_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FPS: f64 = 30000.0 / 1001.0;
    const FILM: f64 = 24000.0 / 1001.0;

    fn body(out: Vec<u8>) -> Vec<String> {
        String::from_utf8(out)
            .unwrap()
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_v2_timestamps() {
        let mut tc = TimecodeWriter::new(Vec::new(), TimecodeFormat::V2, FPS, 3).unwrap();
        tc.push(2, FPS).unwrap();
        tc.push(1, FILM).unwrap();
        let out = tc.finish(&VfrStats::default(), 10).unwrap();
        let lines = body(out);
        assert_eq!(lines, vec!["0.000000", "33.366667", "66.733333"]);
    }

    #[test]
    fn test_v1_ranges() {
        let mut tc = TimecodeWriter::new(Vec::new(), TimecodeFormat::V1, FPS, 5).unwrap();
        tc.push(4, FILM).unwrap();
        tc.push(4, FILM).unwrap();
        tc.push(5, FPS).unwrap();
        tc.push(4, FILM).unwrap();
        assert_eq!(tc.frames_written(), 17);
        let out = tc.finish(&VfrStats::default(), 20).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("# timecode format v1\nAssume 29.970030\n"));
        assert!(text.contains("# Mode 5 - Auto-generated mkv timecodes file"));
        let lines = body(out);
        assert_eq!(
            lines,
            vec!["Assume 29.970030", "0,7,23.976024", "13,16,23.976024"]
        );
    }

    #[test]
    fn test_stats() {
        let mut stats = VfrStats::default();
        stats.add_film(5);
        stats.add_video(5);
        stats.add_video(5);
        stats.add_film(5);
        stats.add_video(5);
        stats.close_run();
        assert_eq!(stats.longest_video, 10);
        assert_eq!(stats.video_sections, 2);
        let text = stats.render(25);
        assert!(text.contains("# vfr stats:  40.00% film  60.00% video"));
        assert!(text.contains("# vfr stats:  10 - film  15 - video  25 - total"));
        assert!(text.contains("longest vid section - 10 frames"));
        assert!(text.contains("# of detected vid sections - 2"));
    }
}
