//! Decimator configuration.

use crate::classify::VideoDetect;
use crate::error::{DecimateError, Result};
use crate::metric::MetricConfig;
use crate::select::{SelectorConfig, Strategy};
use crate::source::ClipInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Fixed ratio, drops from the longest duplicate run (mode 0).
    #[default]
    LongestString,
    /// Fixed ratio, drops the most similar frame (mode 1).
    MostSimilar,
    /// Arbitrary rate following a keep plan supplied by the host (mode 2).
    Planned,
    /// Single-pass variable frame rate with timecode output (mode 3).
    Vfr,
    /// Pass-through that only records metrics (mode 4).
    MetricsOnly,
    /// Two-pass hybrid variable frame rate (mode 5).
    TwoPassVfr,
    /// Variable frame rate from 120 fps material (mode 6).
    HighRateVfr,
    /// Arbitrary rate from same/similar/different analysis (mode 7).
    Arbitrary,
}

impl Mode {
    /// Map the numeric setting 0..=7.
    pub fn from_index(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::LongestString,
            1 => Self::MostSimilar,
            2 => Self::Planned,
            3 => Self::Vfr,
            4 => Self::MetricsOnly,
            5 => Self::TwoPassVfr,
            6 => Self::HighRateVfr,
            7 => Self::Arbitrary,
            _ => return None,
        })
    }

    /// Numeric setting.
    pub fn index(&self) -> u32 {
        match self {
            Self::LongestString => 0,
            Self::MostSimilar => 1,
            Self::Planned => 2,
            Self::Vfr => 3,
            Self::MetricsOnly => 4,
            Self::TwoPassVfr => 5,
            Self::HighRateVfr => 6,
            Self::Arbitrary => 7,
        }
    }

    /// Fixed-ratio modes with random access.
    pub fn is_fixed_ratio(&self) -> bool {
        matches!(self, Self::LongestString | Self::MostSimilar)
    }

    /// Modes that emit a timecode file.
    pub fn writes_timecodes(&self) -> bool {
        matches!(self, Self::Vfr | Self::TwoPassVfr | Self::HighRateVfr)
    }
}

/// Treatment of video sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Hybrid {
    /// Decimate everything as film.
    #[default]
    None,
    /// Blend video down to the film rate.
    DownConvert,
    /// Leave video at its rate (variable frame rate output).
    Vfr,
    /// Blend film up to the video rate.
    UpConvert,
}

impl Hybrid {
    /// Map the numeric setting 0..=3.
    pub fn from_index(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::DownConvert,
            2 => Self::Vfr,
            3 => Self::UpConvert,
            _ => return None,
        })
    }

    /// Whether video cycles are detected at all.
    pub fn detects_video(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Decimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimateConfig {
    /// Operating mode.
    pub mode: Mode,
    /// Frames removed per cycle.
    pub cycle_r: usize,
    /// Cycle length.
    pub cycle: usize,
    /// Target rate for modes 2 and 7.
    pub rate: f64,
    /// Normalized metric at or under which a frame is a duplicate.
    pub dup_thresh: f64,
    /// Normalized metric over which a frame is treated as unique video.
    pub vid_thresh: f64,
    /// Scene change threshold in percent.
    pub scene_thresh: f64,
    /// Treatment of video sections.
    pub hybrid: Hybrid,
    /// Evidence required for a video verdict.
    pub vid_detect: VideoDetect,
    /// Neighboring cycles required to confirm video (0, 1 or 2).
    pub con_cycle: u32,
    /// Minimum video run in cycles for the two-pass mode.
    pub con_cycle_tp: u32,
    /// Per-pixel noise threshold.
    pub nt: u32,
    /// Metric block width.
    pub block_x: u32,
    /// Metric block height.
    pub block_y: u32,
    /// Film strategy for the variable frame rate modes.
    pub vfr_dec: Strategy,
    /// Write v1 timecodes instead of v2.
    pub tcfv1: bool,
    /// Stop early at the end of mode 3 processing.
    pub se: bool,
    /// Include chroma in metrics.
    pub chroma: bool,
    /// Treat post-processed match hints as L/H codes.
    pub ex_pp: bool,
    /// Never blend to replace a duplicate.
    pub noblend: bool,
    /// Blur frames before measuring.
    pub predenoise: bool,
    /// Squared differences instead of absolute.
    pub ssd: bool,
    /// Use match and film hints.
    pub use_hints: bool,
    /// Minimum spacing between lowest-metric drops.
    pub sdlim: i32,
    /// Skip metrics file header checks.
    pub batch: bool,
    /// Override file.
    pub overrides: Option<PathBuf>,
    /// Match hints file.
    pub hints_in: Option<PathBuf>,
    /// Metrics file to import.
    pub metrics_in: Option<PathBuf>,
    /// Metrics file to write.
    pub metrics_out: Option<PathBuf>,
    /// Timecode file to write.
    pub timecodes_out: Option<PathBuf>,
    /// Remap file to write.
    pub remap_out: Option<PathBuf>,
}

impl Default for DecimateConfig {
    fn default() -> Self {
        Self {
            mode: Mode::LongestString,
            cycle_r: 1,
            cycle: 5,
            rate: 23.976,
            dup_thresh: 1.1,
            vid_thresh: 1.1,
            scene_thresh: 15.0,
            hybrid: Hybrid::None,
            vid_detect: VideoDetect::Both,
            con_cycle: 1,
            con_cycle_tp: 3,
            nt: 0,
            block_x: 32,
            block_y: 32,
            vfr_dec: Strategy::LongestString,
            tcfv1: true,
            se: false,
            chroma: true,
            ex_pp: false,
            noblend: true,
            predenoise: false,
            ssd: false,
            use_hints: true,
            sdlim: 0,
            batch: false,
            overrides: None,
            hints_in: None,
            metrics_in: None,
            metrics_out: None,
            timecodes_out: None,
            remap_out: None,
        }
    }
}

impl DecimateConfig {
    /// Check the settings against a clip and return the effective
    /// configuration.
    pub fn validate(&self, info: &ClipInfo) -> Result<Self> {
        let mut cfg = self.clone();
        if info.bit_depth > 16 || info.bit_depth < 8 {
            return Err(DecimateError::unsupported_format(format!(
                "only 8-16 bit formats are supported (got {})",
                info.bit_depth
            )));
        }
        if !info.format.is_yuv() {
            return Err(DecimateError::unsupported_format(format!(
                "YUV formats only (got {})",
                info.format
            )));
        }
        if info.width == 0 || info.height == 0 {
            return Err(DecimateError::invalid_params("clip has no dimensions"));
        }
        let mode = cfg.mode;
        if mode.writes_timecodes() && cfg.timecodes_out.is_none() {
            return Err(DecimateError::invalid_params(format!(
                "a timecode file must be specified in mode {}",
                mode.index()
            )));
        }
        if mode.writes_timecodes() && cfg.hybrid != Hybrid::Vfr {
            return Err(DecimateError::invalid_params(format!(
                "mode {} can only be used with hybrid = 2",
                mode.index()
            )));
        }
        if matches!(cfg.hybrid, Hybrid::DownConvert | Hybrid::UpConvert) && !mode.is_fixed_ratio()
        {
            return Err(DecimateError::invalid_params(
                "hybrid = 1 and hybrid = 3 can only be used with modes 0 and 1",
            ));
        }
        if cfg.hybrid.detects_video() && cfg.cycle_r > 1 {
            return Err(DecimateError::invalid_params(
                "hybrid processing is limited to cycle_r = 1",
            ));
        }
        if mode.is_fixed_ratio() && cfg.hybrid == Hybrid::Vfr {
            return Err(DecimateError::invalid_params(
                "only hybrid = 0, 1, or 3 is supported in modes 0 and 1",
            ));
        }
        if cfg.cycle_r == 0 || cfg.cycle_r >= cfg.cycle {
            return Err(DecimateError::invalid_params(
                "cycle_r must be greater than 0 and less than cycle",
            ));
        }
        if cfg.cycle < 2 || cfg.cycle > info.num_frames {
            return Err(DecimateError::invalid_params(
                "cycle must be at least 2 and at most the number of frames",
            ));
        }
        if !(0.0..=100.0).contains(&cfg.scene_thresh) {
            return Err(DecimateError::invalid_params(
                "scene_thresh must be in the range 0 to 100",
            ));
        }
        if matches!(mode, Mode::Planned | Mode::Arbitrary)
            && (cfg.rate <= 0.0 || cfg.rate >= info.fps())
        {
            return Err(DecimateError::invalid_params(
                "modes 2 and 7 need a rate above 0 and below the clip rate",
            ));
        }
        if cfg.con_cycle > 2 {
            return Err(DecimateError::invalid_params(
                "con_cycle cannot be greater than 2",
            ));
        }
        if mode == Mode::MetricsOnly && (cfg.overrides.is_some() || cfg.hints_in.is_some()) {
            return Err(DecimateError::invalid_params(
                "override and hints files cannot be used in mode 4",
            ));
        }
        if matches!(mode, Mode::TwoPassVfr | Mode::HighRateVfr) && cfg.metrics_out.is_some() {
            return Err(DecimateError::invalid_params(
                "metrics output is not supported in modes 5 and 6",
            ));
        }
        if matches!(mode, Mode::TwoPassVfr | Mode::HighRateVfr) && cfg.metrics_in.is_none() {
            return Err(DecimateError::invalid_params(format!(
                "mode {} needs a metrics file with every frame",
                mode.index()
            )));
        }
        self.metric_config().validate()?;

        if !matches!(mode, Mode::LongestString | Mode::MostSimilar | Mode::Vfr) || cfg.cycle_r == 1
        {
            cfg.sdlim = 0;
        }
        if (cfg.sdlim.unsigned_abs() as usize + 1) * (cfg.cycle_r - 1) >= cfg.cycle {
            let max = (cfg.cycle as f64 / (cfg.cycle_r - 1) as f64).ceil() as i64 - 2;
            return Err(DecimateError::invalid_params(format!(
                "invalid sdlim setting (0 through {} are allowed)",
                max
            )));
        }
        Ok(cfg)
    }

    /// Metric settings.
    pub fn metric_config(&self) -> MetricConfig {
        MetricConfig {
            block_x: self.block_x,
            block_y: self.block_y,
            nt: self.nt,
            ssd: self.ssd,
            chroma: self.chroma,
            predenoise: self.predenoise,
        }
    }

    /// Film strategy for the current mode.
    pub fn strategy(&self) -> Strategy {
        match self.mode {
            Mode::LongestString => Strategy::LongestString,
            Mode::MostSimilar => Strategy::MostSimilar,
            _ => self.vfr_dec,
        }
    }

    /// Selection settings.
    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            strategy: self.strategy(),
            cycle: self.cycle,
            cycle_r: self.cycle_r,
            dup_thresh: self.dup_thresh,
            keep_one_of_two: self.hybrid == Hybrid::None && self.noblend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::rate::Rational;
    use pretty_assertions::assert_eq;

    fn clip() -> ClipInfo {
        ClipInfo {
            num_frames: 100,
            rate: Rational::ntsc_video(),
            width: 64,
            height: 48,
            format: PixelFormat::Yuv420p,
            bit_depth: 8,
        }
    }

    #[test]
    fn test_default_is_valid() {
        let cfg = DecimateConfig::default().validate(&clip()).unwrap();
        assert_eq!(cfg.mode, Mode::LongestString);
        assert_eq!(cfg.selector_config().cycle, 5);
        assert!(cfg.selector_config().keep_one_of_two);
    }

    #[test]
    fn test_cycle_bounds() {
        let cfg = DecimateConfig {
            cycle_r: 5,
            ..Default::default()
        };
        assert!(cfg.validate(&clip()).is_err());
        let cfg = DecimateConfig {
            cycle: 200,
            ..Default::default()
        };
        assert!(cfg.validate(&clip()).is_err());
    }

    #[test]
    fn test_hybrid_rules() {
        let vfr = DecimateConfig {
            mode: Mode::Vfr,
            timecodes_out: Some("tc.txt".into()),
            ..Default::default()
        };
        assert!(vfr.validate(&clip()).is_err());
        let vfr = DecimateConfig {
            hybrid: Hybrid::Vfr,
            ..vfr
        };
        assert!(vfr.validate(&clip()).is_ok());

        let up = DecimateConfig {
            hybrid: Hybrid::UpConvert,
            cycle_r: 2,
            cycle: 10,
            ..Default::default()
        };
        assert!(up.validate(&clip()).is_err());
    }

    #[test]
    fn test_sdlim_normalized() {
        let cfg = DecimateConfig {
            sdlim: 3,
            ..Default::default()
        };
        assert_eq!(cfg.validate(&clip()).unwrap().sdlim, 0);

        let cfg = DecimateConfig {
            cycle: 10,
            cycle_r: 2,
            sdlim: 3,
            ..Default::default()
        };
        assert_eq!(cfg.validate(&clip()).unwrap().sdlim, 3);

        let cfg = DecimateConfig {
            cycle: 10,
            cycle_r: 3,
            sdlim: 4,
            ..Default::default()
        };
        assert!(cfg.validate(&clip()).is_err());
    }

    #[test]
    fn test_rate_modes() {
        let cfg = DecimateConfig {
            mode: Mode::Arbitrary,
            rate: 35.0,
            ..Default::default()
        };
        assert!(cfg.validate(&clip()).is_err());
        let cfg = DecimateConfig { rate: 24.0, ..cfg };
        assert!(cfg.validate(&clip()).is_ok());
    }

    #[test]
    fn test_serde_roundtrip_defaults() {
        let json = r#"{"mode":"MostSimilar","cycle":10,"cycle_r":2}"#;
        let cfg: DecimateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, Mode::MostSimilar);
        assert_eq!(cfg.cycle, 10);
        assert_eq!(cfg.dup_thresh, 1.1);
        assert_eq!(cfg.strategy(), Strategy::MostSimilar);
    }
}
