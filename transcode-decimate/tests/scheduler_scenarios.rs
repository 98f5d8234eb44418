//! End-to-end decimation scenarios over synthetic clips.
//!
//! Clips are built from flat frames whose luma level changes between
//! frames; a repeated level gives a zero difference, which is how a
//! telecine duplicate looks after field matching.

use pretty_assertions::assert_eq;
use std::task::Poll;
use transcode_decimate::{
    DecimateConfig, DecimateError, Decimator, Decision, Frame, FrameHints, FrameSource, Hybrid,
    MatchCode, MemorySource, Mode, PixelFormat, Rational, Selection, VideoDetect,
};

// =============================================================================
// Helpers
// =============================================================================

fn frame(luma: u16, code: MatchCode) -> Frame {
    let mut f = Frame::new(32, 32, PixelFormat::Yuv420p, 8);
    f.fill_plane(0, luma);
    f.with_hints(FrameHints::with_match(code))
}

/// `cycles` film cycles of five frames, each repeating its second frame.
/// The repeat carries a previous-field match like a field matcher emits.
fn telecined(cycles: usize) -> MemorySource {
    let mut frames = Vec::new();
    for c in 0..cycles {
        let base = 16 + 40 * c as u16;
        for (slot, offset) in [0u16, 10, 10, 20, 30].into_iter().enumerate() {
            let code = if slot == 2 { MatchCode::P } else { MatchCode::C };
            frames.push(frame(base + offset, code));
        }
    }
    MemorySource::new(frames, Rational::ntsc_video())
}

/// Every frame differs from the one before.
fn steady_motion(n: usize) -> MemorySource {
    let frames = (0..n)
        .map(|i| frame(16 + 8 * i as u16, MatchCode::C))
        .collect();
    MemorySource::new(frames, Rational::ntsc_video())
}

fn ready(dec: &mut Decimator, n: usize, source: &mut dyn FrameSource) -> Decision {
    match dec.decide(n, source).unwrap() {
        Poll::Ready(d) => d,
        Poll::Pending => panic!("output {} still waiting on an immediate source", n),
    }
}

fn shown(
    dec: &mut Decimator,
    outputs: impl Iterator<Item = usize>,
    source: &mut dyn FrameSource,
) -> Vec<usize> {
    outputs
        .map(|n| match ready(dec, n, source).selection {
            Selection::Single(f) => f,
            other => panic!("output {} blends: {:?}", n, other),
        })
        .collect()
}

const FILM_FRAMES: [usize; 20] = [
    0, 1, 3, 4, 5, 6, 8, 9, 10, 11, 13, 14, 15, 16, 18, 19, 20, 21, 23, 24,
];

// =============================================================================
// Fixed ratio
// =============================================================================

#[test]
fn longest_string_drops_the_repeats() {
    let mut source = telecined(5);
    let mut dec = Decimator::new(&DecimateConfig::default(), source.info()).unwrap();
    assert_eq!(dec.output_info().num_frames, 20);
    assert_eq!(dec.output_info().rate, Rational::ntsc_film());
    assert_eq!(shown(&mut dec, 0..20, &mut source), FILM_FRAMES.to_vec());
}

#[test]
fn most_similar_drops_the_repeats() {
    let mut source = telecined(5);
    let config = DecimateConfig {
        mode: Mode::MostSimilar,
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    assert_eq!(shown(&mut dec, 0..20, &mut source), FILM_FRAMES.to_vec());
}

#[test]
fn access_order_does_not_change_decisions() {
    let mut source = telecined(5);
    let mut dec = Decimator::new(&DecimateConfig::default(), source.info()).unwrap();
    let mut backwards = shown(&mut dec, (0..20).rev(), &mut source);
    backwards.reverse();
    assert_eq!(backwards, FILM_FRAMES.to_vec());
}

#[test]
fn first_output_of_a_cycle_carries_its_metrics() {
    let mut source = telecined(5);
    let mut dec = Decimator::new(&DecimateConfig::default(), source.info()).unwrap();
    let d = ready(&mut dec, 4, &mut source);
    let cycle = d.cycle.expect("output 4 opens the second cycle");
    assert_eq!(cycle.start, 5);
    assert_eq!(cycle.metrics.len(), 5);
    assert_eq!(cycle.metrics[2], 0);
    assert!(ready(&mut dec, 5, &mut source).cycle.is_none());
}

#[test]
fn deferred_source_resolves_after_delivery() {
    let mut source = telecined(5).deferred();
    let mut dec = Decimator::new(&DecimateConfig::default(), source.info()).unwrap();

    let mut rounds = 0;
    let decision = loop {
        match dec.decide(6, &mut source).unwrap() {
            Poll::Ready(d) => break d,
            Poll::Pending => {
                rounds += 1;
                assert!(rounds < 10, "decision never became ready");
                source.deliver();
            }
        }
    };
    assert!(rounds >= 1);
    assert_eq!(decision.selection, Selection::Single(8));

    // A memoized decision asks for nothing.
    let before = source.request_count();
    assert_eq!(ready(&mut dec, 6, &mut source).selection, Selection::Single(8));
    assert_eq!(source.request_count(), before);
}

#[test]
fn rendering_uses_the_pixel_clip() {
    let mut analysis = telecined(5);
    let mut pixels = steady_motion(25);
    let mut dec = Decimator::new(&DecimateConfig::default(), analysis.info()).unwrap();
    let frame = match dec.get_frame_with(2, &mut analysis, &mut pixels).unwrap() {
        Poll::Ready(f) => f,
        Poll::Pending => panic!("sources are immediate"),
    };
    // Output 2 shows source frame 3, taken from the pixel clip.
    assert_eq!(frame.plane(0).unwrap()[0], 16 + 8 * 3);
}

#[test]
fn override_drop_replaces_the_detected_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overrides.txt");
    std::fs::write(&path, "# keep the repeat, drop frame 3 instead\n3 -\n").unwrap();

    let mut source = telecined(5);
    let config = DecimateConfig {
        overrides: Some(path),
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    assert_eq!(shown(&mut dec, 0..4, &mut source), vec![0, 1, 2, 4]);
}

#[test]
fn forced_keep_on_the_repeat_drops_another_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overrides.txt");
    std::fs::write(&path, "2 +\n").unwrap();

    let mut source = telecined(5);
    let config = DecimateConfig {
        overrides: Some(path),
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    // the repeat stays; the earliest of the equally moving frames goes
    assert_eq!(shown(&mut dec, 0..4, &mut source), vec![0, 2, 3, 4]);
    assert_eq!(shown(&mut dec, 4..8, &mut source), FILM_FRAMES[4..8].to_vec());
}

#[test]
fn pure_video_blends_down_in_mode_0() {
    let mut source = steady_motion(20);
    let config = DecimateConfig {
        hybrid: Hybrid::DownConvert,
        vid_detect: VideoDetect::Metrics,
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    assert_eq!(dec.output_info().num_frames, 16);
    for n in 0..16 {
        let d = ready(&mut dec, n, &mut source);
        assert!(!d.film, "output {} treated as film", n);
        let group = n / 4 * 5;
        let frames = d.selection.frames();
        assert!(
            frames.iter().all(|&f| (group..group + 5).contains(&f)),
            "output {} reads {:?}",
            n,
            frames
        );
    }
    // positions 1.375 and 6.375 fall between two source frames
    assert_eq!(ready(&mut dec, 1, &mut source).selection.frames(), vec![1, 2]);
    assert_eq!(ready(&mut dec, 5, &mut source).selection.frames(), vec![6, 7]);
}

// =============================================================================
// Variable frame rate
// =============================================================================

#[test]
fn pure_video_passes_through_in_mode_3() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timecodes.txt");
    let mut source = steady_motion(15);
    let config = DecimateConfig {
        mode: Mode::Vfr,
        hybrid: Hybrid::Vfr,
        vid_detect: VideoDetect::Metrics,
        tcfv1: false,
        se: true,
        timecodes_out: Some(path.clone()),
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    for n in 0..15 {
        let d = ready(&mut dec, n, &mut source);
        assert_eq!(d.selection, Selection::Single(n));
        assert!(!d.film);
    }
    assert!(matches!(
        dec.decide(15, &mut source),
        Err(DecimateError::EndOfStream { .. })
    ));
    dec.finish(&mut source).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# timecode format v2"));
    let stamps: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(stamps.len(), 15);
    assert_eq!(stamps[0], "0.000000");
    assert_eq!(stamps[1], "33.366667");
    assert!(text.contains("# vfr stats:  0 - film  15 - video  15 - total"));
}

#[test]
fn mode_3_requires_sequential_access() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = telecined(3);
    let config = DecimateConfig {
        mode: Mode::Vfr,
        hybrid: Hybrid::Vfr,
        timecodes_out: Some(dir.path().join("tc.txt")),
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    assert!(matches!(
        dec.decide(3, &mut source),
        Err(DecimateError::NonLinearAccess {
            expected: 0,
            requested: 3
        })
    ));
    assert_eq!(shown(&mut dec, 0..8, &mut source), FILM_FRAMES[..8].to_vec());
}

// =============================================================================
// Arbitrary rate
// =============================================================================

#[test]
fn planned_rate_without_a_plan_is_uniform() {
    let frames = (0..10)
        .map(|i| frame(16 + 8 * i as u16, MatchCode::C))
        .collect();
    let mut source = MemorySource::new(frames, Rational::new(30, 1));
    let config = DecimateConfig {
        mode: Mode::Planned,
        rate: 24.0,
        ..Default::default()
    };
    let mut dec = Decimator::new(&config, source.info()).unwrap();
    assert_eq!(dec.output_info().rate, Rational::new(24, 1));
    assert_eq!(dec.output_info().num_frames, 8);
    assert_eq!(shown(&mut dec, 0..8, &mut source), vec![0, 1, 3, 4, 5, 6, 8, 9]);
}
