//! Scanner behavior on synthesized WAV fixtures: boundary ordering,
//! idempotence, and the derived transition marks.

mod helpers;

use helpers::{track_with_tail, write_wav, Segment, SAMPLE_RATE};
use segue_engine::analysis::scanner::{fast_scan, TrackScanner};
use segue_engine::engine::transition::derive_transition;
use segue_engine::ReaderRegistry;
use std::sync::Arc;

fn scan(path: &std::path::Path) -> segue_engine::analysis::ScanOutcome {
    let registry = Arc::new(ReaderRegistry::with_defaults());
    let mut reader = registry.open(path).unwrap();
    let fast = fast_scan(reader.as_mut(), 3.0).unwrap();
    TrackScanner::new(registry).full_scan(path, &fast).unwrap()
}

#[test]
fn boundaries_are_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let path = track_with_tail(dir.path(), "ordered.wav");

    let outcome = scan(&path);
    let fast = outcome.fast;

    assert!(fast.first_audible <= fast.leading.unwrap_or(fast.first_audible));
    if let (Some(leading), Some(trailing)) = (fast.leading, outcome.trailing) {
        assert!(leading <= trailing);
    }
    if let Some(trailing) = outcome.trailing {
        assert!(trailing <= outcome.last_audible);
    }
    assert!(outcome.last_audible <= outcome.total_frames_to_play);
    assert!(outcome.total_frames_to_play <= fast.frames_total);
}

#[test]
fn finds_leading_silence_and_trailing_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = track_with_tail(dir.path(), "tail.wav");

    let outcome = scan(&path);
    let sr = SAMPLE_RATE as f64;

    // 0.1 s of leading silence before the tone
    let first_s = outcome.fast.first_audible as f64 / sr;
    assert!((first_s - 0.1).abs() < 0.05, "first_s={first_s}");

    // the loud body ends at 2.5 s; the quiet tail runs to 5.0 s
    let trailing_s = outcome.trailing.expect("trailing tail not found") as f64 / sr;
    assert!(trailing_s < 3.5, "trailing_s={trailing_s}");

    let last_s = outcome.last_audible as f64 / sr;
    assert!((last_s - 5.0).abs() < 0.2, "last_s={last_s}");

    assert!(outcome.trailing_duration > 1.0);
}

#[test]
fn scanning_twice_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = track_with_tail(dir.path(), "twice.wav");

    let first = scan(&path);
    let second = scan(&path);

    assert_eq!(first.fast.first_audible, second.fast.first_audible);
    assert_eq!(first.fast.leading, second.fast.leading);
    assert_eq!(first.last_audible, second.last_audible);
    assert_eq!(first.trailing, second.trailing);
    assert_eq!(first.total_frames_to_play, second.total_frames_to_play);
}

#[test]
fn marks_from_frozen_outcome_are_pure() {
    let dir = tempfile::tempdir().unwrap();
    let path = track_with_tail(dir.path(), "marks.wav");

    let outcome = scan(&path);
    let a = derive_transition(&outcome, 2.0);
    let b = derive_transition(&outcome, 2.0);
    assert_eq!(a, b);

    assert!(a.pre_cue <= a.cue);
    assert!(a.cue <= a.start);
    assert!(a.start <= a.end);
    let duration = outcome.total_frames_to_play as f64 / SAMPLE_RATE as f64;
    assert!(a.start <= duration + 1e-9);
}

#[test]
fn track_without_tail_collapses_the_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steady.wav");
    // steady tone, hard ending: no trailing fade to overlap on
    write_wav(&path, &[Segment::Tone(4.0, 0.5, 330.0)]);

    let outcome = scan(&path);
    assert_eq!(outcome.trailing_duration, 0.0);

    let marks = derive_transition(&outcome, 3.0);
    assert_eq!(marks.start, marks.end);
}
