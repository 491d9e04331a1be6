//! Transition state and timing math
//!
//! The timing derivation is pure: given a frozen scan outcome and the
//! configured transition ceiling it always produces the same marks.

use crate::analysis::scanner::{ScanOutcome, LEADING_SCAN_WINDOW};

/// Controller state for the transition scoped to the current main deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TransitionState {
    Idle,
    /// The host has been nudged to top up the queue
    Cueing,
    /// The next deck is loading the upcoming track
    CueLoading,
    /// The next deck is loaded and waiting for the overlap window
    Cued,
    /// Both decks are sounding; ramps are being driven
    Transit,
}

/// Time markers on a deck's playback timeline, seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionMarks {
    /// Nudge the host to enqueue the next track
    pub pre_cue: f64,
    /// Start loading the next track
    pub cue: f64,
    /// Overlap begins; the outgoing ramp starts here
    pub start: f64,
    /// Overlap ends; the outgoing deck stops here
    pub end: f64,
}

impl TransitionMarks {
    /// Marks for a track too short to analyze: everything collapses onto
    /// the end of the stream and the controller reacts at end-of-stream.
    pub fn collapsed(duration: f64) -> Self {
        Self {
            pre_cue: duration,
            cue: duration,
            start: duration,
            end: duration,
        }
    }

    pub fn zero() -> Self {
        Self::collapsed(0.0)
    }
}

/// Derive the transition marks from a scan outcome.
///
/// The overlap is anchored at the last audible frame and pulled earlier
/// when the track has a usable trailing fade; the cue point leaves enough
/// room to load and analyze the next track before the overlap begins.
pub fn derive_transition(outcome: &ScanOutcome, max_transition_time: f64) -> TransitionMarks {
    let sr = outcome.sample_rate() as f64;

    let mut end = outcome.last_audible as f64 / sr;
    let mut start = end;

    if outcome.trailing_duration > 0.0 && max_transition_time > 0.0 {
        if outcome.trailing_duration >= max_transition_time {
            if let Some(trailing) = outcome.trailing {
                start = trailing as f64 / sr;
                end = start + max_transition_time;
            }
        } else {
            start = (end - outcome.trailing_duration).max(2.0);
        }
    }

    let cue = (start - max_transition_time.max(LEADING_SCAN_WINDOW)).max(0.0);
    let pre_cue = (cue - LEADING_SCAN_WINDOW).max(0.0);

    TransitionMarks {
        pre_cue,
        cue,
        start,
        end,
    }
}

/// Fade-in gain for the incoming deck
pub fn fade_in_gain(progress: f64, fading_factor: f64) -> f32 {
    progress.clamp(0.0, 1.0).powf(fading_factor) as f32
}

/// Fade-out gain for the outgoing deck
pub fn fade_out_gain(progress: f64, fading_factor: f64) -> f32 {
    (1.0 - progress.clamp(0.0, 1.0)).powf(fading_factor) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::scanner::FastScan;

    fn outcome(
        sr: u32,
        first: u64,
        last: u64,
        total: u64,
        trailing: Option<u64>,
        trailing_duration: f64,
    ) -> ScanOutcome {
        ScanOutcome {
            fast: FastScan {
                sample_rate: sr,
                frames_total: total,
                first_audible: first,
                leading: None,
                leading_duration: 0.0,
            },
            last_audible: last,
            total_frames_to_play: total,
            trailing,
            trailing_duration,
        }
    }

    #[test]
    fn long_trailing_uses_the_full_transition_window() {
        // 30 s track, trailing fade from 25 s, 5 s long
        let sr = 44100;
        let out = outcome(sr, 0, 30 * 44100, 30 * 44100, Some(25 * 44100), 5.0);
        let marks = derive_transition(&out, 4.0);

        assert!((marks.start - 25.0).abs() < 1e-9);
        assert!((marks.end - 29.0).abs() < 1e-9);
        // cue leaves a 10 s window before the overlap
        assert!((marks.cue - 15.0).abs() < 1e-9);
        assert!((marks.pre_cue - 5.0).abs() < 1e-9);
    }

    #[test]
    fn short_trailing_backs_off_from_the_end() {
        let sr = 44100;
        let out = outcome(sr, 0, 30 * 44100, 30 * 44100, Some(28 * 44100), 2.0);
        let marks = derive_transition(&out, 4.0);

        assert!((marks.end - 30.0).abs() < 1e-9);
        assert!((marks.start - 28.0).abs() < 1e-9);
        assert!(marks.cue <= marks.start);
    }

    #[test]
    fn no_trailing_collapses_overlap() {
        let sr = 44100;
        let out = outcome(sr, 0, 20 * 44100, 20 * 44100, None, 0.0);
        let marks = derive_transition(&out, 4.0);

        assert_eq!(marks.start, marks.end);
        assert!((marks.start - 20.0).abs() < 1e-9);
    }

    #[test]
    fn marks_are_ordered_and_non_negative() {
        let sr = 44100;
        for trailing_duration in [0.0, 1.0, 3.0, 8.0] {
            let trailing = (12.0 * sr as f64) as u64;
            let out = outcome(
                sr,
                0,
                15 * 44100,
                15 * 44100,
                Some(trailing),
                trailing_duration,
            );
            let marks = derive_transition(&out, 3.0);
            assert!(marks.pre_cue >= 0.0);
            assert!(marks.pre_cue <= marks.cue);
            assert!(marks.cue <= marks.start);
            assert!(marks.start <= marks.end);
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let out = outcome(48000, 100, 48000 * 25, 48000 * 26, Some(48000 * 22), 3.0);
        let a = derive_transition(&out, 3.0);
        let b = derive_transition(&out, 3.0);
        assert_eq!(a, b);
    }

    #[test]
    fn fade_gains_meet_at_the_midpoint() {
        let factor = 2.4963;
        let in_mid = fade_in_gain(0.5, factor);
        let out_mid = fade_out_gain(0.5, factor);
        assert!((in_mid - out_mid).abs() < 1e-6);
        assert!((in_mid - 0.5f32.powf(factor as f32)).abs() < 1e-4);
    }

    #[test]
    fn collapsed_marks_sit_at_the_duration() {
        let marks = TransitionMarks::collapsed(1.5);
        assert_eq!(marks.cue, 1.5);
        assert_eq!(marks.start, 1.5);
        assert_eq!(marks.end, 1.5);
    }
}
