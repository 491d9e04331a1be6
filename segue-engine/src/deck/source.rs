//! Real-time side of a deck
//!
//! [`DeckSource`] is what the audio callback sees: a ring-buffer consumer,
//! a gain ramp, and a handful of shared atomics. `fill` never allocates,
//! never locks, and never touches the reader; underruns become silence and
//! end-of-stream latches a finish flag that the telemetry task picks up.

use crate::audio::ring_buffer::FrameConsumer;
use crate::audio::types::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Samples over which a stop request ramps to silence
const STOP_RAMP_SAMPLES: usize = 256;

/// State shared between a deck's control side, its read-ahead producer,
/// and the audio callback.
pub(crate) struct DeckShared {
    pub playing: AtomicBool,
    /// Real-time mirror: true once the callback has actually gone silent
    pub stopped: AtomicBool,
    pub fading: AtomicBool,
    /// Set by the callback when playback ends; consumed by telemetry
    pub finish_flag: AtomicBool,
    pub is_main: AtomicBool,

    pub volume: AtomicF32,
    pub pre_gain: AtomicF32,
    pub replay_gain: AtomicF32,

    /// Device sample rate
    pub output_rate: AtomicU32,
    /// Native rate of the loaded track
    pub source_rate: AtomicU32,

    /// Source frame playback started from (load start or last seek)
    pub origin_source_frame: AtomicU64,
    /// Source frames to play before the stream counts as ended
    pub total_source_frames: AtomicU64,
    /// Device-rate frames consumed since the origin
    pub frames_popped: AtomicU64,
    /// The producer has delivered everything up to the total
    pub producer_eof: AtomicBool,
}

impl DeckShared {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(true),
            fading: AtomicBool::new(false),
            finish_flag: AtomicBool::new(false),
            is_main: AtomicBool::new(false),
            volume: AtomicF32::new(1.0),
            pre_gain: AtomicF32::new(1.0),
            replay_gain: AtomicF32::new(1.0),
            output_rate: AtomicU32::new(44100),
            source_rate: AtomicU32::new(0),
            origin_source_frame: AtomicU64::new(0),
            total_source_frames: AtomicU64::new(0),
            frames_popped: AtomicU64::new(0),
            producer_eof: AtomicBool::new(false),
        }
    }

    /// Combined linear gain the callback ramps toward
    pub fn target_gain(&self) -> f32 {
        self.pre_gain.load() * self.replay_gain.load() * self.volume.load()
    }

    /// Playback position in the track timeline, seconds
    pub fn position_seconds(&self) -> f64 {
        let source_rate = self.source_rate.load(Ordering::Acquire);
        if source_rate == 0 {
            return 0.0;
        }
        let output_rate = self.output_rate.load(Ordering::Acquire).max(1);
        let origin = self.origin_source_frame.load(Ordering::Acquire) as f64;
        let popped = self.frames_popped.load(Ordering::Acquire) as f64;
        origin / source_rate as f64 + popped / output_rate as f64
    }

    /// Source frames consumed so far (origin plus resampled progress)
    fn consumed_source_frames(&self) -> u64 {
        let source_rate = self.source_rate.load(Ordering::Acquire) as f64;
        let output_rate = self.output_rate.load(Ordering::Acquire).max(1) as f64;
        let origin = self.origin_source_frame.load(Ordering::Acquire);
        let popped = self.frames_popped.load(Ordering::Acquire) as f64;
        origin + (popped * source_rate / output_rate) as u64
    }
}

/// Owned by the mixer, locked only with `try_lock` from the callback
pub(crate) struct DeckSource {
    consumer: FrameConsumer,
    shared: Arc<DeckShared>,
    last_gain: f32,
}

impl DeckSource {
    pub fn new(consumer: FrameConsumer, shared: Arc<DeckShared>, initial_gain: f32) -> Self {
        Self {
            consumer,
            shared,
            last_gain: initial_gain,
        }
    }

    /// Carry the gain ramp across a rebuild (seek)
    pub fn last_gain(&self) -> f32 {
        self.last_gain
    }

    /// Fill `out[..frames * 2]` with this deck's next block.
    ///
    /// Returns true when the deck contributed audio (even silence from an
    /// underrun); false when it is stopped and produced nothing.
    pub fn fill(&mut self, out: &mut [f32], frames: usize) -> bool {
        let shared = Arc::clone(&self.shared);
        let was_stopped = shared.stopped.load(Ordering::Acquire);

        if was_stopped {
            out[..frames * 2].fill(0.0);
            return false;
        }

        let mut produced = 0u64;
        for i in 0..frames {
            match self.consumer.pop() {
                Some(frame) => {
                    out[i * 2] = frame.left;
                    out[i * 2 + 1] = frame.right;
                    produced += 1;
                }
                None => {
                    out[i * 2] = 0.0;
                    out[i * 2 + 1] = 0.0;
                }
            }
        }
        shared.frames_popped.fetch_add(produced, Ordering::AcqRel);

        let playing = shared.playing.load(Ordering::Acquire);
        if !playing {
            // stop requested: ramp the block head to silence, clear the rest
            self.apply_stop_ramp(out, frames);
        } else {
            let total = shared.total_source_frames.load(Ordering::Acquire);
            let drained = shared.producer_eof.load(Ordering::Acquire)
                && self.consumer.ready_frames() == 0
                && produced < frames as u64;
            let past_end = total > 0 && shared.consumed_source_frames() > total;

            if drained || past_end {
                shared.playing.store(false, Ordering::Release);
            }
        }

        let now_stopped = !shared.playing.load(Ordering::Acquire);
        shared.stopped.store(now_stopped, Ordering::Release);
        if now_stopped {
            shared.fading.store(false, Ordering::Release);
        }

        // per-block linear gain ramp, continuous across block boundaries
        let gain = shared.target_gain();
        let step = (gain - self.last_gain) / frames as f32;
        for i in 0..frames {
            let g = self.last_gain + step * (i + 1) as f32;
            out[i * 2] *= g;
            out[i * 2 + 1] *= g;
        }
        self.last_gain = gain;

        if now_stopped {
            shared.finish_flag.store(true, Ordering::Release);
        }

        true
    }

    fn apply_stop_ramp(&self, out: &mut [f32], frames: usize) {
        let ramp = STOP_RAMP_SAMPLES.min(frames);
        for i in 0..ramp {
            let g = 1.0 - (i + 1) as f32 / ramp as f32;
            out[i * 2] *= g;
            out[i * 2 + 1] *= g;
        }
        if frames > ramp {
            out[ramp * 2..frames * 2].fill(0.0);
        }
    }
}
