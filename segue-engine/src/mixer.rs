//! Mixer and post-processor
//!
//! The audio sink drives [`Mixer::pull`]: it sums every sounding deck,
//! handles pause/resume with short ramps, runs the post-processing chain
//! (karaoke suppressor, look-ahead limiter, level telemetry), and applies
//! the master volume with a per-block ramp. Everything on this path uses
//! pre-sized buffers, atomics, and try-locks only.

use crate::deck::source::{DeckShared, DeckSource};
use crate::dsp::karaoke::{KaraokeParams, KaraokeProcessor};
use crate::dsp::level_tracker::{level_tracker, LevelReceiver, LevelTracker};
use crate::dsp::limiter::LookAheadLimiter;
use crate::dsp::{ProcessSpec, Processor};
use crate::engine::control::ControlMsg;
use crate::output::OutputSpec;
use crate::audio::types::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Samples over which pause and resume ramp the mix
const PAUSE_RAMP_SAMPLES: usize = 256;
/// Block measurements averaged into the reported level
const LEVEL_BACKLOG: usize = 10;
/// Upper bound on frames processed per chunk; larger pulls are split
const MAX_BLOCK_FRAMES: usize = 4096;

/// Post-processing chain applied to the summed mix
pub(crate) struct PostProcessor {
    karaoke: KaraokeProcessor,
    limiter: LookAheadLimiter,
    levels: LevelTracker,
    volume: Arc<AtomicF32>,
    last_volume: f32,
}

impl PostProcessor {
    fn prepare(&mut self, spec: &ProcessSpec) {
        self.karaoke.prepare(spec);
        self.limiter.prepare(spec);
        self.last_volume = self.volume.load();
    }

    fn process(&mut self, block: &mut [f32], frames: usize, time_ms: f64) {
        self.karaoke.process(block, frames);
        self.limiter.process(block, frames);
        self.levels.process(block, frames, time_ms);

        // master volume with a per-block ramp
        let volume = self.volume.load();
        let step = (volume - self.last_volume) / frames as f32;
        for i in 0..frames {
            let g = self.last_volume + step * (i + 1) as f32;
            block[i * 2] *= g;
            block[i * 2 + 1] *= g;
        }
        self.last_volume = volume;
    }
}

/// Control-side view of the mixer
pub(crate) struct MixerHandle {
    pub paused: Arc<AtomicBool>,
    pub volume: Arc<AtomicF32>,
    pub karaoke: Arc<KaraokeParams>,
    pub reduction: Arc<AtomicF32>,
    pub levels: Mutex<LevelReceiver>,
    pub samples_processed: Arc<AtomicU64>,
    pub sample_rate: Arc<AtomicU32>,
}

impl MixerHandle {
    /// Milliseconds on the output sample clock
    pub fn now_ms(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::Acquire).max(1);
        self.samples_processed.load(Ordering::Acquire) as f64 / rate as f64 * 1000.0
    }
}

/// The summing path, owned by the audio pump
pub(crate) struct Mixer {
    deck_slots: Vec<Arc<Mutex<Option<DeckSource>>>>,
    deck_shared: Vec<Arc<DeckShared>>,
    post: PostProcessor,
    scratch: Vec<f32>,

    paused: Arc<AtomicBool>,
    stalled: bool,
    prepared: bool,
    sample_rate: Arc<AtomicU32>,
    samples_processed: Arc<AtomicU64>,
    control_tx: UnboundedSender<ControlMsg>,
}

impl Mixer {
    pub fn new(
        deck_slots: Vec<Arc<Mutex<Option<DeckSource>>>>,
        deck_shared: Vec<Arc<DeckShared>>,
        karaoke_params: Arc<KaraokeParams>,
        control_tx: UnboundedSender<ControlMsg>,
    ) -> (Self, MixerHandle) {
        let limiter = LookAheadLimiter::new();
        let reduction = limiter.reduction_handle();
        let (levels, level_receiver) = level_tracker(2, LEVEL_BACKLOG);

        let paused = Arc::new(AtomicBool::new(false));
        let volume = Arc::new(AtomicF32::new(1.0));
        let samples_processed = Arc::new(AtomicU64::new(0));
        let sample_rate = Arc::new(AtomicU32::new(44100));

        let mixer = Self {
            deck_slots,
            deck_shared,
            post: PostProcessor {
                karaoke: KaraokeProcessor::new(Arc::clone(&karaoke_params)),
                limiter,
                levels,
                volume: Arc::clone(&volume),
                last_volume: 1.0,
            },
            scratch: Vec::new(),
            paused: Arc::clone(&paused),
            stalled: false,
            prepared: false,
            sample_rate: Arc::clone(&sample_rate),
            samples_processed: Arc::clone(&samples_processed),
            control_tx,
        };

        let handle = MixerHandle {
            paused,
            volume,
            karaoke: karaoke_params,
            reduction,
            levels: Mutex::new(level_receiver),
            samples_processed,
            sample_rate,
        };

        (mixer, handle)
    }

    /// Size the path for the device. Safe to call again on device changes.
    pub fn prepare(&mut self, spec: OutputSpec) {
        let max_block = spec.block_size.clamp(64, MAX_BLOCK_FRAMES);

        self.sample_rate.store(spec.sample_rate, Ordering::Release);
        for shared in &self.deck_shared {
            shared.output_rate.store(spec.sample_rate, Ordering::Release);
        }

        self.scratch.clear();
        self.scratch.resize(max_block * 2, 0.0);
        self.post.prepare(&ProcessSpec {
            sample_rate: spec.sample_rate,
            max_block_frames: max_block,
            channels: 2,
        });
        self.prepared = true;

        info!(
            "mixer prepared: {} Hz, {} frame blocks",
            spec.sample_rate, max_block
        );
        let _ = self.control_tx.send(ControlMsg::DeviceChanged);
    }

    /// Fill an interleaved stereo buffer. Splits oversized pulls into
    /// prepared-size chunks.
    pub fn pull(&mut self, out: &mut [f32]) {
        if !self.prepared {
            out.fill(0.0);
            return;
        }

        let max_frames = self.scratch.len() / 2;
        let mut offset = 0;
        while offset < out.len() {
            let frames = ((out.len() - offset) / 2).min(max_frames);
            if frames == 0 {
                break;
            }
            self.render(&mut out[offset..offset + frames * 2], frames);
            offset += frames * 2;
        }
    }

    fn render(&mut self, out: &mut [f32], frames: usize) {
        let paused = self.paused.load(Ordering::Acquire);

        if !self.stalled {
            self.mix_decks(out, frames);
            if paused {
                apply_edge_ramp(out, frames, true);
                self.stalled = true;
            }
        } else if !paused {
            self.mix_decks(out, frames);
            apply_edge_ramp(out, frames, false);
            self.stalled = false;
        } else {
            out[..frames * 2].fill(0.0);
        }

        let time_ms = {
            let rate = self.sample_rate.load(Ordering::Acquire).max(1);
            self.samples_processed.load(Ordering::Acquire) as f64 / rate as f64 * 1000.0
        };
        self.post.process(out, frames, time_ms);

        self.samples_processed
            .fetch_add(frames as u64, Ordering::AcqRel);
    }

    /// Sum every deck that currently produces audio. A deck whose source
    /// slot is briefly held by the control side is skipped for this block.
    fn mix_decks(&mut self, out: &mut [f32], frames: usize) {
        out[..frames * 2].fill(0.0);

        for slot in &self.deck_slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let Some(source) = guard.as_mut() else {
                continue;
            };
            if source.fill(&mut self.scratch, frames) {
                for i in 0..frames * 2 {
                    out[i] += self.scratch[i];
                }
            }
        }
    }
}

/// 256-sample linear ramp at a pause (down) or resume (up) edge
fn apply_edge_ramp(out: &mut [f32], frames: usize, down: bool) {
    let ramp = PAUSE_RAMP_SAMPLES.min(frames);
    for i in 0..ramp {
        let progress = (i + 1) as f32 / ramp as f32;
        let g = if down { 1.0 - progress } else { progress };
        out[i * 2] *= g;
        out[i * 2 + 1] *= g;
    }
    if down && frames > ramp {
        out[ramp * 2..frames * 2].fill(0.0);
    }
}
