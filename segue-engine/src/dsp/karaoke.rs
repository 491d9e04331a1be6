//! Center-channel suppressor
//!
//! Classic phase-cancellation karaoke: the opposite channel is subtracted
//! to cancel center-panned vocals, while a band-limited mono sum (low-pass
//! + high-pass branches) is mixed back in so bass and air survive the
//! cancellation. Enabling or disabling ramps the mix over ~600 ms instead
//! of switching abruptly.
//!
//! Parameters are published through [`KaraokeParams`] atomics; the audio
//! callback picks changes up at block boundaries without locking.

use crate::audio::types::AtomicF32;
use crate::config::KaraokeConfig;
use crate::dsp::{ProcessSpec, Processor};
use crate::fader::Fader;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Transition delay and length for enable/disable ramps, milliseconds
const TRANSITION_DELAY_MS: f64 = 100.0;
const TRANSITION_LENGTH_MS: f64 = 600.0;
const TRANSITION_CURVE: f32 = 0.7;

/// Parameter indices for the host-facing get/set API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaraokeParam {
    Mix,
    OriginalBgLevel,
    LowPassCutOff,
    LowPassQ,
    HighPassCutOff,
    HighPassQ,
}

/// Shared, lock-free parameter block
pub struct KaraokeParams {
    enabled: AtomicBool,
    /// Bumped on every enable/disable toggle so the processor notices
    toggle_generation: AtomicU64,
    /// Next toggle switches without the mix transition
    immediate: AtomicBool,

    mix: AtomicF32,
    original_bg_level: AtomicF32,
    lowpass_cutoff: AtomicF32,
    lowpass_q: AtomicF32,
    highpass_cutoff: AtomicF32,
    highpass_q: AtomicF32,
}

impl KaraokeParams {
    pub fn from_config(config: &KaraokeConfig) -> Arc<Self> {
        let params = Arc::new(Self {
            enabled: AtomicBool::new(config.enabled),
            toggle_generation: AtomicU64::new(0),
            immediate: AtomicBool::new(false),
            mix: AtomicF32::new(config.mix.clamp(0.0, 1.0)),
            original_bg_level: AtomicF32::new(config.original_bg_level.clamp(0.0, 1.0)),
            lowpass_cutoff: AtomicF32::new(config.lowpass_cutoff),
            lowpass_q: AtomicF32::new(config.lowpass_q),
            highpass_cutoff: AtomicF32::new(config.highpass_cutoff),
            highpass_q: AtomicF32::new(config.highpass_q),
        });
        if config.enabled {
            // start enabled without a fade-in from silence
            params.immediate.store(true, Ordering::Release);
            params.toggle_generation.fetch_add(1, Ordering::AcqRel);
        }
        params
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the effect. With `immediate`, the mix switches without the
    /// usual transition ramp.
    pub fn set_enabled(&self, enabled: bool, immediate: bool) -> bool {
        if self.enabled.load(Ordering::Acquire) == enabled {
            return true;
        }
        self.immediate.store(immediate, Ordering::Release);
        self.enabled.store(enabled, Ordering::Release);
        self.toggle_generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn get(&self, param: KaraokeParam) -> f32 {
        match param {
            KaraokeParam::Mix => self.mix.load(),
            KaraokeParam::OriginalBgLevel => self.original_bg_level.load(),
            KaraokeParam::LowPassCutOff => self.lowpass_cutoff.load(),
            KaraokeParam::LowPassQ => self.lowpass_q.load(),
            KaraokeParam::HighPassCutOff => self.highpass_cutoff.load(),
            KaraokeParam::HighPassQ => self.highpass_q.load(),
        }
    }

    /// Set a parameter, returning the clamped value actually stored
    pub fn set(&self, param: KaraokeParam, value: f32) -> f32 {
        match param {
            KaraokeParam::Mix => {
                let v = value.clamp(0.0, 1.0);
                self.mix.store(v);
                v
            }
            KaraokeParam::OriginalBgLevel => {
                let v = value.clamp(0.0, 1.0);
                self.original_bg_level.store(v);
                v
            }
            KaraokeParam::LowPassCutOff => {
                let v = value.clamp(10.0, 20000.0);
                self.lowpass_cutoff.store(v);
                v
            }
            KaraokeParam::LowPassQ => {
                let v = value.clamp(0.01, 10.0);
                self.lowpass_q.store(v);
                v
            }
            KaraokeParam::HighPassCutOff => {
                let v = value.clamp(10.0, 20000.0);
                self.highpass_cutoff.store(v);
                v
            }
            KaraokeParam::HighPassQ => {
                let v = value.clamp(0.01, 10.0);
                self.highpass_q.store(v);
                v
            }
        }
    }
}

/// Biquad filter, direct form I, f64 state
#[derive(Default, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn low_pass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * std::f64::consts::PI * cutoff / sample_rate;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos) / 2.0) / a0,
            b1: (1.0 - cos) / a0,
            b2: ((1.0 - cos) / 2.0) / a0,
            a1: (-2.0 * cos) / a0,
            a2: (1.0 - alpha) / a0,
            ..Default::default()
        }
    }

    fn high_pass(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let omega = 2.0 * std::f64::consts::PI * cutoff / sample_rate;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos) / 2.0) / a0,
            b1: (-(1.0 + cos)) / a0,
            b2: ((1.0 + cos) / 2.0) / a0,
            a1: (-2.0 * cos) / a0,
            a2: (1.0 - alpha) / a0,
            ..Default::default()
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = if output.abs() < 1e-18 { 0.0 } else { output };
        output
    }

    fn clear(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// The in-chain processor; owned by the audio callback
pub struct KaraokeProcessor {
    params: Arc<KaraokeParams>,
    sample_rate: f64,

    low_pass: Biquad,
    high_pass: Biquad,
    last_lp: (f32, f32),
    last_hp: (f32, f32),

    active: bool,
    current_mix: f32,
    mix_fader: Fader,
    seen_generation: u64,
    samples_processed: u64,
}

impl KaraokeProcessor {
    pub fn new(params: Arc<KaraokeParams>) -> Self {
        let mut mix_fader = Fader::new(None);
        mix_fader.always_reset_time(true);
        Self {
            params,
            sample_rate: 44100.0,
            low_pass: Biquad::default(),
            high_pass: Biquad::default(),
            last_lp: (0.0, 0.0),
            last_hp: (0.0, 0.0),
            active: false,
            current_mix: 0.0,
            mix_fader,
            seen_generation: 0,
            samples_processed: 0,
        }
    }

    fn clock_ms(&self) -> f64 {
        self.samples_processed as f64 / self.sample_rate * 1000.0
    }

    fn update_filters(&mut self, force: bool) {
        let lp = (
            self.params.lowpass_cutoff.load(),
            self.params.lowpass_q.load(),
        );
        if force || lp != self.last_lp {
            self.low_pass = Biquad::low_pass(self.sample_rate, lp.0 as f64, lp.1 as f64);
            self.last_lp = lp;
        }

        let hp = (
            self.params.highpass_cutoff.load(),
            self.params.highpass_q.load(),
        );
        if force || hp != self.last_hp {
            self.high_pass = Biquad::high_pass(self.sample_rate, hp.0 as f64, hp.1 as f64);
            self.last_hp = hp;
        }
    }

    /// Pick up enable/disable toggles and advance the mix transition
    fn update_mix(&mut self, now_ms: f64) {
        let generation = self.params.toggle_generation.load(Ordering::Acquire);
        if generation != self.seen_generation {
            self.seen_generation = generation;
            let enabled = self.params.enabled.load(Ordering::Acquire);
            let target = self.params.mix.load();

            if self.params.immediate.swap(false, Ordering::AcqRel) {
                self.active = enabled;
                self.current_mix = if enabled { target } else { 0.0 };
                self.mix_fader.reset_time();
            } else if enabled {
                self.active = true;
                self.mix_fader.start(
                    now_ms + TRANSITION_DELAY_MS,
                    now_ms + TRANSITION_DELAY_MS + TRANSITION_LENGTH_MS,
                    0.0,
                    target,
                    TRANSITION_CURVE,
                    Some(target),
                    None,
                );
            } else {
                self.mix_fader.start(
                    now_ms + TRANSITION_DELAY_MS,
                    now_ms + TRANSITION_DELAY_MS + TRANSITION_LENGTH_MS,
                    self.current_mix,
                    0.0,
                    TRANSITION_CURVE,
                    Some(0.0),
                    None,
                );
            }
        }

        if self.mix_fader.should_update(now_ms) {
            self.current_mix = self.mix_fader.update(now_ms);
        } else if self.active && self.params.enabled.load(Ordering::Acquire) {
            // steady state tracks live parameter edits
            self.current_mix = self.params.mix.load();
        }

        if self.active
            && !self.params.enabled.load(Ordering::Acquire)
            && !self.mix_fader.should_update(now_ms)
        {
            self.active = false;
            self.current_mix = 0.0;
        }
    }
}

impl Processor for KaraokeProcessor {
    fn prepare(&mut self, spec: &ProcessSpec) {
        self.sample_rate = spec.sample_rate as f64;
        self.samples_processed = 0;
        self.update_filters(true);
        self.low_pass.clear();
        self.high_pass.clear();
    }

    fn process(&mut self, block: &mut [f32], frames: usize) {
        let now_ms = self.clock_ms();
        self.samples_processed += frames as u64;

        self.update_mix(now_ms);

        let mix = self.current_mix;
        if !self.active || mix <= 0.0 {
            return;
        }

        self.update_filters(false);

        let bg_level = self.params.original_bg_level.load();

        for i in 0..frames {
            let l = block[i * 2];
            let r = block[i * 2 + 1];

            let mono = (l as f64) * 0.25 + (r as f64) * 0.25;
            let filtered =
                (self.low_pass.process(mono) + self.high_pass.process(mono)) as f32;

            let bg = filtered * 1.25 * bg_level;
            let bg_mix = bg * mix;

            block[i * 2] = l - (r * mix) + bg_mix;
            block[i * 2 + 1] = r - (l * mix) + bg_mix;
        }
    }

    fn reset(&mut self) {
        self.low_pass.clear();
        self.high_pass.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(config: KaraokeConfig) -> (KaraokeProcessor, Arc<KaraokeParams>) {
        let params = KaraokeParams::from_config(&config);
        let mut proc = KaraokeProcessor::new(Arc::clone(&params));
        proc.prepare(&ProcessSpec {
            sample_rate: 44100,
            max_block_frames: 512,
            channels: 2,
        });
        (proc, params)
    }

    #[test]
    fn disabled_processor_leaves_audio_untouched() {
        let (mut proc, _params) = processor(KaraokeConfig::default());

        let mut block: Vec<f32> = (0..256).map(|i| (i as f32 * 0.1).sin()).collect();
        let original = block.clone();
        proc.process(&mut block, 128);
        assert_eq!(block, original);
    }

    #[test]
    fn center_content_is_cancelled_at_full_mix() {
        let config = KaraokeConfig {
            enabled: true,
            mix: 1.0,
            original_bg_level: 0.0,
            ..Default::default()
        };
        let (mut proc, _params) = processor(config);

        // identical L/R = pure center content at 1 kHz-ish
        let mut energy_in = 0.0f64;
        let mut energy_out = 0.0f64;
        for _ in 0..8 {
            let mut block: Vec<f32> = (0..512)
                .flat_map(|i| {
                    let s = (i as f32 * 0.15).sin() * 0.5;
                    [s, s]
                })
                .collect();
            energy_in += block.iter().map(|s| (*s as f64).powi(2)).sum::<f64>();
            proc.process(&mut block, 256);
            energy_out += block.iter().map(|s| (*s as f64).powi(2)).sum::<f64>();
        }

        assert!(
            energy_out < energy_in * 0.01,
            "in={energy_in} out={energy_out}"
        );
    }

    #[test]
    fn param_clamping() {
        let params = KaraokeParams::from_config(&KaraokeConfig::default());
        assert_eq!(params.set(KaraokeParam::Mix, 2.0), 1.0);
        assert_eq!(params.set(KaraokeParam::LowPassQ, 0.0), 0.01);
        assert_eq!(params.set(KaraokeParam::HighPassCutOff, 50000.0), 20000.0);
    }

    #[test]
    fn enable_transitions_rather_than_jumping() {
        let config = KaraokeConfig {
            original_bg_level: 0.0,
            ..Default::default()
        };
        let (mut proc, params) = processor(config);
        params.set_enabled(true, false);

        // first block right after enabling: transition has not started yet
        // (100 ms delay), so audio is untouched
        let mut block = vec![0.5f32; 512];
        let original = block.clone();
        proc.process(&mut block, 256);
        assert_eq!(block, original);

        // run ~1.2 s of audio; by then the ramp has completed
        for _ in 0..200 {
            let mut block = vec![0.5f32; 512];
            proc.process(&mut block, 256);
        }
        let mut block = vec![0.5f32; 512];
        proc.process(&mut block, 256);
        // center content now attenuated to (1 - mix) of its level
        assert!(block[0].abs() < 0.15, "sample={}", block[0]);
    }
}
