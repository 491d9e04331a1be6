//! Look-ahead brick-wall limiter
//!
//! The stereo signal is delayed by the look-ahead period while the
//! dB-domain gain reduction, computed from a per-frame max-magnitude
//! sidechain, is faded in backwards over the same period. Peaks are thus
//! caught before they arrive instead of being clipped as they pass.

use crate::audio::types::{db_to_gain, gain_to_db, AtomicF32};
use crate::dsp::reduction::ReductionCalculator;
use crate::dsp::{ProcessSpec, Processor};
use std::sync::Arc;

const LOOK_AHEAD_SECONDS: f32 = 0.005;
const THRESHOLD_DB: f32 = -6.0;
const ATTACK_SECONDS: f32 = 0.010;
const RELEASE_SECONDS: f32 = 0.060;
const RATIO: f32 = 16.0;

/// Fixed stereo delay of the audio signal by the look-ahead period
struct DelayLine {
    /// Interleaved stereo history, `delay_frames` frames long
    buffer: Vec<f32>,
    delay_frames: usize,
    pos: usize,
}

impl DelayLine {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            delay_frames: 0,
            pos: 0,
        }
    }

    fn prepare(&mut self, sample_rate: u32, delay_seconds: f32) {
        self.delay_frames = (delay_seconds * sample_rate as f32) as usize;
        self.buffer.clear();
        self.buffer.resize(self.delay_frames * 2, 0.0);
        self.pos = 0;
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }

    /// Read-then-write per frame gives an exact `delay_frames` delay
    fn process(&mut self, block: &mut [f32], frames: usize) {
        if self.delay_frames == 0 {
            return;
        }
        for i in 0..frames {
            let idx = self.pos * 2;
            let delayed_l = self.buffer[idx];
            let delayed_r = self.buffer[idx + 1];
            self.buffer[idx] = block[i * 2];
            self.buffer[idx + 1] = block[i * 2 + 1];
            block[i * 2] = delayed_l;
            block[i * 2 + 1] = delayed_r;
            self.pos = (self.pos + 1) % self.delay_frames;
        }
    }
}

/// Backward fade-in of the gain-reduction curve over the look-ahead window.
///
/// Walking the pushed block in reverse, every new reduction dip starts a
/// linear ramp (in dB) that reaches zero `delay_frames` earlier, so the
/// delayed signal is already being turned down when the peak arrives.
struct LookAheadFade {
    buffer: Vec<f32>,
    delay_frames: usize,
    write_pos: usize,
    last_pushed: usize,
}

impl LookAheadFade {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            delay_frames: 0,
            write_pos: 0,
            last_pushed: 0,
        }
    }

    fn prepare(&mut self, sample_rate: u32, delay_seconds: f32, max_block: usize) {
        self.delay_frames = (delay_seconds * sample_rate as f32) as usize;
        self.buffer.clear();
        self.buffer.resize(max_block + self.delay_frames, 0.0);
        self.write_pos = 0;
        self.last_pushed = 0;
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.last_pushed = 0;
    }

    fn push(&mut self, src: &[f32]) {
        for &sample in src {
            self.buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.buffer.len();
        }
        self.last_pushed = src.len();
    }

    fn process(&mut self) {
        if self.delay_frames == 0 {
            return;
        }

        let len = self.buffer.len();
        let mut next_value = 0.0f32;
        let mut step = 0.0f32;

        let mut idx = (self.write_pos + len - 1) % len;

        for _ in 0..self.last_pushed {
            let sample = self.buffer[idx];
            if sample > next_value {
                // weaker reduction than the ramp demands: pull it down
                self.buffer[idx] = next_value;
                next_value += step;
            } else {
                // stronger dip: restart the ramp toward zero from here
                step = -sample / self.delay_frames as f32;
                next_value = sample + step;
            }
            idx = (idx + len - 1) % len;
        }

        // Extend the last ramp into the not-yet-read older samples
        if step != 0.0 {
            for _ in 0..self.delay_frames {
                let sample = self.buffer[idx];
                if sample > next_value {
                    self.buffer[idx] = next_value;
                    next_value += step;
                } else {
                    break;
                }
                idx = (idx + len - 1) % len;
            }
        }
    }

    /// Read the batch delayed by the look-ahead period
    fn read(&mut self, dest: &mut [f32]) {
        let len = self.buffer.len();
        // the buffer holds max_block + delay samples, so the batch pushed
        // last is always fully behind the read window
        let start = (self.write_pos + len - self.last_pushed - self.delay_frames) % len;
        for (i, out) in dest.iter_mut().enumerate().take(self.last_pushed) {
            *out = self.buffer[(start + i) % len];
        }
    }
}

/// Brick-wall limiter on the summed mix
pub struct LookAheadLimiter {
    calculator: ReductionCalculator,
    delay: DelayLine,
    fade: LookAheadFade,
    sidechain: Vec<f32>,
    reduction_curve: Vec<f32>,
    /// Block-average reduction in dB, for telemetry
    reduction: Arc<AtomicF32>,
}

impl LookAheadLimiter {
    pub fn new() -> Self {
        let mut calculator = ReductionCalculator::new();
        calculator.set_threshold(THRESHOLD_DB);
        calculator.set_knee(0.0);
        calculator.set_attack_time(ATTACK_SECONDS);
        calculator.set_release_time(RELEASE_SECONDS);
        calculator.set_makeup_gain(0.0);
        // anything steeper than ~16:1 is treated as a hard wall
        if RATIO > 15.9 {
            calculator.set_ratio(f32::INFINITY);
        } else {
            calculator.set_ratio(RATIO);
        }

        Self {
            calculator,
            delay: DelayLine::new(),
            fade: LookAheadFade::new(),
            sidechain: Vec::new(),
            reduction_curve: Vec::new(),
            reduction: Arc::new(AtomicF32::new(0.0)),
        }
    }

    /// Shared handle reporting the current reduction in dB
    pub fn reduction_handle(&self) -> Arc<AtomicF32> {
        Arc::clone(&self.reduction)
    }
}

impl Default for LookAheadLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for LookAheadLimiter {
    fn prepare(&mut self, spec: &ProcessSpec) {
        self.calculator.prepare(spec.sample_rate as f64);
        self.delay.prepare(spec.sample_rate, LOOK_AHEAD_SECONDS);
        self.fade
            .prepare(spec.sample_rate, LOOK_AHEAD_SECONDS, spec.max_block_frames);
        self.sidechain.clear();
        self.sidechain.resize(spec.max_block_frames, 0.0);
        self.reduction_curve.clear();
        self.reduction_curve.resize(spec.max_block_frames, 0.0);
    }

    fn process(&mut self, block: &mut [f32], frames: usize) {
        if frames == 0 || self.sidechain.len() < frames {
            return;
        }

        // sidechain: per-frame maximum magnitude across channels
        for i in 0..frames {
            self.sidechain[i] = block[i * 2].abs().max(block[i * 2 + 1].abs());
        }

        self.calculator
            .calculate_decibels(&self.sidechain[..frames], &mut self.reduction_curve[..frames]);

        // delay the audio while the reduction fades in ahead of it
        self.delay.process(block, frames);

        self.fade.push(&self.reduction_curve[..frames]);
        self.fade.process();
        self.fade.read(&mut self.reduction_curve[..frames]);

        let makeup = self.calculator.makeup_gain();
        let mut linear_sum = 0.0f32;
        for i in 0..frames {
            let gain = db_to_gain(self.reduction_curve[i] + makeup);
            linear_sum += gain;
            block[i * 2] *= gain;
            block[i * 2 + 1] *= gain;
        }

        self.reduction
            .store(gain_to_db(linear_sum / frames as f32));
    }

    fn reset(&mut self) {
        self.calculator.reset();
        self.delay.reset();
        self.fade.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared_limiter(block: usize) -> LookAheadLimiter {
        let mut limiter = LookAheadLimiter::new();
        limiter.prepare(&ProcessSpec {
            sample_rate: 44100,
            max_block_frames: block,
            channels: 2,
        });
        limiter
    }

    #[test]
    fn quiet_signal_passes_delayed_but_unattenuated() {
        let mut limiter = prepared_limiter(512);
        let amplitude = db_to_gain(-20.0);

        let mut peak = 0.0f32;
        for _ in 0..40 {
            let mut block: Vec<f32> = (0..512)
                .flat_map(|i| {
                    let s = (i as f32 * 0.05).sin() * amplitude;
                    [s, s]
                })
                .collect();
            limiter.process(&mut block, 512);
            for s in &block {
                peak = peak.max(s.abs());
            }
        }

        assert!((peak - amplitude).abs() < 0.01, "peak={peak}");
        assert!(limiter.reduction_handle().load().abs() < 0.1);
    }

    #[test]
    fn loud_signal_is_held_at_the_threshold() {
        let mut limiter = prepared_limiter(512);
        let threshold = db_to_gain(-6.0);

        let mut last_block_peak = 0.0f32;
        for _ in 0..200 {
            // full-scale square-ish content, 6 dB over the threshold
            let mut block = vec![1.0f32; 1024];
            limiter.process(&mut block, 512);
            last_block_peak = block.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        }

        assert!(
            last_block_peak <= threshold * 1.05,
            "peak={last_block_peak} threshold={threshold}"
        );
        // telemetry reports roughly -6 dB of reduction
        let reduction = limiter.reduction_handle().load();
        assert!(reduction < -5.0 && reduction > -7.0, "reduction={reduction}");
    }

    #[test]
    fn delay_line_delays_by_lookahead() {
        let mut delay = DelayLine::new();
        delay.prepare(1000, 0.005); // 5 frames

        let mut block = vec![0.0f32; 32];
        block[0] = 1.0; // impulse on the left channel, frame 0
        delay.process(&mut block, 16);

        assert_eq!(block[0], 0.0);
        assert_eq!(block[5 * 2], 1.0); // reappears 5 frames later
    }
}
