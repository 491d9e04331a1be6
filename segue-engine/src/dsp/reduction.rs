//! Gain-reduction computer for the look-ahead limiter
//!
//! Works in the decibel domain: per sidechain sample, the overshoot above
//! the threshold maps through the ratio slope to a target reduction, which
//! is then smoothed with attack/release one-pole filters.

use crate::audio::types::gain_to_db;

/// Attack/release-smoothed gain reduction in dB
pub struct ReductionCalculator {
    sample_rate: f64,

    threshold: f32,
    knee: f32,
    knee_half: f32,
    slope: f32,
    attack_time: f32,
    release_time: f32,
    makeup_gain: f32,

    state: f32,
    alpha_attack: f32,
    alpha_release: f32,
}

impl ReductionCalculator {
    pub fn new() -> Self {
        let mut calc = Self {
            sample_rate: 44100.0,
            threshold: -10.0,
            knee: 0.0,
            knee_half: 0.0,
            slope: -1.0,
            attack_time: 0.01,
            release_time: 0.15,
            makeup_gain: 0.0,
            state: 0.0,
            alpha_attack: 0.0,
            alpha_release: 0.0,
        };
        calc.prepare(44100.0);
        calc
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.alpha_attack = 1.0 - self.time_to_gain(self.attack_time);
        self.alpha_release = 1.0 - self.time_to_gain(self.release_time);
        self.state = 0.0;
    }

    pub fn set_threshold(&mut self, db: f32) {
        self.threshold = db;
    }

    pub fn set_knee(&mut self, db: f32) {
        self.knee = db;
        self.knee_half = db / 2.0;
    }

    /// An infinite ratio makes a brick wall (slope −1)
    pub fn set_ratio(&mut self, ratio: f32) {
        self.slope = if ratio.is_infinite() {
            -1.0
        } else {
            1.0 / ratio - 1.0
        };
    }

    pub fn set_attack_time(&mut self, seconds: f32) {
        self.attack_time = seconds;
        self.alpha_attack = 1.0 - self.time_to_gain(seconds);
    }

    pub fn set_release_time(&mut self, seconds: f32) {
        self.release_time = seconds;
        self.alpha_release = 1.0 - self.time_to_gain(seconds);
    }

    pub fn set_makeup_gain(&mut self, db: f32) {
        self.makeup_gain = db;
    }

    pub fn makeup_gain(&self) -> f32 {
        self.makeup_gain
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    /// Smoothed reduction (≤ 0 dB) per sidechain magnitude sample
    pub fn calculate_decibels(&mut self, sidechain: &[f32], result: &mut [f32]) {
        for (i, &magnitude) in sidechain.iter().enumerate() {
            let level_db = gain_to_db(magnitude);
            let overshoot = level_db - self.threshold;
            let reduction = self.apply(overshoot);

            let diff = reduction - self.state;
            if diff < 0.0 {
                // louder -> attack
                self.state += self.alpha_attack * diff;
            } else {
                self.state += self.alpha_release * diff;
            }

            result[i] = self.state;
        }
    }

    fn time_to_gain(&self, seconds: f32) -> f32 {
        (-1.0 / (self.sample_rate as f32 * seconds)).exp()
    }

    fn apply(&self, overshoot_db: f32) -> f32 {
        if overshoot_db <= -self.knee_half {
            return 0.0;
        }
        if overshoot_db <= self.knee_half {
            // soft knee region
            return 0.5 * self.slope * (overshoot_db + self.knee_half)
                * (overshoot_db + self.knee_half)
                / self.knee;
        }
        self.slope * overshoot_db
    }
}

impl Default for ReductionCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::db_to_gain;

    fn brick_wall() -> ReductionCalculator {
        let mut calc = ReductionCalculator::new();
        calc.set_threshold(-6.0);
        calc.set_knee(0.0);
        calc.set_ratio(f32::INFINITY);
        calc.set_attack_time(0.010);
        calc.set_release_time(0.060);
        calc.prepare(44100.0);
        calc
    }

    #[test]
    fn below_threshold_no_reduction() {
        let mut calc = brick_wall();
        let sidechain = vec![db_to_gain(-12.0); 512];
        let mut result = vec![0.0f32; 512];
        calc.calculate_decibels(&sidechain, &mut result);
        assert!(result.iter().all(|&r| r.abs() < 1e-6));
    }

    #[test]
    fn sustained_overshoot_converges_to_full_reduction() {
        let mut calc = brick_wall();
        // 0 dBFS input over a -6 dB threshold: 6 dB overshoot
        let sidechain = vec![1.0f32; 44100];
        let mut result = vec![0.0f32; 44100];
        calc.calculate_decibels(&sidechain, &mut result);

        // after a second the smoothed state sits at -6 dB
        let settled = result[result.len() - 1];
        assert!((settled + 6.0).abs() < 0.1, "settled={settled}");
        // attack is gradual: the first sample is nowhere near full reduction
        assert!(result[0] > -1.0);
    }

    #[test]
    fn release_recovers_after_overshoot() {
        let mut calc = brick_wall();
        let mut sidechain = vec![1.0f32; 4410];
        sidechain.extend(vec![db_to_gain(-20.0); 44100]);
        let mut result = vec![0.0f32; sidechain.len()];
        calc.calculate_decibels(&sidechain, &mut result);

        let after_release = result[result.len() - 1];
        assert!(after_release.abs() < 0.05, "after_release={after_release}");
    }
}
