//! Core audio data types and gain math

use std::sync::atomic::{AtomicU32, Ordering};

/// One stereo sample pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

impl StereoFrame {
    /// A silent frame
    pub const ZERO: StereoFrame = StereoFrame { left: 0.0, right: 0.0 };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Duplicate a mono sample to both channels
    pub fn from_mono(sample: f32) -> Self {
        Self { left: sample, right: sample }
    }

    pub fn scaled(self, gain: f32) -> Self {
        Self {
            left: self.left * gain,
            right: self.right * gain,
        }
    }
}

/// Convert decibels to a linear gain
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db * 0.05)
}

/// Convert a linear gain to decibels, floored at -100 dB
pub fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(-100.0)
    } else {
        -100.0
    }
}

/// f32 stored in an `AtomicU32` via its bit pattern.
///
/// Lets the control side publish gain and parameter changes that the audio
/// callback reads without locking.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_round_trip() {
        for db in [-60.0f32, -23.0, -6.0, 0.0] {
            let gain = db_to_gain(db);
            assert!((gain_to_db(gain) - db).abs() < 1e-4);
        }
        assert_eq!(gain_to_db(0.0), -100.0);
        assert_eq!(gain_to_db(-1.0), -100.0);
    }

    #[test]
    fn known_gain_values() {
        assert!((db_to_gain(-6.0) - 0.5012).abs() < 1e-3);
        assert!((db_to_gain(-60.0) - 0.001).abs() < 1e-5);
    }

    #[test]
    fn atomic_f32_stores_and_loads() {
        let value = AtomicF32::new(0.75);
        assert_eq!(value.load(), 0.75);
        value.store(-1.5);
        assert_eq!(value.load(), -1.5);
    }

    #[test]
    fn frame_helpers() {
        let frame = StereoFrame::from_mono(0.5);
        assert_eq!(frame.left, frame.right);
        let scaled = StereoFrame::new(0.5, -0.5).scaled(0.5);
        assert_eq!(scaled.left, 0.25);
        assert_eq!(scaled.right, -0.25);
    }
}
