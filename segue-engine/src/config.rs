//! Engine configuration
//!
//! Plain serde structs with defaults. Hosts construct an [`EngineConfig`]
//! directly or deserialize one from TOML; the console frontend does the
//! latter and applies command-line overrides.

use crate::error::{EngineError, Result};
use serde::Deserialize;

fn default_deck_count() -> usize {
    3
}

fn default_max_transition_time() -> f64 {
    3.0
}

fn default_max_fade_out_duration() -> f64 {
    3.0
}

fn default_min_leading_to_fade() -> f64 {
    2.5
}

fn default_fading_curve() -> f64 {
    60.0
}

fn default_replay_gain_boost() -> f32 {
    9.0
}

fn default_read_ahead_seconds() -> f64 {
    2.0
}

fn default_position_interval_ms() -> u64 {
    33
}

fn default_idle_position_interval_ms() -> u64 {
    250
}

/// Center-channel suppressor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KaraokeConfig {
    /// Whether the suppressor is active at startup
    pub enabled: bool,

    /// Suppression mix, 0.0 (off) to 1.0 (full center removal)
    pub mix: f32,

    /// Level of the filtered background re-injected into the mix
    pub original_bg_level: f32,

    /// Low-pass branch of the background filter (Hz)
    pub lowpass_cutoff: f32,
    pub lowpass_q: f32,

    /// High-pass branch of the background filter (Hz)
    pub highpass_cutoff: f32,
    pub highpass_q: f32,
}

impl Default for KaraokeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mix: 0.8,
            original_bg_level: 0.65,
            lowpass_cutoff: 125.0,
            lowpass_q: 3.5,
            highpass_cutoff: 7000.0,
            highpass_q: 2.0,
        }
    }
}

/// Engine configuration
///
/// All durations are seconds unless the field name says otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of decks in the pool (2 or 3 in practice)
    #[serde(default = "default_deck_count")]
    pub deck_count: usize,

    /// Upper bound on the crossfade overlap duration
    #[serde(default = "default_max_transition_time")]
    pub max_transition_time: f64,

    /// Duration of a manually requested fade-out
    #[serde(default = "default_max_fade_out_duration")]
    pub max_fade_out_duration: f64,

    /// Below this leading duration the next track starts at its onset
    /// without fade-in compensation
    #[serde(default = "default_min_leading_to_fade")]
    pub min_leading_to_fade: f64,

    /// Fade curve shape, 0..100; see [`EngineConfig::fading_factor`]
    #[serde(default = "default_fading_curve")]
    pub fading_curve: f64,

    /// Decibels added to per-track replay gain before linearization
    #[serde(default = "default_replay_gain_boost")]
    pub replay_gain_boost: f32,

    /// Read-ahead buffering per deck, in seconds of device-rate audio
    #[serde(default = "default_read_ahead_seconds")]
    pub read_ahead_seconds: f64,

    /// Position report interval while a deck is playing
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,

    /// Position report interval while idle
    #[serde(default = "default_idle_position_interval_ms")]
    pub idle_position_interval_ms: u64,

    /// Center-channel suppressor
    pub karaoke: KaraokeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deck_count: default_deck_count(),
            max_transition_time: default_max_transition_time(),
            max_fade_out_duration: default_max_fade_out_duration(),
            min_leading_to_fade: default_min_leading_to_fade(),
            fading_curve: default_fading_curve(),
            replay_gain_boost: default_replay_gain_boost(),
            read_ahead_seconds: default_read_ahead_seconds(),
            position_interval_ms: default_position_interval_ms(),
            idle_position_interval_ms: default_idle_position_interval_ms(),
            karaoke: KaraokeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate ranges that would otherwise produce silent misbehavior
    pub fn validate(&self) -> Result<()> {
        if self.deck_count < 2 {
            return Err(EngineError::Config(format!(
                "deck_count must be at least 2, got {}",
                self.deck_count
            )));
        }
        if self.max_transition_time < 0.0 {
            return Err(EngineError::Config(
                "max_transition_time must not be negative".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.fading_curve) {
            return Err(EngineError::Config(format!(
                "fading_curve must be within 0..100, got {}",
                self.fading_curve
            )));
        }
        if self.read_ahead_seconds <= 0.0 {
            return Err(EngineError::Config(
                "read_ahead_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Exponent shaping the fade-in/out ramps, derived from the 0..100
    /// user-facing curve control.
    ///
    /// Curve 0 maps to 1.0 (linear), curve 100 to 1000 (hard cut).
    pub fn fading_factor(&self) -> f64 {
        let curve = self.fading_curve.clamp(0.0, 100.0);
        1000.0 / (((100.0 - curve) / 100.0) * 999.0 + 1.0)
    }
}
