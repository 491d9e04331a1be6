//! Track handles
//!
//! A [`Track`] is the unit the host enqueues: a file path plus optional
//! per-track gain hints. Tracks are reference-counted and shared between the
//! queue and the deck that plays them; the engine never mutates them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Shared, immutable track handle
pub type TrackHandle = Arc<Track>;

/// One queued audio file with optional gain hints
#[derive(Debug, Clone)]
pub struct Track {
    /// Stable identifier for event correlation
    pub id: Uuid,

    /// Path to the audio file
    pub path: PathBuf,

    /// Linear pre-gain multiplier; non-positive values are treated as 1.0
    pub pre_gain: f32,

    /// Replay gain in decibels, as extracted by the host's tagger
    pub replay_gain_db: Option<f32>,
}

impl Track {
    /// Create a track for a file path with neutral gain
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            pre_gain: 1.0,
            replay_gain_db: None,
        }
    }

    /// Set the linear pre-gain multiplier
    pub fn with_pre_gain(mut self, pre_gain: f32) -> Self {
        self.pre_gain = pre_gain;
        self
    }

    /// Set the replay gain in decibels
    pub fn with_replay_gain_db(mut self, db: f32) -> Self {
        self.replay_gain_db = Some(db);
        self
    }

    /// Wrap into a shared handle
    pub fn into_handle(self) -> TrackHandle {
        Arc::new(self)
    }

    /// Pre-gain with non-positive values sanitized to 1.0
    pub fn effective_pre_gain(&self) -> f32 {
        if self.pre_gain <= 0.0 {
            1.0
        } else {
            self.pre_gain
        }
    }

    /// Replay gain as a linear multiplier, with the given boost applied
    pub fn replay_gain_linear(&self, boost_db: f32) -> f32 {
        match self.replay_gain_db {
            Some(db) => 10.0_f32.powf((db + boost_db) / 20.0),
            None => 1.0,
        }
    }

    /// File path accessor
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_pre_gain_is_sanitized() {
        assert_eq!(Track::new("/a.mp3").with_pre_gain(0.0).effective_pre_gain(), 1.0);
        assert_eq!(Track::new("/a.mp3").with_pre_gain(-2.0).effective_pre_gain(), 1.0);
        assert_eq!(Track::new("/a.mp3").with_pre_gain(0.5).effective_pre_gain(), 0.5);
    }

    #[test]
    fn replay_gain_linearization() {
        let track = Track::new("/a.mp3").with_replay_gain_db(-9.0);
        // -9 dB + 9 dB boost cancels out
        assert!((track.replay_gain_linear(9.0) - 1.0).abs() < 1e-6);
        // no replay gain tag -> unity regardless of boost
        assert_eq!(Track::new("/a.mp3").replay_gain_linear(9.0), 1.0);
    }
}
