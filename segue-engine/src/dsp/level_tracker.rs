//! Output level telemetry
//!
//! The audio callback measures per-channel block magnitudes and pushes
//! snapshots through a wait-free ring; the telemetry task folds them into
//! the values hosts read (average level over a short backlog, peak with
//! hold-then-decay, clip flag). Nothing on the callback side locks.

use crate::audio::types::{db_to_gain, gain_to_db};
use ringbuf::{traits::*, HeapRb};

/// Peak decay after the hold expires, dB per second
const PEAK_DECAY_DB_PER_SEC: f64 = 0.125;
/// Peak hold duration, milliseconds
const PEAK_HOLD_MS: f64 = 500.0;
/// Snapshot ring capacity per channel
const RESULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, Default)]
struct LevelEntry {
    time_ms: f64,
    clip: bool,
    level: f64,
    peak: f64,
}

/// Folded level values the host reads
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelSnapshot {
    /// Average level over the backlog window, 0..1
    pub level: f64,
    /// Peak with hold and decay, 0..1
    pub peak: f64,
    /// True once a sample exceeded full scale
    pub clip: bool,
}

/// Build a tracker/receiver pair for `channels` channels.
///
/// `backlog` is the number of block measurements averaged into the level.
pub fn level_tracker(channels: usize, backlog: usize) -> (LevelTracker, LevelReceiver) {
    let mut lanes = Vec::with_capacity(channels);
    let mut receivers = Vec::with_capacity(channels);

    for _ in 0..channels {
        let ring = HeapRb::<LevelEntry>::new(RESULT_CAPACITY);
        let (producer, consumer) = ring.split();
        lanes.push(ChannelSmoother::new(backlog, producer));
        receivers.push(ReceiverLane {
            consumer,
            lookahead: None,
            current: LevelSnapshot::default(),
        });
    }

    (LevelTracker { lanes }, LevelReceiver { lanes: receivers })
}

struct ChannelSmoother {
    backlog: Vec<f64>,
    backlog_index: usize,
    level: f64,
    peak: f64,
    clip: bool,
    hold_until_ms: f64,
    producer: ringbuf::HeapProd<LevelEntry>,
}

impl ChannelSmoother {
    fn new(backlog: usize, producer: ringbuf::HeapProd<LevelEntry>) -> Self {
        Self {
            backlog: vec![0.0; backlog],
            backlog_index: 0,
            level: 0.0,
            peak: 0.0,
            clip: false,
            hold_until_ms: 0.0,
            producer,
        }
    }

    fn average_level(&self) -> f64 {
        if self.backlog.is_empty() {
            self.level
        } else {
            self.backlog.iter().sum::<f64>() / self.backlog.len() as f64
        }
    }

    fn push(&mut self, level: f64) {
        let level = level.min(1.0);
        if self.backlog.is_empty() {
            self.level = level;
        } else {
            self.backlog[self.backlog_index] = level;
            self.backlog_index = (self.backlog_index + 1) % self.backlog.len();
        }
    }

    fn add_level(&mut self, time_ms: f64, new_level: f64) {
        if new_level > 1.0 {
            self.clip = true;
        }

        let avg = self.average_level();
        if avg >= self.peak {
            self.peak = avg.min(1.0);
            self.hold_until_ms = time_ms + PEAK_HOLD_MS;
        } else if time_ms > self.hold_until_ms {
            let elapsed_s = (time_ms - self.hold_until_ms) / 1000.0;
            let decayed_db =
                gain_to_db(self.peak as f32) as f64 - (PEAK_DECAY_DB_PER_SEC * elapsed_s).clamp(0.0, 1.0);
            self.peak = db_to_gain(decayed_db as f32) as f64;
            self.clip = self.peak > 1.0;
        }

        self.push(new_level);

        let avg = self.average_level();
        if self.peak < avg {
            self.peak = avg;
        }

        let _ = self.producer.try_push(LevelEntry {
            time_ms,
            clip: self.clip,
            level: avg,
            peak: self.peak,
        });
    }
}

/// Callback-side half: measures blocks and pushes snapshots
pub struct LevelTracker {
    lanes: Vec<ChannelSmoother>,
}

impl LevelTracker {
    /// Measure an interleaved stereo block at `time_ms` on the sample clock
    pub fn process(&mut self, block: &[f32], frames: usize, time_ms: f64) {
        let channels = self.lanes.len().min(2);
        for ch in 0..channels {
            let mut magnitude = 0.0f32;
            for i in 0..frames {
                magnitude = magnitude.max(block[i * 2 + ch].abs());
            }
            self.lanes[ch].add_level(time_ms, magnitude as f64);
        }
    }
}

struct ReceiverLane {
    consumer: ringbuf::HeapCons<LevelEntry>,
    /// Entry popped early because it was still in the future
    lookahead: Option<LevelEntry>,
    current: LevelSnapshot,
}

/// Control-side half: folds pushed snapshots into readable values
pub struct LevelReceiver {
    lanes: Vec<ReceiverLane>,
}

impl LevelReceiver {
    /// Fold everything measured before `now_ms` into the current snapshot,
    /// smoothing consecutive entries toward each other.
    pub fn update(&mut self, now_ms: f64) {
        for lane in &mut self.lanes {
            loop {
                let entry = match lane.lookahead.take().or_else(|| lane.consumer.try_pop()) {
                    Some(entry) => entry,
                    None => break,
                };
                if now_ms <= entry.time_ms {
                    lane.lookahead = Some(entry);
                    break;
                }
                lane.current.level = (entry.level + lane.current.level) * 0.5;
                lane.current.peak = (entry.peak + lane.current.peak) * 0.5;
                lane.current.clip |= entry.clip;
            }
        }
    }

    pub fn level(&self, channel: usize) -> f64 {
        self.lanes
            .get(channel)
            .map(|l| l.current.level)
            .unwrap_or(0.0)
    }

    pub fn peak(&self, channel: usize) -> f64 {
        self.lanes
            .get(channel)
            .map(|l| l.current.peak)
            .unwrap_or(0.0)
    }

    pub fn is_clipping(&self, channel: usize) -> bool {
        self.lanes
            .get(channel)
            .map(|l| l.current.clip)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_flow_from_tracker_to_receiver() {
        let (mut tracker, mut receiver) = level_tracker(2, 4);

        let block: Vec<f32> = std::iter::repeat([0.5f32, 0.25f32])
            .take(64)
            .flatten()
            .collect();

        for i in 0..8 {
            tracker.process(&block, 64, i as f64 * 10.0);
        }
        receiver.update(1000.0);

        // backlog of 4 full of 0.5 measurements
        assert!(receiver.level(0) > 0.3);
        assert!(receiver.level(1) > 0.15 && receiver.level(1) < 0.3);
        assert!(receiver.peak(0) >= receiver.level(0) - 1e-9);
        assert!(!receiver.is_clipping(0));
    }

    #[test]
    fn clip_flag_latches() {
        let (mut tracker, mut receiver) = level_tracker(2, 2);

        let loud: Vec<f32> = std::iter::repeat([1.5f32, 0.0f32]).take(16).flatten().collect();
        tracker.process(&loud, 16, 0.0);
        let quiet = vec![0.0f32; 32];
        tracker.process(&quiet, 16, 10.0);

        receiver.update(100.0);
        assert!(receiver.is_clipping(0));
        assert!(!receiver.is_clipping(1));
    }

    #[test]
    fn entries_in_the_future_are_not_folded() {
        let (mut tracker, mut receiver) = level_tracker(1, 2);

        let block = vec![0.8f32; 32];
        tracker.process(&block, 16, 500.0);

        receiver.update(100.0); // before the measurement time
        assert_eq!(receiver.level(0), 0.0);

        receiver.update(1000.0);
        assert!(receiver.level(0) > 0.0);
    }
}
