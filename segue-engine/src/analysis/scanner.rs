//! Track boundary and transition-point analysis
//!
//! Two passes over a track populate the deck's timing model:
//!
//! - a **fast scan** inside the loader finds the first audible frame and the
//!   leading onset (the musically relevant entry after initial silence);
//! - a **full scan** on a background task walks the tail of the track for
//!   the last audible frame, the effective end of content, and the point
//!   where the level decays for good (the trailing fade).
//!
//! All positions are frames at the source sample rate. Scanning the same
//! file twice with the same settings yields the same boundaries.

use crate::audio::reader::{AudioReader, ReaderRegistry};
use crate::audio::types::{db_to_gain, gain_to_db};
use crate::error::ReaderError;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Everything below this is silence
const SILENCE_THRESHOLD_DB: f32 = -60.0;
/// Below this the track is considered to be fading toward its end
const FADING_THRESHOLD_DB: f32 = -23.0;

/// Sustain required for the first audible frame
const FIRST_SOUND_DURATION: f64 = 0.001;
/// Sustain required for the trailing silence
const LAST_SOUND_DURATION: f64 = 1.25;
/// Window searched for the leading onset (and the enqueue lead time)
pub const LEADING_SCAN_WINDOW: f64 = 10.0;
/// Tail region scanned for the ending
const TAIL_SCAN_WINDOW: f64 = 20.0;
/// Tracks shorter than this skip the full scan entirely
pub const MIN_SCAN_DURATION: f64 = 3.0;

const SCAN_CHUNK_FRAMES: usize = 8192;

/// Loader-side scan results (first audible frame + leading onset)
#[derive(Debug, Clone, Copy)]
pub struct FastScan {
    pub sample_rate: u32,
    pub frames_total: u64,
    pub first_audible: u64,
    pub leading: Option<u64>,
    pub leading_duration: f64,
}

impl FastScan {
    pub fn duration(&self) -> f64 {
        self.frames_total as f64 / self.sample_rate as f64
    }

    /// Outcome for a track whose full scan has not run (or never will):
    /// the whole file counts as audible.
    pub fn provisional_outcome(&self) -> ScanOutcome {
        ScanOutcome {
            fast: *self,
            last_audible: self.frames_total,
            total_frames_to_play: self.frames_total,
            trailing: None,
            trailing_duration: 0.0,
        }
    }
}

/// Complete scan results for a track
#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    pub fast: FastScan,
    pub last_audible: u64,
    pub total_frames_to_play: u64,
    pub trailing: Option<u64>,
    pub trailing_duration: f64,
}

impl ScanOutcome {
    pub fn sample_rate(&self) -> u32 {
        self.fast.sample_rate
    }

    /// Clamp boundaries into their documented ordering:
    /// `first ≤ leading ≤ trailing ≤ last ≤ total ≤ frames_total`
    pub fn normalized(mut self) -> Self {
        let frames_total = self.fast.frames_total;
        self.total_frames_to_play = self.total_frames_to_play.min(frames_total);
        self.last_audible = self.last_audible.min(self.total_frames_to_play);
        self.fast.first_audible = self.fast.first_audible.min(self.last_audible);

        if let Some(trailing) = self.trailing {
            let trailing = trailing.clamp(self.fast.first_audible, self.last_audible);
            self.trailing = Some(trailing);
            if let Some(leading) = self.fast.leading {
                self.fast.leading = Some(leading.clamp(self.fast.first_audible, trailing));
            }
        } else if let Some(leading) = self.fast.leading {
            self.fast.leading = Some(leading.clamp(self.fast.first_audible, self.last_audible));
        }

        self
    }
}

/// Find the first run of at least `min_consecutive` frames whose magnitude
/// (max across channels) lies within `[min_mag, max_mag]`, searching
/// `[start, start + num_frames)`. Returns the run's first frame.
pub fn search_for_level(
    reader: &mut dyn AudioReader,
    start: u64,
    num_frames: u64,
    min_mag: f32,
    max_mag: f32,
    min_consecutive: usize,
) -> Result<Option<u64>, ReaderError> {
    if num_frames == 0 {
        return Ok(None);
    }

    reader.seek(start)?;

    let channels = reader.channels() as usize;
    let mut planes = vec![vec![0.0f32; SCAN_CHUNK_FRAMES]; channels];
    let needed = min_consecutive.max(1);

    let end = start.saturating_add(num_frames);
    let mut pos = start;
    let mut run_start: Option<u64> = None;
    let mut run_len = 0usize;

    while pos < end {
        let want = ((end - pos) as usize).min(SCAN_CHUNK_FRAMES);
        let n = reader.read(&mut planes, want)?;
        if n == 0 {
            break;
        }

        for i in 0..n {
            let mut mag = 0.0f32;
            for plane in planes.iter().take(channels) {
                mag = mag.max(plane[i].abs());
            }

            if mag >= min_mag && mag <= max_mag {
                if run_start.is_none() {
                    run_start = Some(pos + i as u64);
                }
                run_len += 1;
                if run_len >= needed {
                    return Ok(run_start);
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }

        pos += n as u64;
    }

    Ok(None)
}

/// Per-channel peak magnitude over `[start, start + num_frames)`
pub fn read_peak_levels(
    reader: &mut dyn AudioReader,
    start: u64,
    num_frames: u64,
) -> Result<Vec<f32>, ReaderError> {
    reader.seek(start)?;

    let channels = reader.channels() as usize;
    let mut planes = vec![vec![0.0f32; SCAN_CHUNK_FRAMES]; channels];
    let mut peaks = vec![0.0f32; channels];

    let mut remaining = num_frames;
    while remaining > 0 {
        let want = (remaining as usize).min(SCAN_CHUNK_FRAMES);
        let n = reader.read(&mut planes, want)?;
        if n == 0 {
            break;
        }
        for (ch, plane) in planes.iter().enumerate().take(channels) {
            for &sample in &plane[..n] {
                peaks[ch] = peaks[ch].max(sample.abs());
            }
        }
        remaining -= n as u64;
    }

    Ok(peaks)
}

/// First audible frame plus leading onset; runs inside the loader on the
/// reader that will feed playback.
pub fn fast_scan(
    reader: &mut dyn AudioReader,
    max_transition_time: f64,
) -> Result<FastScan, ReaderError> {
    let sample_rate = reader.sample_rate();
    let sr = sample_rate as f64;
    let frames_total = reader.frames_total();

    let silence_gain = db_to_gain(SILENCE_THRESHOLD_DB);
    let mid = frames_total / 2;

    let first_audible = search_for_level(
        reader,
        0,
        mid,
        silence_gain,
        1.0,
        (sr * FIRST_SOUND_DURATION) as usize,
    )?
    .unwrap_or(0);

    let mut leading = None;
    let duration = frames_total as f64 / sr;

    if duration >= MIN_SCAN_DURATION {
        // Reference level: average per-channel peak of the opening window,
        // 6 dB down, capped below full scale.
        let window = (sr * max_transition_time.max(LEADING_SCAN_WINDOW)) as u64;
        let peaks = read_peak_levels(reader, first_audible, window)?;
        let considered = peaks.len().min(2).max(1);
        let avg_peak: f32 = peaks.iter().take(considered).sum::<f32>() / considered as f32;

        let leading_level = db_to_gain(gain_to_db(avg_peak) - 6.0).clamp(0.0, 0.9);

        leading = search_for_level(
            reader,
            first_audible,
            (sr * LEADING_SCAN_WINDOW) as u64,
            leading_level,
            1.0,
            (sr * FIRST_SOUND_DURATION / 10.0) as usize,
        )?;

        // Refine backward: the onset often builds up over the previous
        // couple of seconds at a fraction of the target level.
        if let Some(lead) = leading {
            let back = (sr * 2.0) as u64;
            let from = lead.saturating_sub(back);
            if let Some(early) =
                search_for_level(reader, from, back, leading_level * 0.33, 1.0, 0)?
            {
                if early > first_audible && early < lead {
                    leading = Some(early);
                }
            }
        }
    }

    let leading_duration = leading
        .map(|lead| (lead.saturating_sub(first_audible)) as f64 / sr)
        .unwrap_or(0.0);

    debug!(
        "fast scan: first_audible={first_audible}, leading={leading:?} ({leading_duration:.2}s)"
    );

    Ok(FastScan {
        sample_rate,
        frames_total,
        first_audible,
        leading,
        leading_duration,
    })
}

/// Offline scanner for the tail boundaries; opens its own reader so it can
/// run while the loader's reader feeds playback.
pub struct TrackScanner {
    registry: Arc<ReaderRegistry>,
}

impl TrackScanner {
    pub fn new(registry: Arc<ReaderRegistry>) -> Self {
        Self { registry }
    }

    /// Walk the track tail for last audible frame, end of content, and
    /// trailing fade start.
    pub fn full_scan(&self, path: &Path, fast: &FastScan) -> Result<ScanOutcome, ReaderError> {
        let mut reader = self.registry.open(path)?;
        let sr = reader.sample_rate() as f64;
        let frames_total = reader.frames_total();

        let silence_gain = db_to_gain(SILENCE_THRESHOLD_DB);
        let fading_gain = db_to_gain(FADING_THRESHOLD_DB);

        let mut last_audible = frames_total;
        let mut total_frames_to_play = frames_total;

        let mid = frames_total / 2;
        let tail = fast
            .first_audible
            .max(mid)
            .max(frames_total.saturating_sub((sr * TAIL_SCAN_WINDOW) as u64));

        let silence = search_for_level(
            reader.as_mut(),
            tail,
            frames_total - tail,
            0.0,
            silence_gain,
            (sr * LAST_SOUND_DURATION) as usize,
        )?
        .unwrap_or(0);

        if silence > fast.first_audible {
            last_audible = silence;
        }

        // Effective end of content: where even sub-audible residue stops
        if let Some(end) = search_for_level(
            reader.as_mut(),
            silence,
            frames_total - silence,
            0.0,
            silence_gain,
            (sr * 0.004) as usize,
        )? {
            if end > last_audible {
                total_frames_to_play = end;
            }
        }

        let trailing = search_for_level(
            reader.as_mut(),
            tail,
            total_frames_to_play.saturating_sub(tail),
            0.0,
            fading_gain,
            (sr * 0.8) as usize,
        )?;

        let trailing_duration = trailing
            .map(|t| (last_audible.saturating_sub(t)) as f64 / sr)
            .unwrap_or(0.0);

        debug!(
            "full scan: last_audible={last_audible}, total={total_frames_to_play}, \
             trailing={trailing:?} ({trailing_duration:.2}s)"
        );

        Ok(ScanOutcome {
            fast: *fast,
            last_audible,
            total_frames_to_play,
            trailing,
            trailing_duration,
        }
        .normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic reader producing a fixed mono signal
    struct SignalReader {
        samples: Vec<f32>,
        pos: usize,
        sample_rate: u32,
    }

    impl SignalReader {
        fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
            Self {
                samples,
                pos: 0,
                sample_rate,
            }
        }
    }

    impl AudioReader for SignalReader {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> u16 {
            1
        }

        fn frames_total(&self) -> u64 {
            self.samples.len() as u64
        }

        fn seek(&mut self, frame: u64) -> Result<(), ReaderError> {
            self.pos = (frame as usize).min(self.samples.len());
            Ok(())
        }

        fn read(&mut self, planes: &mut [Vec<f32>], frames: usize) -> Result<usize, ReaderError> {
            let n = frames.min(self.samples.len() - self.pos);
            planes[0][..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn tone(len: usize, amp: f32) -> impl Iterator<Item = f32> {
        (0..len).map(move |i| (i as f32 * 0.3).sin() * amp)
    }

    #[test]
    fn search_finds_run_start() {
        let sr = 1000;
        let mut samples = vec![0.0f32; 500];
        samples.extend(tone(1000, 0.8));

        let mut reader = SignalReader::new(samples, sr);
        let found = search_for_level(&mut reader, 0, 1500, 0.01, 1.0, 10)
            .unwrap()
            .unwrap();
        // sin ramps up from zero; the sustained run starts within a few samples
        assert!(found >= 500 && found < 520, "found={found}");
    }

    #[test]
    fn search_requires_sustain() {
        let sr = 1000;
        let mut samples = vec![0.0f32; 100];
        samples.extend(std::iter::repeat(0.5).take(5)); // 5-sample blip
        samples.extend(vec![0.0f32; 200]);

        let mut reader = SignalReader::new(samples, sr);
        let found = search_for_level(&mut reader, 0, 305, 0.1, 1.0, 50).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn fast_scan_finds_first_audible_after_silence() {
        let sr = 8000;
        let mut samples = vec![0.0f32; 4000]; // 0.5 s silence
        samples.extend(tone(sr as usize * 4, 0.6)); // 4 s tone

        let mut reader = SignalReader::new(samples, sr);
        let fast = fast_scan(&mut reader, 3.0).unwrap();

        assert!(fast.first_audible >= 4000 && fast.first_audible < 4040);
        if let Some(lead) = fast.leading {
            assert!(lead >= fast.first_audible);
        }
    }

    #[test]
    fn scan_is_idempotent() {
        let sr = 8000;
        let mut samples = vec![0.0f32; 2000];
        samples.extend(tone(sr as usize * 4, 0.6));

        let mut reader = SignalReader::new(samples.clone(), sr);
        let first = fast_scan(&mut reader, 3.0).unwrap();
        let mut reader = SignalReader::new(samples, sr);
        let second = fast_scan(&mut reader, 3.0).unwrap();

        assert_eq!(first.first_audible, second.first_audible);
        assert_eq!(first.leading, second.leading);
    }

    #[test]
    fn normalized_enforces_ordering() {
        let fast = FastScan {
            sample_rate: 44100,
            frames_total: 1000,
            first_audible: 100,
            leading: Some(900),
            leading_duration: 0.0,
        };
        let outcome = ScanOutcome {
            fast,
            last_audible: 800,
            total_frames_to_play: 2000, // beyond the file
            trailing: Some(700),
            trailing_duration: 0.0,
        }
        .normalized();

        assert_eq!(outcome.total_frames_to_play, 1000);
        assert!(outcome.fast.first_audible <= outcome.fast.leading.unwrap());
        assert!(outcome.fast.leading.unwrap() <= outcome.trailing.unwrap());
        assert!(outcome.trailing.unwrap() <= outcome.last_audible);
        assert!(outcome.last_audible <= outcome.total_frames_to_play);
    }
}
