//! Shared fixtures for the integration tests: synthesized WAV tracks, an
//! event-recording listener, and a pump driver that renders faster than
//! real time while keeping the control timers honest.

use segue_engine::{AudioPump, DeckInfo, EngineListener, OutputSpec, PreQueueDone, TrackHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 44100;

/// Building blocks for synthesized test tracks
#[allow(dead_code)]
pub enum Segment {
    Silence(f64),
    /// seconds, amplitude, frequency
    Tone(f64, f32, f32),
    /// seconds, amplitude from, amplitude to, frequency
    Fade(f64, f32, f32, f32),
}

/// Write a stereo 16-bit WAV assembled from the given segments
pub fn write_wav(path: &Path, segments: &[Segment]) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut phase = 0.0f64;

    for segment in segments {
        match segment {
            Segment::Silence(secs) => {
                for _ in 0..(secs * SAMPLE_RATE as f64) as usize {
                    writer.write_sample(0i16).unwrap();
                    writer.write_sample(0i16).unwrap();
                }
            }
            Segment::Tone(secs, amp, freq) => {
                write_tone(&mut writer, &mut phase, *secs, |_| *amp, *freq);
            }
            Segment::Fade(secs, from, to, freq) => {
                let (from, to) = (*from, *to);
                write_tone(
                    &mut writer,
                    &mut phase,
                    *secs,
                    move |progress| from + (to - from) * progress,
                    *freq,
                );
            }
        }
    }
    writer.finalize().unwrap();
}

fn write_tone<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    phase: &mut f64,
    secs: f64,
    envelope: impl Fn(f32) -> f32,
    freq: f32,
) {
    let frames = (secs * SAMPLE_RATE as f64) as usize;
    let step = 2.0 * std::f64::consts::PI * freq as f64 / SAMPLE_RATE as f64;
    for i in 0..frames {
        let amp = envelope(i as f32 / frames as f32);
        let sample = (phase.sin() as f32 * amp * i16::MAX as f32) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
        *phase += step;
    }
}

/// A track with a clear trailing tail: loud body, then a quiet sustained
/// tail (below the fading threshold, above silence), then real silence.
pub fn track_with_tail(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    write_wav(
        &path,
        &[
            Segment::Silence(0.1),
            Segment::Tone(2.4, 0.5, 440.0),
            Segment::Tone(2.5, 0.05, 440.0),
            Segment::Silence(1.5),
        ],
    );
    path
}

/// Records every listener event as a string, in delivery order
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    pre_queue_calls: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn pre_queue_calls(&self) -> usize {
        self.pre_queue_calls.load(Ordering::SeqCst)
    }

    /// Index of the first event containing `needle`
    pub fn index_of(&self, needle: &str) -> Option<usize> {
        self.events().iter().position(|e| e.contains(needle))
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.index_of(needle).is_some()
    }
}

fn label(track: &TrackHandle) -> String {
    track
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl EngineListener for Recorder {
    fn deck_loaded(&self, deck: &DeckInfo, track: &TrackHandle) {
        self.push(format!("loaded:{}:{}", deck.name, label(track)));
    }

    fn deck_started(&self, deck: &DeckInfo, track: &TrackHandle) {
        self.push(format!("started:{}:{}", deck.name, label(track)));
    }

    fn deck_finished(&self, deck: &DeckInfo, track: &TrackHandle) {
        self.push(format!("finished:{}:{}", deck.name, label(track)));
    }

    fn deck_unloaded(&self, deck: &DeckInfo, track: &TrackHandle) {
        self.push(format!("unloaded:{}:{}", deck.name, label(track)));
    }

    fn deck_track_scanned(&self, deck: &DeckInfo) {
        self.push(format!("scanned:{}", deck.name));
    }

    fn main_deck_changed(&self, _deck: &DeckInfo, track: &TrackHandle) {
        self.push(format!("main:{}", label(track)));
    }

    fn pre_queue_next(&self, done: PreQueueDone) {
        self.pre_queue_calls.fetch_add(1, Ordering::SeqCst);
        done.done(false);
    }
}

/// Drives the pump from a plain thread at `speed` × real time
pub struct PumpDriver {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PumpDriver {
    pub fn start(mut pump: AudioPump, speed: f64) -> Self {
        const BLOCK: usize = 2048;

        pump.prepare(OutputSpec {
            sample_rate: SAMPLE_RATE,
            block_size: BLOCK,
            channels: 2,
        });

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut block = vec![0.0f32; BLOCK * 2];
            let pace = Duration::from_secs_f64(BLOCK as f64 / SAMPLE_RATE as f64 / speed);
            while !stop_flag.load(Ordering::Acquire) {
                pump.pull(&mut block);
                std::thread::sleep(pace);
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for PumpDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
