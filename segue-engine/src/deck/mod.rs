//! Decks: single-track playback units
//!
//! A deck couples a reader, a read-ahead ring buffer, scan results, and a
//! gain ramp into one long-lived playback unit. Decks recycle through
//! Load → (Play) → Unload; the transition controller owns the pool and
//! drives the cycle from position events.
//!
//! The control side lives here; the real-time half is [`source::DeckSource`]
//! and the background tasks are in [`loader`].

pub(crate) mod loader;
pub(crate) mod source;

use crate::analysis::scanner::{ScanOutcome, MIN_SCAN_DURATION};
use crate::audio::reader::ReaderRegistry;
use crate::audio::ring_buffer::frame_ring;
use crate::config::EngineConfig;
use crate::engine::control::{ControlMsg, DeckEvent};
use crate::engine::transition::{derive_transition, TransitionMarks};
use crate::events::DeckInfo;
use crate::track::TrackHandle;
use loader::ProducerCmd;
use source::{DeckShared, DeckSource};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Deck lifecycle state as seen by the controller and hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckState {
    Empty,
    Loading,
    Loaded,
    Playing,
    Finished,
}

pub(crate) struct DeckControl {
    pub state: DeckState,
    pub track: Option<TrackHandle>,
    pub loading: bool,
    /// Bumped on every load/unload so a stale loader abandons its work
    pub load_generation: u64,
    pub outcome: Option<ScanOutcome>,
    pub marks: TransitionMarks,
    pub producer_tx: Option<std::sync::mpsc::Sender<ProducerCmd>>,
}

pub(crate) struct Deck {
    pub id: usize,
    pub name: Arc<str>,
    pub(crate) shared: Arc<DeckShared>,
    /// Real-time source slot; the audio callback takes this with try_lock
    pub(crate) slot: Arc<Mutex<Option<DeckSource>>>,
    pub(crate) ctl: Mutex<DeckControl>,
    pub(crate) events: UnboundedSender<ControlMsg>,
    pub(crate) registry: Arc<ReaderRegistry>,
    pub(crate) config: Arc<RwLock<EngineConfig>>,
}

impl Deck {
    pub fn new(
        id: usize,
        name: impl Into<Arc<str>>,
        events: UnboundedSender<ControlMsg>,
        registry: Arc<ReaderRegistry>,
        config: Arc<RwLock<EngineConfig>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            shared: Arc::new(DeckShared::new()),
            slot: Arc::new(Mutex::new(None)),
            ctl: Mutex::new(DeckControl {
                state: DeckState::Empty,
                track: None,
                loading: false,
                load_generation: 0,
                outcome: None,
                marks: TransitionMarks::zero(),
                producer_tx: None,
            }),
            events,
            registry,
            config,
        })
    }

    pub fn info(&self) -> DeckInfo {
        DeckInfo {
            index: self.id,
            name: Arc::clone(&self.name),
        }
    }

    /// Hand a track to the background loader. Returns false when a load is
    /// already in flight.
    pub fn load(self: &Arc<Self>, track: TrackHandle) -> bool {
        loader::spawn_load(self, track)
    }

    /// Tear the deck down to Empty, emitting `deck_unloaded` if a track was
    /// bound. Also cancels an in-flight load.
    ///
    /// Lock order is ctl then slot, same as `set_position`.
    pub fn unload(&self) {
        let unloaded = {
            let mut ctl = self.ctl.lock().unwrap();
            self.slot.lock().unwrap().take();
            ctl.load_generation += 1;
            if let Some(tx) = ctl.producer_tx.take() {
                let _ = tx.send(ProducerCmd::Quit);
            }

            let shared = &self.shared;
            shared.playing.store(false, Ordering::Release);
            shared.stopped.store(true, Ordering::Release);
            shared.fading.store(false, Ordering::Release);
            shared.finish_flag.store(false, Ordering::Release);
            shared.is_main.store(false, Ordering::Release);
            shared.volume.store(1.0);
            shared.pre_gain.store(1.0);
            shared.replay_gain.store(1.0);
            shared.source_rate.store(0, Ordering::Release);
            shared.origin_source_frame.store(0, Ordering::Release);
            shared.total_source_frames.store(0, Ordering::Release);
            shared.frames_popped.store(0, Ordering::Release);
            shared.producer_eof.store(false, Ordering::Release);

            ctl.loading = false;
            ctl.state = DeckState::Empty;
            ctl.outcome = None;
            ctl.marks = TransitionMarks::zero();
            ctl.track.take()
        };

        if let Some(track) = unloaded {
            debug!("[{}] unloaded {}", self.name, track.path().display());
            let _ = self
                .events
                .send(ControlMsg::Deck(self.id, DeckEvent::Unloaded(track)));
        }
    }

    /// Begin playback of the loaded track. Emits `deck_started`.
    pub fn start(&self) -> bool {
        let mut ctl = self.ctl.lock().unwrap();
        let Some(track) = ctl.track.clone() else {
            debug!("[{}] cannot start, nothing loaded", self.name);
            self.shared.is_main.store(false, Ordering::Release);
            return false;
        };
        if ctl.loading {
            return false;
        }

        if !self.shared.playing.load(Ordering::Acquire) {
            self.shared.finish_flag.store(false, Ordering::Release);
            self.shared.fading.store(false, Ordering::Release);
            self.shared.playing.store(true, Ordering::Release);
            self.shared.stopped.store(false, Ordering::Release);
            ctl.state = DeckState::Playing;
            info!("[{}] started", self.name);
            let _ = self
                .events
                .send(ControlMsg::Deck(self.id, DeckEvent::Started(track)));
        }
        true
    }

    /// Request stop; the audio callback ramps out and the finish flows
    /// through telemetry as `deck_finished`.
    pub fn stop(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.fading.store(false, Ordering::Release);
    }

    /// Move the transition marks to "now" so the controller fades this deck
    /// out over the configured fade-out duration.
    pub fn fade_out(&self) -> bool {
        let mut ctl = self.ctl.lock().unwrap();
        if ctl.track.is_none() {
            return false;
        }

        if !self.shared.fading.load(Ordering::Acquire) {
            let now = self.shared.position_seconds();
            let duration = ctl
                .outcome
                .map(|o| o.total_frames_to_play as f64 / o.sample_rate() as f64)
                .unwrap_or(now);
            let max_fade = self.config.read().unwrap().max_fade_out_duration;

            ctl.marks.pre_cue = ctl.marks.pre_cue.min(now);
            ctl.marks.cue = now;
            ctl.marks.start = now;
            ctl.marks.end = (now + max_fade).min(duration.max(now));
            self.shared.fading.store(true, Ordering::Release);
            info!(
                "[{}] fading out: {:.2}s -> {:.2}s",
                self.name, ctl.marks.start, ctl.marks.end
            );
        }
        true
    }

    /// Jump to `seconds` on the track timeline. The ring is rebuilt, the
    /// reader seeks on the producer task, and the gain ramp carries over.
    pub fn set_position(&self, seconds: f64) -> bool {
        let ctl = self.ctl.lock().unwrap();
        let Some(tx) = ctl.producer_tx.as_ref() else {
            return false;
        };
        let Some(outcome) = ctl.outcome else {
            return false;
        };

        let sr = outcome.sample_rate() as f64;
        let duration = outcome.total_frames_to_play as f64 / sr;
        let seconds = seconds.clamp(0.0, duration);
        let target = ((seconds * sr) as u64).min(outcome.total_frames_to_play);

        let out_rate = self.shared.output_rate.load(Ordering::Acquire).max(1);
        let capacity =
            (self.config.read().unwrap().read_ahead_seconds * out_rate as f64) as usize;
        let (producer, consumer) = frame_ring(capacity);

        let mut slot = self.slot.lock().unwrap();
        let last_gain = slot
            .take()
            .map(|s| s.last_gain())
            .unwrap_or_else(|| self.shared.target_gain());

        self.shared.frames_popped.store(0, Ordering::Release);
        self.shared
            .origin_source_frame
            .store(target, Ordering::Release);
        self.shared.producer_eof.store(false, Ordering::Release);

        let _ = tx.send(ProducerCmd::Seek {
            source_frame: target,
            producer,
        });

        *slot = Some(DeckSource::new(
            consumer,
            Arc::clone(&self.shared),
            last_gain,
        ));

        debug!("[{}] position set to {:.2}s", self.name, seconds);
        true
    }

    /// Apply the full-scan outcome and rederive the transition marks
    pub fn apply_scan(&self, outcome: ScanOutcome) {
        let mut ctl = self.ctl.lock().unwrap();
        let outcome = outcome.normalized();
        self.shared
            .total_source_frames
            .store(outcome.total_frames_to_play, Ordering::Release);
        ctl.outcome = Some(outcome);
        ctl.marks = self.marks_for(&outcome);
        debug!(
            "[{}] transition: cue={:.3}s start={:.3}s end={:.3}s",
            self.name, ctl.marks.cue, ctl.marks.start, ctl.marks.end
        );
    }

    /// Rederive marks after a configuration change
    pub fn recalculate_transition(&self) {
        let mut ctl = self.ctl.lock().unwrap();
        if self.shared.fading.load(Ordering::Acquire) {
            return;
        }
        if let Some(outcome) = ctl.outcome {
            ctl.marks = self.marks_for(&outcome);
        }
    }

    pub(crate) fn marks_for(&self, outcome: &ScanOutcome) -> TransitionMarks {
        let duration = outcome.total_frames_to_play as f64 / outcome.sample_rate() as f64;
        if duration < MIN_SCAN_DURATION {
            TransitionMarks::collapsed(duration)
        } else {
            derive_transition(outcome, self.config.read().unwrap().max_transition_time)
        }
    }

    // --- accessors used by the controller ---

    pub fn state(&self) -> DeckState {
        self.ctl.lock().unwrap().state
    }

    pub fn is_loaded(&self) -> bool {
        self.ctl.lock().unwrap().track.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.ctl.lock().unwrap().loading
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn is_fading(&self) -> bool {
        self.shared.fading.load(Ordering::Acquire)
    }

    pub fn current_track(&self) -> Option<TrackHandle> {
        self.ctl.lock().unwrap().track.clone()
    }

    pub fn mark_finished(&self) {
        let mut ctl = self.ctl.lock().unwrap();
        if ctl.track.is_some() {
            ctl.state = DeckState::Finished;
        }
    }

    pub fn transition_marks(&self) -> TransitionMarks {
        self.ctl.lock().unwrap().marks
    }

    pub fn position_seconds(&self) -> f64 {
        self.shared.position_seconds()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.ctl
            .lock()
            .unwrap()
            .outcome
            .map(|o| o.total_frames_to_play as f64 / o.sample_rate() as f64)
            .unwrap_or(0.0)
    }

    pub fn first_audible_seconds(&self) -> f64 {
        self.ctl
            .lock()
            .unwrap()
            .outcome
            .map(|o| o.fast.first_audible as f64 / o.sample_rate() as f64)
            .unwrap_or(0.0)
    }

    pub fn leading_duration(&self) -> f64 {
        self.ctl
            .lock()
            .unwrap()
            .outcome
            .map(|o| o.fast.leading_duration)
            .unwrap_or(0.0)
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume.load()
    }

    pub fn set_main(&self, main: bool) {
        self.shared.is_main.store(main, Ordering::Release);
    }

    pub fn is_main(&self) -> bool {
        self.shared.is_main.load(Ordering::Acquire)
    }
}
