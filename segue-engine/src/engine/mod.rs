//! The playout engine
//!
//! [`Engine`] owns the deck pool, consumes the host's queue, and renders a
//! continuous stereo stream through the pump a sink drives. Construction
//! wires the decks, mixer and post-processor together and spawns the
//! control and telemetry tasks, so it must happen inside a tokio runtime.

pub(crate) mod control;
pub(crate) mod telemetry;
pub mod transition;

use crate::audio::reader::{ReaderFactory, ReaderRegistry};
use crate::config::EngineConfig;
use crate::deck::{Deck, DeckState};
use crate::dsp::karaoke::{KaraokeParam, KaraokeParams};
use crate::engine::control::{
    control_loop, load_next_track, run_after, AfterControl, ControlMsg, ControllerState,
};
use crate::engine::transition::TransitionState;
use crate::error::Result;
use crate::events::{DeckInfo, EngineListener, ListenerId, ListenerRegistry};
use crate::mixer::{Mixer, MixerHandle};
use crate::output::AudioPump;
use crate::queue::TrackQueue;
use crate::track::TrackHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

/// Host-facing snapshot of one deck
#[derive(Debug, Clone)]
pub struct DeckSnapshot {
    pub info: DeckInfo,
    pub state: DeckState,
    pub track: Option<TrackHandle>,
    pub position: f64,
    pub duration: f64,
    pub volume: f32,
    pub is_main: bool,
}

pub(crate) struct EngineInner {
    pub config: Arc<RwLock<EngineConfig>>,
    pub decks: Vec<Arc<Deck>>,
    pub queue: Arc<dyn TrackQueue>,
    pub listeners: ListenerRegistry,
    pub control_tx: tokio::sync::mpsc::UnboundedSender<ControlMsg>,
    pub mixer: MixerHandle,
    pub controller: Mutex<ControllerState>,
    pub closed: AtomicBool,
    pub registry: Arc<ReaderRegistry>,
    pump_slot: Mutex<Option<AudioPump>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Automatic DJ playout engine
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine over a host-owned queue.
    ///
    /// Must be called within a tokio runtime; the engine spawns its control
    /// and telemetry tasks on it.
    pub fn new(config: EngineConfig, queue: Arc<dyn TrackQueue>) -> Result<Self> {
        config.validate()?;

        let (control_tx, control_rx) = tokio::sync::mpsc::unbounded_channel();
        let registry = Arc::new(ReaderRegistry::with_defaults());
        let karaoke = KaraokeParams::from_config(&config.karaoke);
        let deck_count = config.deck_count;
        let config = Arc::new(RwLock::new(config));

        let decks: Vec<Arc<Deck>> = (0..deck_count)
            .map(|i| {
                let name = format!("Deck {}", char::from(b'A' + (i % 26) as u8));
                Deck::new(
                    i,
                    name,
                    control_tx.clone(),
                    Arc::clone(&registry),
                    Arc::clone(&config),
                )
            })
            .collect();

        let slots = decks.iter().map(|d| Arc::clone(&d.slot)).collect();
        let shareds = decks.iter().map(|d| Arc::clone(&d.shared)).collect();
        let (mixer, mixer_handle) = Mixer::new(slots, shareds, karaoke, control_tx.clone());

        let inner = Arc::new(EngineInner {
            config,
            decks,
            queue,
            listeners: ListenerRegistry::new(),
            control_tx,
            mixer: mixer_handle,
            controller: Mutex::new(ControllerState::new()),
            closed: AtomicBool::new(false),
            registry,
            pump_slot: Mutex::new(Some(AudioPump::new(mixer))),
            tasks: Mutex::new(Vec::new()),
        });

        let control = tokio::spawn(control_loop(Arc::clone(&inner), control_rx));
        let telemetry = tokio::spawn(telemetry::telemetry_loop(Arc::clone(&inner)));
        *inner.tasks.lock().unwrap() = vec![control, telemetry];

        info!("engine created with {} decks", inner.decks.len());
        Ok(Self { inner })
    }

    /// Take the pull side of the audio path. Yields `Some` exactly once;
    /// hand it to a sink (`CpalOutput::start`, `NullOutput::start`) or
    /// drive it directly.
    pub fn take_output(&self) -> Option<AudioPump> {
        self.inner.pump_slot.lock().unwrap().take()
    }

    /// Register additional reader formats, tried before the built-ins
    pub fn register_reader_factory(&self, factory: Arc<dyn ReaderFactory>) {
        self.inner.registry.register(factory);
    }

    // --- listeners ---

    pub fn add_listener(&self, listener: Arc<dyn EngineListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    // --- playback control ---

    /// Start playout: if nothing is sounding, load the next queued track
    /// onto a deck and play it. Also unpauses the mixer.
    pub fn play(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut after = AfterControl::default();
        {
            let mut ctl = self.inner.controller.lock().unwrap();
            ctl.keep_playing = true;

            let busy = ctl.pending_load.is_some() || ctl.waiting_pre_queue.is_some();
            let any_playing = self.inner.decks.iter().any(|d| d.is_playing());
            if !any_playing && !busy {
                load_next_track(&self.inner, &mut ctl, None, true, &mut after);
            }
        }

        self.inner.mixer.paused.store(false, Ordering::Release);
        run_after(&self.inner, after);
        true
    }

    /// Stop and unload every deck; playout will not continue on its own
    pub fn stop(&self) {
        if self.is_closed() {
            return;
        }

        {
            let mut ctl = self.inner.controller.lock().unwrap();
            ctl.keep_playing = false;
            ctl.transition = TransitionState::Idle;
            ctl.transiting_deck = None;
            ctl.cued_deck = None;
            ctl.pending_load = None;
            ctl.waiting_pre_queue = None;
            ctl.force_fading = 0;
        }

        for deck in &self.inner.decks {
            deck.stop();
            deck.unload();
        }
    }

    /// Fade the main deck out over the configured fade-out duration.
    /// Calling it again while the next track is cued but not yet started
    /// skips that cue entirely.
    pub fn fade_out_main(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let main_id;
        let skip_cued;
        {
            let mut ctl = self.inner.controller.lock().unwrap();
            let Some(&front) = ctl.deck_queue.front() else {
                return false;
            };
            main_id = front;
            ctl.force_fading += 1;

            skip_cued = if ctl.force_fading >= 2
                && matches!(
                    ctl.transition,
                    TransitionState::CueLoading | TransitionState::Cued
                ) {
                let target = ctl
                    .cued_deck
                    .take()
                    .or_else(|| ctl.pending_load.take().map(|p| p.deck));
                ctl.transition = TransitionState::Idle;
                ctl.transiting_deck = None;
                target
            } else {
                None
            };
        }

        if let Some(cued) = skip_cued {
            info!("skipping cued transition on {}", self.inner.decks[cued].name);
            self.inner.decks[cued].unload();
        }

        let faded = self.inner.decks[main_id].fade_out();
        self.inner.mixer.paused.store(false, Ordering::Release);
        faded
    }

    /// Seek the main deck. An in-flight transition is cancelled and the
    /// jump is treated as a user operation on the main deck.
    pub fn set_position(&self, seconds: f64) -> bool {
        if self.is_closed() {
            return false;
        }

        let main_id;
        {
            let mut ctl = self.inner.controller.lock().unwrap();
            let Some(&front) = ctl.deck_queue.front() else {
                return false;
            };
            main_id = front;

            if ctl.transition != TransitionState::Idle {
                // cancel; an already-cued deck stays loaded for reuse
                ctl.transition = TransitionState::Idle;
                ctl.pending_load = None;
                ctl.transiting_deck = None;
            }
        }

        self.inner.decks[main_id].set_position(seconds)
    }

    pub fn position(&self) -> f64 {
        self.main_deck_ref()
            .map(|d| d.position_seconds())
            .unwrap_or(0.0)
    }

    pub fn duration(&self) -> f64 {
        self.main_deck_ref()
            .map(|d| d.duration_seconds())
            .unwrap_or(0.0)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.decks.iter().any(|d| d.is_playing())
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.mixer.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.mixer.paused.load(Ordering::Acquire)
    }

    pub fn toggle_pause(&self) -> bool {
        let paused = !self.is_paused();
        self.set_paused(paused);
        paused
    }

    // --- deck inspection ---

    pub fn deck_count(&self) -> usize {
        self.inner.decks.len()
    }

    pub fn deck_snapshot(&self, index: usize) -> Option<DeckSnapshot> {
        let deck = self.inner.decks.get(index)?;
        Some(DeckSnapshot {
            info: deck.info(),
            state: deck.state(),
            track: deck.current_track(),
            position: deck.position_seconds(),
            duration: deck.duration_seconds(),
            volume: deck.volume(),
            is_main: deck.is_main(),
        })
    }

    pub fn main_deck(&self) -> Option<DeckInfo> {
        self.main_deck_ref().map(|d| d.info())
    }

    fn main_deck_ref(&self) -> Option<&Arc<Deck>> {
        let ctl = self.inner.controller.lock().unwrap();
        let front = ctl.deck_queue.front().copied()?;
        self.inner.decks.get(front)
    }

    // --- volume, karaoke, telemetry ---

    pub fn set_volume(&self, volume: f32) {
        self.inner.mixer.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.inner.mixer.volume.load()
    }

    pub fn is_karaoke_enabled(&self) -> bool {
        self.inner.mixer.karaoke.is_enabled()
    }

    pub fn set_karaoke_enabled(&self, enabled: bool, immediate: bool) -> bool {
        self.inner.mixer.karaoke.set_enabled(enabled, immediate)
    }

    pub fn karaoke_param(&self, param: KaraokeParam) -> f32 {
        self.inner.mixer.karaoke.get(param)
    }

    pub fn set_karaoke_param(&self, param: KaraokeParam, value: f32) -> f32 {
        self.inner.mixer.karaoke.set(param, value)
    }

    /// Average output level of a channel, 0..1
    pub fn level(&self, channel: usize) -> f64 {
        self.inner.mixer.levels.lock().unwrap().level(channel)
    }

    /// Peak output level with hold, 0..1
    pub fn peak_level(&self, channel: usize) -> f64 {
        self.inner.mixer.levels.lock().unwrap().peak(channel)
    }

    pub fn is_clipping(&self, channel: usize) -> bool {
        self.inner.mixer.levels.lock().unwrap().is_clipping(channel)
    }

    /// Current limiter gain reduction in dB (≤ 0)
    pub fn reduction(&self) -> f32 {
        self.inner.mixer.reduction.load()
    }

    // --- configuration ---

    pub fn fading_curve(&self) -> f64 {
        self.inner.config.read().unwrap().fading_curve
    }

    pub fn set_fading_curve(&self, curve: f64) {
        self.inner.config.write().unwrap().fading_curve = curve.clamp(0.0, 100.0);
    }

    pub fn max_transition_time(&self) -> f64 {
        self.inner.config.read().unwrap().max_transition_time
    }

    /// Change the transition ceiling and rederive every deck's marks
    pub fn set_max_transition_time(&self, seconds: f64) {
        self.inner.config.write().unwrap().max_transition_time = seconds.max(0.0);
        for deck in &self.inner.decks {
            deck.recalculate_transition();
        }
    }

    pub fn max_fade_out_duration(&self) -> f64 {
        self.inner.config.read().unwrap().max_fade_out_duration
    }

    pub fn set_max_fade_out_duration(&self, seconds: f64) {
        self.inner.config.write().unwrap().max_fade_out_duration = seconds.max(0.0);
    }

    pub fn min_leading_to_fade(&self) -> f64 {
        self.inner.config.read().unwrap().min_leading_to_fade
    }

    pub fn set_min_leading_to_fade(&self, seconds: f64) {
        self.inner.config.write().unwrap().min_leading_to_fade = seconds.max(0.0);
    }

    pub fn replay_gain_boost(&self) -> f32 {
        self.inner.config.read().unwrap().replay_gain_boost
    }

    /// Applies to tracks loaded after the change
    pub fn set_replay_gain_boost(&self, db: f32) {
        self.inner.config.write().unwrap().replay_gain_boost = db;
    }

    // --- lifecycle ---

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop all tasks and abandon outstanding loader/scanner work.
    /// Every later operation is a no-op returning false.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("engine shutting down");

        let _ = self.inner.control_tx.send(ControlMsg::Shutdown);

        for deck in &self.inner.decks {
            deck.stop();
            deck.unload();
        }

        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
