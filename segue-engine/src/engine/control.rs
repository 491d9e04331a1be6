//! Transition controller
//!
//! A single control task consumes messages from deck tasks, the telemetry
//! timer, and the audio path, and drives the transition state machine from
//! the main deck's position. Host-visible operations run on the caller's
//! thread, serialized against the same controller state; listener events
//! are always delivered after the state lock is released.

use crate::deck::Deck;
use crate::engine::transition::{fade_in_gain, fade_out_gain, TransitionState};
use crate::engine::EngineInner;
use crate::events::PreQueueDone;
use crate::queue::TrackQueue;
use crate::track::TrackHandle;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Events a deck reports to the controller
pub(crate) enum DeckEvent {
    Loaded(TrackHandle),
    /// The loader gave up on a track; no listener event is emitted
    LoadFailed,
    Started(TrackHandle),
    Finished(TrackHandle),
    Unloaded(TrackHandle),
    Scanning,
    Scanned,
    Position(f64),
}

/// Messages into the control task
pub(crate) enum ControlMsg {
    Deck(usize, DeckEvent),
    PreQueueDone { generation: u64, ok: bool },
    DeviceChanged,
    Shutdown,
}

/// A load the controller is waiting on
#[derive(Clone, Copy)]
pub(crate) struct PendingLoad {
    pub deck: usize,
    pub play_after: bool,
    /// The main deck a transition is running away from, when this load is
    /// part of a transition
    pub from_deck: Option<usize>,
}

pub(crate) struct ControllerState {
    pub transition: TransitionState,
    /// The outgoing (main) deck of the transition in flight
    pub transiting_deck: Option<usize>,
    /// The deck holding the upcoming track once its load succeeded
    pub cued_deck: Option<usize>,
    pub pending_load: Option<PendingLoad>,
    /// Load attempt parked until the host answers `pre_queue_next`
    pub waiting_pre_queue: Option<PendingLoad>,
    pub pre_queue_generation: u64,
    pub force_fading: u32,
    pub keep_playing: bool,
    /// Loaded decks in load order; the front is the main deck
    pub deck_queue: VecDeque<usize>,
    pub last_main: Option<usize>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            transition: TransitionState::Idle,
            transiting_deck: None,
            cued_deck: None,
            pending_load: None,
            waiting_pre_queue: None,
            pre_queue_generation: 0,
            force_fading: 0,
            keep_playing: false,
            deck_queue: VecDeque::new(),
            last_main: None,
        }
    }
}

/// Deferred work to run after the controller lock is dropped
#[derive(Default)]
pub(crate) struct AfterControl {
    pub emit_pre_queue: Option<u64>,
    pub start_deck: Option<usize>,
    pub main_changed: Option<(usize, TrackHandle)>,
}

pub(crate) async fn control_loop(inner: Arc<EngineInner>, mut rx: UnboundedReceiver<ControlMsg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ControlMsg::Shutdown => break,
            ControlMsg::DeviceChanged => {
                inner.listeners.emit(|l| l.audio_device_changed());
            }
            ControlMsg::PreQueueDone { generation, ok } => {
                handle_pre_queue_done(&inner, generation, ok);
            }
            ControlMsg::Deck(deck_id, event) => {
                handle_deck_event(&inner, deck_id, event);
            }
        }
    }
    debug!("control task finished");
}

fn handle_deck_event(inner: &Arc<EngineInner>, deck_id: usize, event: DeckEvent) {
    let deck = Arc::clone(&inner.decks[deck_id]);
    match event {
        DeckEvent::Loaded(track) => handle_loaded(inner, &deck, track),
        DeckEvent::LoadFailed => handle_load_failed(inner, deck_id),
        DeckEvent::Started(track) => {
            inner.listeners.emit(|l| l.deck_started(&deck.info(), &track));
        }
        DeckEvent::Finished(track) => {
            // a stop+unload may have raced the finish flag; only report a
            // finish for the track the deck still holds
            if deck.current_track().map(|t| t.id) == Some(track.id) {
                inner.listeners.emit(|l| l.deck_finished(&deck.info(), &track));
                deck.unload();
            }
        }
        DeckEvent::Unloaded(track) => handle_unloaded(inner, &deck, track),
        DeckEvent::Scanning => {
            inner.listeners.emit(|l| l.deck_track_scanning(&deck.info()));
        }
        DeckEvent::Scanned => {
            inner.listeners.emit(|l| l.deck_track_scanned(&deck.info()));
        }
        DeckEvent::Position(position) => handle_position(inner, &deck, position),
    }
}

fn handle_loaded(inner: &Arc<EngineInner>, deck: &Arc<Deck>, track: TrackHandle) {
    let mut after = AfterControl::default();
    {
        let mut ctl = inner.controller.lock().unwrap();

        if !ctl.deck_queue.contains(&deck.id) {
            ctl.deck_queue.push_back(deck.id);
        }
        after.main_changed = refresh_main(inner, &mut ctl);

        if ctl.pending_load.map(|p| p.deck) == Some(deck.id) {
            let pending = ctl.pending_load.take().unwrap();
            if let Some(from) = pending.from_deck {
                ctl.transition = TransitionState::Cued;
                ctl.transiting_deck = Some(from);
                ctl.cued_deck = Some(deck.id);
                debug!("[{}] cued for transition", deck.name);
            }
            if pending.play_after {
                after.start_deck = Some(deck.id);
            }
        } else if ctl.cued_deck.is_none() && ctl.deck_queue.front() != Some(&deck.id) {
            // a load whose transition was cancelled mid-flight (seek);
            // remember the deck so the next cue point can reuse it
            ctl.cued_deck = Some(deck.id);
        }
    }

    inner.listeners.emit(|l| l.deck_loaded(&deck.info(), &track));
    run_after(inner, after);
}

fn handle_load_failed(inner: &Arc<EngineInner>, deck_id: usize) {
    let mut after = AfterControl::default();
    {
        let mut ctl = inner.controller.lock().unwrap();
        if ctl.pending_load.map(|p| p.deck) != Some(deck_id) {
            return;
        }
        let pending = ctl.pending_load.take().unwrap();
        if pending.from_deck.is_some() {
            ctl.transiting_deck = None;
        }
        // move on to the next queued track, or ask the host for more
        attempt_queue_load(inner, &mut ctl, pending, &mut after);
    }
    run_after(inner, after);
}

fn handle_unloaded(inner: &Arc<EngineInner>, deck: &Arc<Deck>, track: TrackHandle) {
    let mut after = AfterControl::default();
    {
        let mut ctl = inner.controller.lock().unwrap();

        if Some(deck.id) == ctl.transiting_deck && ctl.transition == TransitionState::Cued {
            // the outgoing deck stopped before the overlap window; start
            // the cued deck right away
            if let Some(next_id) = ctl.cued_deck {
                if inner.decks[next_id].is_loaded() {
                    debug!(
                        "[{}] stopped before transition, starting {}",
                        deck.name, inner.decks[next_id].name
                    );
                    after.start_deck = Some(next_id);
                }
            }
        }

        ctl.transition = TransitionState::Idle;
        ctl.transiting_deck = None;
        if ctl.cued_deck == Some(deck.id) {
            ctl.cued_deck = None;
        }
        if ctl.force_fading > 0 {
            ctl.force_fading -= 1;
        }

        ctl.deck_queue.retain(|&d| d != deck.id);
        after.main_changed = refresh_main(inner, &mut ctl);

        // keep the music going if nothing is sounding anymore
        let any_playing = inner.decks.iter().any(|d| d.is_playing());
        if ctl.keep_playing && !any_playing && after.start_deck.is_none() {
            let should_continue = !inner.queue.is_empty();
            ctl.keep_playing = should_continue;
            if should_continue {
                load_next_track(inner, &mut ctl, None, true, &mut after);
            } else {
                info!("queue exhausted, going idle");
            }
        }
    }

    inner.listeners.emit(|l| l.deck_unloaded(&deck.info(), &track));
    run_after(inner, after);
}

fn handle_position(inner: &Arc<EngineInner>, deck: &Arc<Deck>, position: f64) {
    // only decks whose `deck_loaded` has been delivered may report
    // positions, keeping per-deck event order intact
    let known = {
        let ctl = inner.controller.lock().unwrap();
        ctl.deck_queue.contains(&deck.id)
    };
    if !known {
        return;
    }

    inner
        .listeners
        .emit(|l| l.deck_position(&deck.info(), position));

    let mut after = AfterControl::default();
    {
        let mut ctl = inner.controller.lock().unwrap();

        if !deck.is_main() {
            // repair: the front of the deck queue must carry the main flag
            if ctl.deck_queue.front() == Some(&deck.id) {
                deck.set_main(true);
            }
            return;
        }

        let Some(next_id) = transition_target(inner, &ctl, deck.id) else {
            return;
        };
        let next = Arc::clone(&inner.decks[next_id]);

        let marks = deck.transition_marks();
        let leading = next.leading_duration();
        let (fading_factor, min_leading) = {
            let config = inner.config.read().unwrap();
            (config.fading_factor(), config.min_leading_to_fade)
        };

        if ctl.transition < TransitionState::Cued {
            if ctl.transition == TransitionState::Idle && position > marks.pre_cue {
                // the host hears about the upcoming need before the
                // controller moves on to actually loading
                ctl.transition = TransitionState::Cueing;
                ctl.pre_queue_generation += 1;
                after.emit_pre_queue = Some(ctl.pre_queue_generation);
            } else if ctl.transition < TransitionState::CueLoading && position > marks.cue {
                ctl.transition = TransitionState::CueLoading;
                load_next_track(inner, &mut ctl, Some(deck.id), false, &mut after);
            }
        }

        if position > marks.start - leading {
            if ctl.transition == TransitionState::Cued && next.is_loaded() {
                info!("[{}] transiting to {}", deck.name, next.name);
                ctl.transition = TransitionState::Transit;
                next.set_volume(1.0);

                if ctl.force_fading > 0 && leading >= min_leading {
                    // skip most of the leading so the fade lands sooner
                    next.set_position(next.first_audible_seconds() + leading - min_leading);
                }

                next.start();
            }

            if ctl.transition == TransitionState::Transit && leading >= min_leading {
                let progress =
                    ((position - (marks.start - leading)) / leading).clamp(0.25, 1.0);
                next.set_volume(fade_in_gain(progress, fading_factor));
            }
        }

        if position >= marks.start {
            let duration = marks.end - marks.start;
            if duration > 0.0 {
                let progress = ((position - marks.start) / duration).clamp(0.0, 1.0);
                deck.set_volume(fade_out_gain(progress, fading_factor));

                if ctl.transition != TransitionState::Idle
                    && position > marks.end
                    && progress >= 1.0
                {
                    ctl.force_fading = 0;
                    deck.stop();
                }
            } else if ctl.transition != TransitionState::Idle && position > marks.end {
                // zero-length overlap: hard cut at the end marker
                deck.stop();
            }
        }
    }
    run_after(inner, after);
}

fn handle_pre_queue_done(inner: &Arc<EngineInner>, generation: u64, ok: bool) {
    let mut after = AfterControl::default();
    {
        let mut ctl = inner.controller.lock().unwrap();
        if generation != ctl.pre_queue_generation {
            return; // a stale token
        }
        let Some(pending) = ctl.waiting_pre_queue.take() else {
            return; // advisory nudge, nothing was waiting on it
        };

        if ok && !inner.queue.is_empty() {
            attempt_queue_load(inner, &mut ctl, pending, &mut after);
        } else {
            debug!("host had nothing to enqueue");
            if pending.from_deck.is_some() {
                if ctl.transition == TransitionState::CueLoading {
                    // no track to transit to; retry from the next position tick
                    ctl.transition = TransitionState::Cueing;
                }
            } else {
                // a play() attempt that found nothing
                ctl.keep_playing = false;
            }
        }
    }
    run_after(inner, after);
}

/// Pick the deck a transition away from `from` should land on
fn transition_target(
    inner: &Arc<EngineInner>,
    ctl: &ControllerState,
    from: usize,
) -> Option<usize> {
    if let Some(pending) = &ctl.pending_load {
        if pending.from_deck == Some(from) {
            return Some(pending.deck);
        }
    }
    if let Some(cued) = ctl.cued_deck {
        if cued != from {
            return Some(cued);
        }
    }
    next_deck_index(inner, Some(from))
}

/// Round-robin pick of an idle deck; falls back to the first non-playing
/// deck after `from`.
fn next_deck_index(inner: &Arc<EngineInner>, from: Option<usize>) -> Option<usize> {
    let decks = &inner.decks;
    let count = decks.len();

    let start = match from {
        Some(from) => from + 1,
        None => 0,
    };

    for k in 0..count {
        let idx = (start + k) % count;
        if Some(idx) == from {
            continue;
        }
        if !decks[idx].is_loaded() && !decks[idx].is_loading() {
            return Some(idx);
        }
    }

    // all other decks are occupied; reuse the first one that is not sounding
    for k in 0..count {
        let idx = (start + k) % count;
        if Some(idx) == from {
            continue;
        }
        if !decks[idx].is_playing() {
            return Some(idx);
        }
    }

    None
}

/// Begin loading the next queued track onto a deck picked relative to
/// `from`. Falls through to `pre_queue_next` when the queue is empty.
pub(crate) fn load_next_track(
    inner: &Arc<EngineInner>,
    ctl: &mut ControllerState,
    from: Option<usize>,
    play_after: bool,
    after: &mut AfterControl,
) {
    // a deck cued earlier (e.g. before a seek cancelled the transition)
    // is still ready; reuse it instead of loading again
    if let (Some(cued), Some(from_deck)) = (ctl.cued_deck, from) {
        if cued != from_deck && inner.decks[cued].is_loaded() {
            ctl.transition = TransitionState::Cued;
            ctl.transiting_deck = Some(from_deck);
            return;
        }
    }

    let Some(next_id) = next_deck_index(inner, from) else {
        warn!("no deck available for the next track");
        if from.is_some() {
            ctl.transition = TransitionState::Cueing;
        }
        return;
    };

    let next = &inner.decks[next_id];
    if next.is_loading() || next.is_loaded() {
        next.unload();
    }

    attempt_queue_load(
        inner,
        ctl,
        PendingLoad {
            deck: next_id,
            play_after,
            from_deck: from,
        },
        after,
    );
}

/// Pop the queue and load, or park the attempt on a `pre_queue_next` ask
fn attempt_queue_load(
    inner: &Arc<EngineInner>,
    ctl: &mut ControllerState,
    pending: PendingLoad,
    after: &mut AfterControl,
) {
    if let Some(track) = inner.queue.fetch_next() {
        ctl.pending_load = Some(pending);
        let deck = &inner.decks[pending.deck];
        if !deck.load(track) {
            ctl.pending_load = None;
            if pending.from_deck.is_some() {
                ctl.transition = TransitionState::Cueing;
            }
        }
    } else {
        debug!("queue empty, asking the host to top up");
        ctl.pre_queue_generation += 1;
        ctl.waiting_pre_queue = Some(pending);
        after.emit_pre_queue = Some(ctl.pre_queue_generation);
    }
}

/// Update main flags from the deck queue; returns the new main deck when
/// it changed, for a `main_deck_changed` event.
pub(crate) fn refresh_main(
    inner: &Arc<EngineInner>,
    ctl: &mut ControllerState,
) -> Option<(usize, TrackHandle)> {
    let front = ctl.deck_queue.front().copied();
    for (i, deck) in inner.decks.iter().enumerate() {
        deck.set_main(Some(i) == front);
    }

    if front != ctl.last_main {
        ctl.last_main = front;
        if let Some(id) = front {
            if let Some(track) = inner.decks[id].current_track() {
                return Some((id, track));
            }
        }
    }
    None
}

/// Deliver listener events and deck operations deferred past the lock
pub(crate) fn run_after(inner: &Arc<EngineInner>, after: AfterControl) {
    if let Some((deck_id, track)) = after.main_changed {
        let deck = &inner.decks[deck_id];
        inner
            .listeners
            .emit(|l| l.main_deck_changed(&deck.info(), &track));
    }

    if let Some(deck_id) = after.start_deck {
        inner.decks[deck_id].start();
    }

    if let Some(generation) = after.emit_pre_queue {
        emit_pre_queue(inner, generation);
    }
}

/// Hand every listener a shared one-shot completion token. With no
/// listeners registered the ask immediately fails back into the controller.
fn emit_pre_queue(inner: &Arc<EngineInner>, generation: u64) {
    let tx = inner.control_tx.clone();
    let done = PreQueueDone::new(Box::new(move |ok| {
        let _ = tx.send(ControlMsg::PreQueueDone { generation, ok });
    }));

    if inner.listeners.is_empty() {
        done.done(false);
        return;
    }

    inner.listeners.emit(|l| l.pre_queue_next(done.clone()));
}
