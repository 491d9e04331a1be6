//! Listener API and registry
//!
//! Hosts observe the engine through [`EngineListener`]. Listeners are held
//! by indexed handles so unregistration is O(1); events are delivered from
//! the engine's control task, one listener at a time, with panics caught so
//! a misbehaving host can never take down the audio path.
//!
//! Listeners must not call back into the engine from inside a callback.

use crate::track::TrackHandle;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Identity of a deck, safe to hold across events
#[derive(Debug, Clone)]
pub struct DeckInfo {
    pub index: usize,
    pub name: Arc<str>,
}

/// One-shot completion token for [`EngineListener::pre_queue_next`].
///
/// Clones share the same token; the first `done` call wins and the rest
/// are ignored, so several listeners may race to answer.
#[derive(Clone)]
pub struct PreQueueDone {
    inner: Arc<PreQueueDoneInner>,
}

struct PreQueueDoneInner {
    fired: AtomicBool,
    complete: Mutex<Option<Box<dyn FnOnce(bool) + Send>>>,
}

impl PreQueueDone {
    pub(crate) fn new(complete: Box<dyn FnOnce(bool) + Send>) -> Self {
        Self {
            inner: Arc::new(PreQueueDoneInner {
                fired: AtomicBool::new(false),
                complete: Mutex::new(Some(complete)),
            }),
        }
    }

    /// Report whether the host managed to enqueue something
    pub fn done(&self, ok: bool) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(complete) = self.inner.complete.lock().unwrap().take() {
            complete(ok);
        }
    }
}

/// Host-facing event interface. All methods default to no-ops; implement
/// what you care about.
#[allow(unused_variables)]
pub trait EngineListener: Send + Sync {
    fn deck_track_scanning(&self, deck: &DeckInfo) {}

    fn deck_track_scanned(&self, deck: &DeckInfo) {}

    fn deck_position(&self, deck: &DeckInfo, position: f64) {}

    fn deck_loaded(&self, deck: &DeckInfo, track: &TrackHandle) {}

    fn deck_started(&self, deck: &DeckInfo, track: &TrackHandle) {}

    fn deck_finished(&self, deck: &DeckInfo, track: &TrackHandle) {}

    fn deck_unloaded(&self, deck: &DeckInfo, track: &TrackHandle) {}

    fn main_deck_changed(&self, deck: &DeckInfo, track: &TrackHandle) {}

    fn audio_device_changed(&self) {}

    /// The queue is (about to be) exhausted; enqueue more and call
    /// `done(true)`, or `done(false)` if there is nothing left. Leaving the
    /// token unanswered keeps the controller cueing until its next tick.
    fn pre_queue_next(&self, done: PreQueueDone) {}
}

/// Handle returned by `add_listener`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn EngineListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn EngineListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().unwrap().is_empty()
    }

    /// Call `f` for every listener, isolating panics
    pub fn emit(&self, f: impl Fn(&dyn EngineListener)) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                error!("listener panicked during event delivery");
            }
        }
    }
}
