//! Position and level telemetry
//!
//! One coalesced timer polls every deck: it turns the real-time finish
//! flag into `deck_finished`, reports positions (~33 ms while playing,
//! ~250 ms idle), and folds the level tracker snapshots on the output
//! sample clock. Positions only move when the sink actually consumes
//! audio, so reporting pauses during an underrun.

use crate::engine::control::{ControlMsg, DeckEvent};
use crate::engine::EngineInner;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub(crate) async fn telemetry_loop(inner: Arc<EngineInner>) {
    let (interval_ms, idle_interval_ms) = {
        let config = inner.config.read().unwrap();
        (
            config.position_interval_ms.max(1),
            config.idle_position_interval_ms.max(1),
        )
    };
    let idle_every = (idle_interval_ms / interval_ms).max(1);

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut last_positions = vec![f64::NAN; inner.decks.len()];
    let mut tick_count = 0u64;

    loop {
        ticker.tick().await;
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        tick_count += 1;

        for (i, deck) in inner.decks.iter().enumerate() {
            // the audio callback cannot emit events; it latches a flag
            if deck.shared.finish_flag.swap(false, Ordering::AcqRel) {
                if let Some(track) = deck.current_track() {
                    deck.mark_finished();
                    let _ = inner
                        .control_tx
                        .send(ControlMsg::Deck(i, DeckEvent::Finished(track)));
                }
                continue;
            }

            if !deck.is_loaded() {
                last_positions[i] = f64::NAN;
                continue;
            }

            let due = deck.is_playing() || tick_count % idle_every == 0;
            if !due {
                continue;
            }

            let position = deck.position_seconds();
            if last_positions[i].is_nan() || (position - last_positions[i]).abs() > 1e-9 {
                last_positions[i] = position;
                let _ = inner
                    .control_tx
                    .send(ControlMsg::Deck(i, DeckEvent::Position(position)));
            }
        }

        let now_ms = inner.mixer.now_ms();
        inner.mixer.levels.lock().unwrap().update(now_ms);
    }
}
