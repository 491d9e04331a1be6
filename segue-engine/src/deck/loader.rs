//! Deck background tasks: loader and read-ahead producer
//!
//! Loading opens the reader, runs the fast scan, wires the ring-buffer
//! pipeline, kicks off the full scan, and reports back through the control
//! channel. The producer task then keeps the ring topped up from the
//! reader, resampling to the device rate as it goes. Both are the only
//! places a deck touches the filesystem.

use crate::analysis::scanner::{fast_scan, FastScan, TrackScanner, MIN_SCAN_DURATION};
use crate::audio::reader::AudioReader;
use crate::audio::resampler::StreamResampler;
use crate::audio::ring_buffer::{frame_ring, FrameProducer};
use crate::audio::types::StereoFrame;
use crate::deck::source::{DeckShared, DeckSource};
use crate::deck::{Deck, DeckState};
use crate::engine::control::{ControlMsg, DeckEvent};
use crate::error::ReaderError;
use crate::track::TrackHandle;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source frames handed to the resampler per producer iteration
const PRODUCER_CHUNK: usize = 1024;
/// Producer nap while the ring is comfortably full
const PRODUCER_IDLE: Duration = Duration::from_millis(10);

/// Commands from the deck's control side to its producer task
pub(crate) enum ProducerCmd {
    /// Seek the reader and adopt a fresh ring (the old one was discarded)
    Seek {
        source_frame: u64,
        producer: FrameProducer,
    },
    Quit,
}

/// Kick off a background load. Returns false when one is already running.
pub(crate) fn spawn_load(deck: &Arc<Deck>, track: TrackHandle) -> bool {
    let generation = {
        let mut ctl = deck.ctl.lock().unwrap();
        if ctl.loading {
            debug!("[{}] is busy loading some track", deck.name);
            return false;
        }
        ctl.loading = true;
        ctl.state = DeckState::Loading;
        ctl.load_generation += 1;
        ctl.load_generation
    };

    info!("[{}] loading {}", deck.name, track.path().display());

    let deck = Arc::clone(deck);
    tokio::spawn(async move {
        run_load(deck, track, generation).await;
    });
    true
}

async fn run_load(deck: Arc<Deck>, track: TrackHandle, generation: u64) {
    let registry = Arc::clone(&deck.registry);
    let path = track.path().to_path_buf();
    let max_transition_time = deck.config.read().unwrap().max_transition_time;

    let opened = tokio::task::spawn_blocking(move || {
        let mut reader = registry.open(&path)?;
        let fast = fast_scan(reader.as_mut(), max_transition_time)?;
        Ok::<_, ReaderError>((reader, fast))
    })
    .await;

    let result = match opened {
        Ok(result) => result,
        Err(join_err) => {
            warn!("[{}] loader task failed: {join_err}", deck.name);
            fail_load(&deck, generation);
            return;
        }
    };

    match result {
        Ok((reader, fast)) => {
            match install_pipeline(&deck, reader, fast, Arc::clone(&track), generation) {
                Ok(true) => {}
                Ok(false) => return, // superseded by an unload or another load
                Err(e) => {
                    warn!("[{}] pipeline setup failed: {e}", deck.name);
                    fail_load(&deck, generation);
                    return;
                }
            }

            let _ = deck
                .events
                .send(ControlMsg::Deck(deck.id, DeckEvent::Loaded(track)));

            if fast.duration() >= MIN_SCAN_DURATION {
                run_full_scan(deck, fast, generation).await;
            }
        }
        Err(e) => {
            warn!(
                "[{}] could not load {}: {e}",
                deck.name,
                track.path().display()
            );
            fail_load(&deck, generation);
        }
    }
}

/// A failed load leaves the deck Empty; only the internal control message
/// flows (no listener events for failed loads).
fn fail_load(deck: &Deck, generation: u64) {
    {
        let mut ctl = deck.ctl.lock().unwrap();
        if ctl.load_generation != generation {
            return;
        }
        ctl.loading = false;
        ctl.state = DeckState::Empty;
    }
    let _ = deck
        .events
        .send(ControlMsg::Deck(deck.id, DeckEvent::LoadFailed));
}

/// Bind reader, ring and producer to the deck. Returns Ok(false) when the
/// load was superseded while the file was being opened.
fn install_pipeline(
    deck: &Arc<Deck>,
    reader: Box<dyn AudioReader>,
    fast: FastScan,
    track: TrackHandle,
    generation: u64,
) -> Result<bool, ReaderError> {
    let mut ctl = deck.ctl.lock().unwrap();
    if ctl.load_generation != generation {
        debug!("[{}] load superseded, dropping reader", deck.name);
        return Ok(false);
    }

    let source_rate = reader.sample_rate();
    let channels = reader.channels();
    let output_rate = deck.shared.output_rate.load(Ordering::Acquire).max(1);
    let config = deck.config.read().unwrap();

    let capacity = (config.read_ahead_seconds * output_rate as f64) as usize;
    let (producer, consumer) = frame_ring(capacity);

    let resampler = StreamResampler::new(
        source_rate,
        output_rate,
        channels.min(2),
        PRODUCER_CHUNK,
    )?;

    let shared = &deck.shared;
    shared.source_rate.store(source_rate, Ordering::Release);
    shared
        .origin_source_frame
        .store(fast.first_audible, Ordering::Release);
    shared
        .total_source_frames
        .store(fast.frames_total, Ordering::Release);
    shared.frames_popped.store(0, Ordering::Release);
    shared.producer_eof.store(false, Ordering::Release);
    shared.playing.store(false, Ordering::Release);
    shared.stopped.store(true, Ordering::Release);
    shared.fading.store(false, Ordering::Release);
    shared.finish_flag.store(false, Ordering::Release);
    shared.volume.store(1.0);
    shared.pre_gain.store(track.effective_pre_gain());
    shared
        .replay_gain
        .store(track.replay_gain_linear(config.replay_gain_boost));
    drop(config);

    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
    ctl.producer_tx = Some(cmd_tx);
    ctl.track = Some(track);

    let outcome = fast.provisional_outcome().normalized();
    ctl.outcome = Some(outcome);
    ctl.marks = deck.marks_for(&outcome);
    ctl.state = DeckState::Loaded;
    ctl.loading = false;
    drop(ctl);

    *deck.slot.lock().unwrap() = Some(DeckSource::new(
        consumer,
        Arc::clone(&deck.shared),
        deck.shared.target_gain(),
    ));

    let shared = Arc::clone(&deck.shared);
    let name = Arc::clone(&deck.name);
    tokio::task::spawn_blocking(move || {
        run_producer(
            reader,
            resampler,
            producer,
            shared,
            cmd_rx,
            fast.first_audible,
            channels,
            name,
        );
    });

    Ok(true)
}

async fn run_full_scan(deck: Arc<Deck>, fast: FastScan, generation: u64) {
    let Some(track) = deck.current_track() else {
        return;
    };

    let _ = deck
        .events
        .send(ControlMsg::Deck(deck.id, DeckEvent::Scanning));

    let scanner = TrackScanner::new(Arc::clone(&deck.registry));
    let path = track.path().to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || scanner.full_scan(&path, &fast)).await;

    let outcome = match scanned {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("[{}] scan failed: {e}", deck.name);
            return;
        }
        Err(join_err) => {
            warn!("[{}] scan task failed: {join_err}", deck.name);
            return;
        }
    };

    {
        let ctl = deck.ctl.lock().unwrap();
        if ctl.load_generation != generation {
            return; // the deck moved on while we were scanning
        }
    }

    deck.apply_scan(outcome);
    let _ = deck
        .events
        .send(ControlMsg::Deck(deck.id, DeckEvent::Scanned));
}

/// Read-ahead loop: refill the ring from the reader until the total frame
/// count is reached, resampling to the device rate. Runs on the blocking
/// pool; I/O waits live here and nowhere else on the playback path.
#[allow(clippy::too_many_arguments)]
fn run_producer(
    mut reader: Box<dyn AudioReader>,
    mut resampler: StreamResampler,
    mut producer: FrameProducer,
    shared: Arc<DeckShared>,
    commands: Receiver<ProducerCmd>,
    start_frame: u64,
    channels: u16,
    name: Arc<str>,
) {
    if let Err(e) = reader.seek(start_frame) {
        warn!("[{name}] initial seek failed: {e}");
    }

    let source_rate = shared.source_rate.load(Ordering::Acquire).max(1);
    let output_rate = shared.output_rate.load(Ordering::Acquire).max(1);
    let out_per_chunk =
        (PRODUCER_CHUNK as f64 * output_rate as f64 / source_rate as f64).ceil() as usize + 64;

    let mut planes = vec![vec![0.0f32; PRODUCER_CHUNK]; channels as usize];
    let mut read_position = start_frame;
    let mut flushed = false;

    loop {
        match commands.try_recv() {
            Ok(ProducerCmd::Seek {
                source_frame,
                producer: fresh,
            }) => {
                if let Err(e) = reader.seek(source_frame) {
                    warn!("[{name}] seek failed: {e}");
                }
                resampler.reset();
                producer = fresh;
                read_position = source_frame;
                flushed = false;
                continue;
            }
            Ok(ProducerCmd::Quit) | Err(TryRecvError::Disconnected) => {
                debug!("[{name}] producer exiting");
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        let total = shared.total_source_frames.load(Ordering::Acquire);
        if total > 0 && read_position >= total {
            if !flushed {
                if let Ok(tail) = resampler.flush() {
                    push_planes(&mut producer, &tail, tail[0].len());
                }
                shared.producer_eof.store(true, Ordering::Release);
                flushed = true;
                debug!("[{name}] read-ahead complete at frame {read_position}");
            }
            std::thread::sleep(PRODUCER_IDLE * 2);
            continue;
        }

        if producer.free_len() < out_per_chunk {
            std::thread::sleep(PRODUCER_IDLE);
            continue;
        }

        let want = if total > 0 {
            PRODUCER_CHUNK.min((total - read_position) as usize)
        } else {
            PRODUCER_CHUNK
        };

        let read = match reader.read(&mut planes, want) {
            Ok(read) => read,
            Err(e) => {
                warn!("[{name}] read failed, ending stream: {e}");
                shared.producer_eof.store(true, Ordering::Release);
                flushed = true;
                std::thread::sleep(PRODUCER_IDLE * 2);
                continue;
            }
        };

        if read == 0 {
            // actual end of data, possibly earlier than the container said
            if !flushed {
                if let Ok(tail) = resampler.flush() {
                    push_planes(&mut producer, &tail, tail[0].len());
                }
                shared.producer_eof.store(true, Ordering::Release);
                flushed = true;
            }
            std::thread::sleep(PRODUCER_IDLE * 2);
            continue;
        }

        read_position += read as u64;

        match resampler.process(&planes, read) {
            Ok(out) => {
                let frames = out[0].len();
                push_planes(&mut producer, &out, frames);
            }
            Err(e) => {
                warn!("[{name}] resampling failed, ending stream: {e}");
                shared.producer_eof.store(true, Ordering::Release);
                flushed = true;
            }
        }
    }
}

/// Push planar output into the ring as stereo frames, duplicating mono.
///
/// The caller checks free space before resampling, so pushes rarely wait.
/// The wait is bounded: if the ring stays full (its consumer was swapped
/// away by a seek), the remainder is dropped instead of wedging the task.
fn push_planes(producer: &mut FrameProducer, planes: &[Vec<f32>], frames: usize) {
    for i in 0..frames {
        let frame = if planes.len() >= 2 {
            StereoFrame::new(planes[0][i], planes[1][i])
        } else {
            StereoFrame::from_mono(planes[0][i])
        };

        let mut retries = 0;
        while !producer.push(frame) {
            retries += 1;
            if retries > 200 {
                warn!("read-ahead ring stayed full, dropping {} frames", frames - i);
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
