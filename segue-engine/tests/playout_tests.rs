//! End-to-end playout scenarios: the engine, real decks and files, and a
//! pump driven faster than real time.

mod helpers;

use helpers::{track_with_tail, wait_for, write_wav, PumpDriver, Recorder, Segment};
use segue_engine::{Engine, EngineConfig, Track, TrackQueue, VecQueue};
use std::sync::Arc;
use std::time::Duration;

fn engine_config() -> EngineConfig {
    EngineConfig {
        max_transition_time: 2.0,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_queue_play_asks_the_host_exactly_once() {
    let queue = Arc::new(VecQueue::new());
    let engine = Engine::new(engine_config(), queue).unwrap();
    let recorder = Recorder::new();
    engine.add_listener(recorder.clone());

    let _driver = PumpDriver::start(engine.take_output().unwrap(), 4.0);

    assert!(engine.play());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(recorder.pre_queue_calls(), 1);
    assert!(!engine.is_playing());
    assert!(recorder.events().is_empty());

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn two_tracks_crossfade_and_hand_over_the_main_deck() {
    let dir = tempfile::tempdir().unwrap();
    let first = track_with_tail(dir.path(), "alpha.wav");
    let second = track_with_tail(dir.path(), "beta.wav");

    let queue = Arc::new(VecQueue::new());
    queue.push(Track::new(first).into_handle());
    queue.push(Track::new(second).into_handle());

    let engine = Engine::new(engine_config(), Arc::clone(&queue) as Arc<dyn TrackQueue>).unwrap();
    let recorder = Recorder::new();
    engine.add_listener(recorder.clone());

    let _driver = PumpDriver::start(engine.take_output().unwrap(), 6.0);

    assert!(engine.play());

    // both tracks play through; the whole run is ~10 s of audio at 6x
    let finished = wait_for(Duration::from_secs(30), || {
        recorder.contains("finished:") && recorder.contains("unloaded:") && {
            recorder
                .events()
                .iter()
                .filter(|e| e.starts_with("unloaded:"))
                .count()
                == 2
        }
    })
    .await;
    assert!(finished, "events so far: {:?}", recorder.events());

    let events = recorder.events();

    // per-deck lifecycle order for the first track
    let loaded_a = recorder.index_of("loaded:Deck A:alpha").unwrap();
    let started_a = recorder.index_of("started:Deck A:alpha").unwrap();
    let finished_a = recorder.index_of("finished:Deck A:alpha").unwrap();
    let unloaded_a = recorder.index_of("unloaded:Deck A:alpha").unwrap();
    assert!(loaded_a < started_a && started_a < finished_a && finished_a < unloaded_a);

    // the second track started while the first was still sounding
    let started_b = recorder.index_of("started:Deck B:beta").unwrap();
    assert!(
        started_b < finished_a,
        "no overlap between tracks: {events:?}"
    );

    // the main deck followed the handover
    let main_a = recorder.index_of("main:alpha").unwrap();
    let main_b = recorder.index_of("main:beta").unwrap();
    assert!(main_a < main_b);

    // both tracks were analyzed in the background
    assert!(recorder.contains("scanned:Deck A"));
    assert!(recorder.contains("scanned:Deck B"));

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn short_track_finishes_then_next_starts_without_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let short = dir.path().join("blip.wav");
    write_wav(&short, &[Segment::Tone(1.5, 0.5, 440.0)]);
    let follow = track_with_tail(dir.path(), "follow.wav");

    let queue = Arc::new(VecQueue::new());
    queue.push(Track::new(short).into_handle());
    queue.push(Track::new(follow).into_handle());

    let engine = Engine::new(engine_config(), queue).unwrap();
    let recorder = Recorder::new();
    engine.add_listener(recorder.clone());

    let _driver = PumpDriver::start(engine.take_output().unwrap(), 6.0);
    assert!(engine.play());

    let follow_started = wait_for(Duration::from_secs(20), || {
        recorder
            .events()
            .iter()
            .any(|e| e.starts_with("started:") && e.ends_with(":follow"))
    })
    .await;
    assert!(follow_started, "events: {:?}", recorder.events());

    // no crossfade for a sub-3-second track: it finishes, then the next
    // one starts
    let events = recorder.events();
    let finished_short = events
        .iter()
        .position(|e| e.starts_with("finished:") && e.ends_with(":blip"))
        .unwrap();
    let started_follow = events
        .iter()
        .position(|e| e.starts_with("started:") && e.ends_with(":follow"))
        .unwrap();
    assert!(finished_short < started_follow, "events: {events:?}");

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn fade_out_ends_playback_within_the_fade_window() {
    let dir = tempfile::tempdir().unwrap();
    let long = dir.path().join("steady.wav");
    write_wav(&long, &[Segment::Tone(30.0, 0.5, 220.0)]);

    let queue = Arc::new(VecQueue::new());
    queue.push(Track::new(long).into_handle());

    let config = EngineConfig {
        max_fade_out_duration: 2.0,
        ..engine_config()
    };
    let engine = Engine::new(config, queue).unwrap();
    let recorder = Recorder::new();
    engine.add_listener(recorder.clone());

    let _driver = PumpDriver::start(engine.take_output().unwrap(), 6.0);
    assert!(engine.play());

    assert!(
        wait_for(Duration::from_secs(10), || engine.is_playing()).await,
        "playback never started"
    );
    // let it run a moment, then pull the plug
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(engine.fade_out_main());

    // 2 s fade at 6x plus control latency
    let ended = wait_for(Duration::from_secs(15), || {
        recorder.contains("finished:Deck A:steady")
    })
    .await;
    assert!(ended, "events: {:?}", recorder.events());

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn fade_out_with_nothing_loaded_is_a_no_op() {
    let queue = Arc::new(VecQueue::new());
    let engine = Engine::new(engine_config(), queue).unwrap();
    let _driver = PumpDriver::start(engine.take_output().unwrap(), 4.0);

    assert!(!engine.fade_out_main());
    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn seek_jumps_the_main_deck() {
    let dir = tempfile::tempdir().unwrap();
    let long = dir.path().join("long.wav");
    write_wav(&long, &[Segment::Tone(30.0, 0.5, 220.0)]);

    let queue = Arc::new(VecQueue::new());
    queue.push(Track::new(long).into_handle());

    let engine = Engine::new(engine_config(), queue).unwrap();
    let recorder = Recorder::new();
    engine.add_listener(recorder.clone());

    let _driver = PumpDriver::start(engine.take_output().unwrap(), 6.0);
    assert!(engine.play());

    assert!(
        wait_for(Duration::from_secs(10), || engine.is_playing()).await,
        "playback never started"
    );

    assert!(engine.set_position(20.0));
    let jumped = wait_for(Duration::from_secs(5), || {
        let p = engine.position();
        (19.5..22.5).contains(&p)
    })
    .await;
    assert!(jumped, "position={}", engine.position());

    // still playing after the jump
    assert!(engine.is_playing());

    engine.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_after_shutdown_return_false() {
    let queue = Arc::new(VecQueue::new());
    let engine = Engine::new(engine_config(), queue).unwrap();
    engine.shutdown();

    assert!(!engine.play());
    assert!(!engine.fade_out_main());
    assert!(!engine.set_position(1.0));
    assert!(engine.is_closed());
}
