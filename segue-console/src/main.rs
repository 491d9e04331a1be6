//! # segue-console
//!
//! Command-line playout console: queue up audio files and let the engine
//! crossfade through them on the default output device. Prints engine
//! events as they happen; useful as a smoke test and as a minimal host
//! example.

use anyhow::{bail, Context, Result};
use clap::Parser;
use segue_engine::{
    CpalOutput, DeckInfo, Engine, EngineConfig, EngineListener, NullOutput, OutputSpec,
    PreQueueDone, Track, TrackHandle, TrackQueue, VecQueue,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "segue-console")]
#[command(about = "Gapless DJ-style playout of the given audio files")]
#[command(version)]
struct Args {
    /// Audio files to play, in order
    tracks: Vec<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name (default device when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// List available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Render without a sound card (headless pacing)
    #[arg(long)]
    null: bool,

    /// Override the maximum transition time in seconds
    #[arg(short, long)]
    transition: Option<f64>,

    /// Override the fading curve (0..100)
    #[arg(long)]
    curve: Option<f64>,
}

/// TOML file layout: an `[engine]` table plus console-side options
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConsoleConfig {
    engine: EngineConfig,
    device: Option<String>,
}

/// Prints engine events; answers queue top-up asks with "nothing left"
/// so playout ends after the files given on the command line.
struct ConsoleListener;

impl EngineListener for ConsoleListener {
    fn deck_loaded(&self, deck: &DeckInfo, track: &TrackHandle) {
        info!("[{}] loaded {}", deck.name, track.path().display());
    }

    fn deck_started(&self, deck: &DeckInfo, track: &TrackHandle) {
        info!("[{}] started {}", deck.name, track.path().display());
    }

    fn deck_finished(&self, deck: &DeckInfo, track: &TrackHandle) {
        info!("[{}] finished {}", deck.name, track.path().display());
    }

    fn deck_unloaded(&self, deck: &DeckInfo, _track: &TrackHandle) {
        info!("[{}] unloaded", deck.name);
    }

    fn deck_track_scanned(&self, deck: &DeckInfo) {
        info!("[{}] track analysis complete", deck.name);
    }

    fn main_deck_changed(&self, deck: &DeckInfo, track: &TrackHandle) {
        info!("main deck: [{}] {}", deck.name, track.path().display());
    }

    fn audio_device_changed(&self) {
        info!("audio device changed");
    }

    fn pre_queue_next(&self, done: PreQueueDone) {
        done.done(false);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segue_console=info,segue_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in CpalOutput::list_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    if args.tracks.is_empty() {
        bail!("no tracks given; pass audio files to play");
    }

    let mut config = match &args.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<ConsoleConfig>(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => ConsoleConfig::default(),
    };

    if let Some(transition) = args.transition {
        config.engine.max_transition_time = transition;
    }
    if let Some(curve) = args.curve {
        config.engine.fading_curve = curve;
    }
    let device = args.device.or(config.device);

    let queue = Arc::new(VecQueue::new());
    for path in &args.tracks {
        queue.push(Track::new(path.clone()).into_handle());
    }
    info!("queued {} tracks", args.tracks.len());

    let engine = Engine::new(config.engine, Arc::clone(&queue) as Arc<dyn TrackQueue>)?;
    engine.add_listener(Arc::new(ConsoleListener));

    let pump = engine
        .take_output()
        .expect("engine output already taken");

    // keep the sink alive for the duration of playout
    let _cpal_output;
    let _null_output;
    if args.null {
        _null_output = Some(NullOutput::start(pump, OutputSpec::default()));
        _cpal_output = None;
    } else {
        _cpal_output = Some(CpalOutput::start(pump, device.as_deref())?);
        _null_output = None;
    }

    engine.play();
    info!("playout started; ctrl-c to stop");

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    // give the first load a moment before "nothing playing" means "done"
    let grace = tokio::time::Instant::now() + Duration::from_secs(5);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                engine.stop();
                break;
            }
            _ = poll.tick() => {
                if tokio::time::Instant::now() > grace
                    && !engine.is_playing()
                    && queue.is_empty()
                {
                    info!("queue finished");
                    break;
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}
