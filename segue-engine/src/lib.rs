//! # segue-engine
//!
//! Automatic DJ playout engine: given an ordered queue of audio tracks it
//! renders one continuous stereo stream in which consecutive tracks
//! overlap with crossfades whose timing is derived from the audio itself
//! (leading silence, trailing fade, sustained tail).
//!
//! **Architecture:** decks decode and buffer via symphonia + rubato into
//! lock-free rings; the transition controller drives the deck state
//! machine from position events; the mixer sums sounding decks and runs a
//! look-ahead limiter before the sink (cpal or headless) pulls blocks.
//!
//! ```no_run
//! use segue_engine::{CpalOutput, Engine, EngineConfig, Track, VecQueue};
//! use std::sync::Arc;
//!
//! # #[tokio::main] async fn main() -> anyhow::Result<()> {
//! let queue = Arc::new(VecQueue::new());
//! queue.push(Track::new("/music/one.flac").into_handle());
//! queue.push(Track::new("/music/two.mp3").into_handle());
//!
//! let engine = Engine::new(EngineConfig::default(), queue)?;
//! let _output = CpalOutput::start(engine.take_output().unwrap(), None)?;
//! engine.play();
//! # Ok(()) }
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod deck;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod fader;
pub mod mixer;
pub mod output;
pub mod queue;
pub mod track;

pub use audio::reader::{AudioReader, ReaderFactory, ReaderRegistry};
pub use config::{EngineConfig, KaraokeConfig};
pub use deck::DeckState;
pub use dsp::karaoke::KaraokeParam;
pub use engine::transition::TransitionMarks;
pub use engine::{DeckSnapshot, Engine};
pub use error::{EngineError, ReaderError, Result};
pub use events::{DeckInfo, EngineListener, ListenerId, PreQueueDone};
pub use fader::Fader;
pub use output::{AudioPump, CpalOutput, NullOutput, OutputSpec};
pub use queue::{TrackQueue, VecQueue};
pub use track::{Track, TrackHandle};
