//! Error types for the playout engine
//!
//! Expected failures use `Result<T, E>` with meaningful error enums. Decode
//! and scan failures never cross the audio path; they surface through the
//! loader flow as "not loaded" and the controller moves on to the next track.

use thiserror::Error;

/// Errors produced while opening or decoding a track
#[derive(Debug, Error)]
pub enum ReaderError {
    /// No registered reader factory could handle the file
    #[error("unsupported audio format: {path}")]
    UnsupportedFormat { path: String },

    /// IO errors from file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupted or undecodable audio data
    #[error("decode error: {0}")]
    Decode(String),

    /// Seek to a frame position failed
    #[error("failed to seek to frame {frame}")]
    SeekFailed { frame: u64 },

    /// The container holds no decodable audio track
    #[error("no audio track found in file")]
    NoAudioTracks,
}

/// Main error type for the playout engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Reader/decoder errors
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Audio device open/close failures, surfaced synchronously to the caller
    #[error("audio device error: {0}")]
    Device(String),

    /// The track queue produced nothing; not fatal, but load attempts fail
    #[error("track queue is empty")]
    QueueEmpty,

    /// Operation attempted after shutdown
    #[error("engine has been shut down")]
    ShutDown,

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using the engine error type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_error_converts_into_engine_error() {
        let err: EngineError = ReaderError::NoAudioTracks.into();
        assert!(matches!(err, EngineError::Reader(ReaderError::NoAudioTracks)));
    }

    #[test]
    fn error_messages_name_the_cause() {
        let err = ReaderError::UnsupportedFormat {
            path: "/music/a.xyz".into(),
        };
        assert!(err.to_string().contains("a.xyz"));

        let err = EngineError::Device("no default output device".into());
        assert!(err.to_string().contains("no default output device"));
    }
}
