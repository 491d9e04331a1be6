//! Audio readers
//!
//! A reader owns one decoded stream and hands out planar f32 PCM at the
//! file's native rate. Readers are plug-ins: the engine ships a symphonia
//! implementation and hosts may register factories for additional formats.
//! Readers are used from a single background task only; they are allowed to
//! block on I/O and are never touched by the audio callback.

use crate::error::ReaderError;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Random-access decoded audio stream
///
/// `read` fills the first `channels()` planes with up to `frames` samples
/// each and returns the number of frames produced; fewer than requested
/// means end of stream. Positions are frames at the native sample rate.
pub trait AudioReader: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Total frames in the stream, 0 when the container does not say
    fn frames_total(&self) -> u64;

    /// Reposition so the next `read` starts at `frame`
    fn seek(&mut self, frame: u64) -> Result<(), ReaderError>;

    /// Decode into `planes[ch][..frames]`; every plane must hold at least
    /// `frames` samples. Returns frames produced.
    fn read(&mut self, planes: &mut [Vec<f32>], frames: usize) -> Result<usize, ReaderError>;
}

/// Factory side of the reader plug-in contract
pub trait ReaderFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioReader>, ReaderError>;
}

/// Ordered set of reader factories; the first one that opens a file wins
pub struct ReaderRegistry {
    factories: std::sync::RwLock<Vec<Arc<dyn ReaderFactory>>>,
}

impl ReaderRegistry {
    /// Registry with the built-in symphonia factory
    pub fn with_defaults() -> Self {
        Self {
            factories: std::sync::RwLock::new(vec![Arc::new(SymphoniaReaderFactory)]),
        }
    }

    /// Register an additional factory, tried before the existing ones
    pub fn register(&self, factory: Arc<dyn ReaderFactory>) {
        self.factories.write().unwrap().insert(0, factory);
    }

    pub fn open(&self, path: &Path) -> Result<Box<dyn AudioReader>, ReaderError> {
        let factories = self.factories.read().unwrap().clone();
        let mut last_err = None;
        for factory in &factories {
            match factory.open(path) {
                Ok(reader) => return Ok(reader),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ReaderError::UnsupportedFormat {
            path: path.display().to_string(),
        }))
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Built-in factory decoding via symphonia (MP3, FLAC, Vorbis, AAC, WAV, ...)
pub struct SymphoniaReaderFactory;

impl ReaderFactory for SymphoniaReaderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioReader>, ReaderError> {
        Ok(Box::new(SymphoniaReader::open(path)?))
    }
}

/// Reader over a probed symphonia format + decoder pair
pub struct SymphoniaReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    frames_total: u64,
    /// Decoded-but-undelivered samples, planar, starting at `pending_offset`
    pending: Vec<Vec<f32>>,
    pending_offset: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    eof: bool,
}

impl SymphoniaReader {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|_| ReaderError::UnsupportedFormat {
                path: path.display().to_string(),
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(ReaderError::NoAudioTracks)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| ReaderError::Decode("sample rate not reported".into()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| ReaderError::Decode("channel count not reported".into()))?;
        let frames_total = codec_params.n_frames.unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| ReaderError::Decode(format!("failed to create decoder: {e}")))?;

        debug!(
            "opened {}: {} Hz, {} ch, {} frames",
            path.display(),
            sample_rate,
            channels,
            frames_total
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            frames_total,
            pending: vec![Vec::new(); channels as usize],
            pending_offset: 0,
            sample_buf: None,
            eof: false,
        })
    }

    fn pending_frames(&self) -> usize {
        self.pending[0].len() - self.pending_offset
    }

    /// Decode the next packet of this track into `pending`.
    /// Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool, ReaderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(false);
                }
                Err(e) => {
                    return Err(ReaderError::Decode(format!("packet read failed: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let capacity = decoded.capacity() as u64;

                    let needs_new = match &self.sample_buf {
                        Some(buf) => buf.capacity() < decoded.frames() * spec.channels.count(),
                        None => true,
                    };
                    if needs_new {
                        self.sample_buf = Some(SampleBuffer::new(capacity, spec));
                    }

                    let sample_buf = self.sample_buf.as_mut().unwrap();
                    sample_buf.copy_interleaved_ref(decoded);

                    let channels = self.channels as usize;
                    for plane in &mut self.pending {
                        plane.drain(..self.pending_offset.min(plane.len()));
                    }
                    self.pending_offset = 0;

                    for (i, sample) in sample_buf.samples().iter().enumerate() {
                        self.pending[i % channels].push(*sample);
                    }

                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // A damaged packet is skippable; keep going
                    warn!("decode error, skipping packet: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(ReaderError::Decode(format!("decode failed: {e}")));
                }
            }
        }
    }

    /// Decode and discard `frames` frames (used after a coarse seek)
    fn skip_frames(&mut self, mut frames: u64) -> Result<(), ReaderError> {
        while frames > 0 {
            if self.pending_frames() == 0 && !self.decode_next()? {
                return Ok(());
            }
            let take = (self.pending_frames() as u64).min(frames) as usize;
            self.pending_offset += take;
            frames -= take as u64;
        }
        Ok(())
    }
}

impl AudioReader for SymphoniaReader {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frames_total(&self) -> u64 {
        self.frames_total
    }

    fn seek(&mut self, frame: u64) -> Result<(), ReaderError> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|_| ReaderError::SeekFailed { frame })?;

        self.decoder.reset();
        for plane in &mut self.pending {
            plane.clear();
        }
        self.pending_offset = 0;
        self.eof = false;

        // The format seeks to a packet boundary; decode-and-skip covers the
        // remaining distance for sample accuracy.
        if seeked.actual_ts < frame {
            self.skip_frames(frame - seeked.actual_ts)?;
        }

        Ok(())
    }

    fn read(&mut self, planes: &mut [Vec<f32>], frames: usize) -> Result<usize, ReaderError> {
        debug_assert!(planes.len() >= self.channels as usize);

        let channels = self.channels as usize;
        let mut produced = 0;

        while produced < frames {
            if self.pending_frames() == 0 {
                if self.eof || !self.decode_next()? {
                    break;
                }
            }

            let take = self.pending_frames().min(frames - produced);
            for ch in 0..channels {
                let src = &self.pending[ch][self.pending_offset..self.pending_offset + take];
                planes[ch][produced..produced + take].copy_from_slice(src);
            }
            self.pending_offset += take;
            produced += take;
        }

        Ok(produced)
    }
}
