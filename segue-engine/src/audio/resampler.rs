//! Sample-rate conversion for the read-ahead path
//!
//! Wraps rubato's fixed-input polynomial resampler. The producer feeds
//! fixed-size planar chunks at the source rate and pushes the converted
//! frames into the deck's ring buffer, so the audio callback never touches
//! a resampler. Filter state is kept across chunks; a seek resets it.

use crate::error::ReaderError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Streaming resampler from a source rate to the device rate
pub enum StreamResampler {
    /// Rates match; chunks pass straight through
    PassThrough { channels: u16 },

    /// Active conversion with retained filter state
    Active {
        resampler: FastFixedIn<f32>,
        channels: u16,
        chunk_size: usize,
    },
}

impl StreamResampler {
    /// `chunk_size` is the fixed number of source frames per full chunk.
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
        chunk_size: usize,
    ) -> Result<Self, ReaderError> {
        if input_rate == output_rate {
            debug!("pass-through resampler ({input_rate} Hz, {channels} ch)");
            return Ok(Self::PassThrough { channels });
        }

        debug!(
            "resampling {input_rate} Hz -> {output_rate} Hz ({channels} ch, chunk {chunk_size})"
        );
        let resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Linear,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| ReaderError::Decode(format!("failed to create resampler: {e}")))?;

        Ok(Self::Active {
            resampler,
            channels,
            chunk_size,
        })
    }

    /// Fixed source-frame count a full chunk must carry
    pub fn chunk_size(&self) -> usize {
        match self {
            Self::PassThrough { .. } => 0,
            Self::Active { chunk_size, .. } => *chunk_size,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough { .. })
    }

    /// Convert `frames` source frames from `planes`.
    ///
    /// A full chunk (`frames == chunk_size`) runs the stateful path; a short
    /// final chunk runs the partial path. Returns planar output frames.
    pub fn process(
        &mut self,
        planes: &[Vec<f32>],
        frames: usize,
    ) -> Result<Vec<Vec<f32>>, ReaderError> {
        match self {
            Self::PassThrough { channels } => {
                let channels = *channels as usize;
                let mut out = Vec::with_capacity(channels);
                for plane in planes.iter().take(channels) {
                    out.push(plane[..frames].to_vec());
                }
                Ok(out)
            }
            Self::Active {
                resampler,
                channels,
                chunk_size,
            } => {
                let channels = *channels as usize;
                let input: Vec<&[f32]> = planes
                    .iter()
                    .take(channels)
                    .map(|p| &p[..frames])
                    .collect();

                let result = if frames == *chunk_size {
                    resampler.process(&input, None)
                } else {
                    resampler.process_partial(Some(&input), None)
                };

                result.map_err(|e| ReaderError::Decode(format!("resampling failed: {e}")))
            }
        }
    }

    /// Drain whatever the filter still holds after the last source chunk
    pub fn flush(&mut self) -> Result<Vec<Vec<f32>>, ReaderError> {
        match self {
            Self::PassThrough { channels } => Ok(vec![Vec::new(); *channels as usize]),
            Self::Active { resampler, .. } => resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(|e| ReaderError::Decode(format!("resampler flush failed: {e}"))),
        }
    }

    /// Forget filter state (after a seek)
    pub fn reset(&mut self) {
        if let Self::Active { resampler, .. } = self {
            resampler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_copies_input() {
        let mut rs = StreamResampler::new(44100, 44100, 2, 1024).unwrap();
        assert!(rs.is_pass_through());

        let planes = vec![vec![0.5f32; 64], vec![-0.5f32; 64]];
        let out = rs.process(&planes, 64).unwrap();
        assert_eq!(out[0].len(), 64);
        assert_eq!(out[0][0], 0.5);
        assert_eq!(out[1][0], -0.5);
    }

    #[test]
    fn upsampling_produces_more_frames() {
        let chunk = 1024;
        let mut rs = StreamResampler::new(44100, 48000, 2, chunk).unwrap();

        let planes = vec![vec![0.25f32; chunk]; 2];
        let out = rs.process(&planes, chunk).unwrap();

        // 48000/44100 ratio, within one frame of rounding
        let expected = (chunk as f64 * 48000.0 / 44100.0) as usize;
        assert!((out[0].len() as i64 - expected as i64).abs() <= 16);
    }

    #[test]
    fn partial_final_chunk_is_accepted() {
        let chunk = 1024;
        let mut rs = StreamResampler::new(48000, 44100, 1, chunk).unwrap();

        let planes = vec![vec![0.1f32; chunk]];
        rs.process(&planes, chunk).unwrap();
        let out = rs.process(&planes, 100).unwrap();
        // a 100-frame tail cannot yield more than ~100 output frames at 48->44.1
        assert!(out[0].len() <= 128);
        rs.flush().unwrap();
    }
}
