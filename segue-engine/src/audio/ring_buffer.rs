//! Lock-free frame queue between a deck's read-ahead producer and the
//! audio callback
//!
//! Single-producer single-consumer over [`ringbuf`]'s heap ring. The
//! consumer side is wait-free: the audio callback pops frames without
//! locks or allocation, and an empty ring is an underrun that the caller
//! zero-fills. Counters are shared atomics so the control side can observe
//! buffer health and the consumer position without touching the ring.

use crate::audio::types::StereoFrame;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Create a frame ring of the given capacity, split into producer and
/// consumer halves.
pub fn frame_ring(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let ring = HeapRb::<StereoFrame>::new(capacity.max(1));
    let (producer, consumer) = ring.split();

    let underruns = Arc::new(AtomicU64::new(0));
    let popped = Arc::new(AtomicU64::new(0));

    (
        FrameProducer {
            inner: producer,
            overruns: 0,
        },
        FrameConsumer {
            inner: consumer,
            underruns,
            popped,
        },
    )
}

/// Producer half, owned by the read-ahead task. May block between pushes
/// but each push itself is wait-free.
pub struct FrameProducer {
    inner: ringbuf::HeapProd<StereoFrame>,
    overruns: u64,
}

impl FrameProducer {
    /// Push one frame; false when the ring is full
    pub fn push(&mut self, frame: StereoFrame) -> bool {
        match self.inner.try_push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overruns += 1;
                if self.overruns % 1000 == 1 {
                    warn!("read-ahead ring overrun (total: {})", self.overruns);
                }
                false
            }
        }
    }

    /// Frames that can be pushed without overrunning
    pub fn free_len(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn occupied_len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().into()
    }
}

/// Consumer half, owned by the audio callback via the deck source
pub struct FrameConsumer {
    inner: ringbuf::HeapCons<StereoFrame>,
    underruns: Arc<AtomicU64>,
    popped: Arc<AtomicU64>,
}

impl FrameConsumer {
    /// Pop one frame; `None` is an underrun and the caller outputs silence.
    ///
    /// Only successful pops advance the shared position counter, so the
    /// reported position pauses during a stall instead of drifting.
    pub fn pop(&mut self) -> Option<StereoFrame> {
        match self.inner.try_pop() {
            Some(frame) => {
                self.popped.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            None => {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Frames currently buffered
    pub fn ready_frames(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Shared counter of frames consumed since this ring was created
    pub fn popped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.popped)
    }

    /// Shared counter of underruns observed by the consumer
    pub fn underrun_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.underruns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_order() {
        let (mut producer, mut consumer) = frame_ring(8);
        assert!(producer.push(StereoFrame::new(0.1, 0.2)));
        assert!(producer.push(StereoFrame::new(0.3, 0.4)));

        let first = consumer.pop().unwrap();
        assert_eq!(first.left, 0.1);
        assert_eq!(first.right, 0.2);
        let second = consumer.pop().unwrap();
        assert_eq!(second.left, 0.3);
    }

    #[test]
    fn underrun_counts_and_returns_none() {
        let (_producer, mut consumer) = frame_ring(4);
        let underruns = consumer.underrun_counter();

        assert!(consumer.pop().is_none());
        assert!(consumer.pop().is_none());
        assert_eq!(underruns.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn popped_counter_only_counts_real_frames() {
        let (mut producer, mut consumer) = frame_ring(4);
        let popped = consumer.popped_counter();

        producer.push(StereoFrame::ZERO);
        consumer.pop();
        consumer.pop(); // underrun
        assert_eq!(popped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn full_ring_rejects_push() {
        let (mut producer, _consumer) = frame_ring(2);
        assert!(producer.push(StereoFrame::ZERO));
        assert!(producer.push(StereoFrame::ZERO));
        assert!(!producer.push(StereoFrame::ZERO));
        assert_eq!(producer.free_len(), 0);
    }
}
