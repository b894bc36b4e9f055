//! Lock-free SPSC ring buffer between the capture callback and the
//! recognizer loop.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and safe to
//! call from the real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the thread running the capture loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
///
/// The capture loops drain every few milliseconds; the slack only matters
/// while a blocking HTTP recognition call is in flight.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_preserves_sample_order() {
        let (mut prod, mut cons) = create_audio_ring();
        let data = [0.5, -0.5, 0.25, -0.25];
        assert_eq!(prod.push_slice(&data), 4);

        let mut out = [0.0f32; 4];
        assert_eq!(cons.pop_slice(&mut out), 4);
        assert_eq!(out, data);
    }

    #[test]
    fn empty_ring_pops_nothing() {
        let (_prod, mut cons) = create_audio_ring();
        let mut out = [0.0f32; 8];
        assert_eq!(cons.pop_slice(&mut out), 0);
    }
}
