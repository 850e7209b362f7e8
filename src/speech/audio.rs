//! Shared audio tap feeding frequency-band lip-sync.
//!
//! The player pushes samples as they are played; the speech driver reads the
//! most recent window every analysis tick. Closing the tap tells the driver
//! the stream is gone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct TapInner {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    sample_rate: u32,
    closed: AtomicBool,
}

/// Clonable handle to a bounded buffer of the most recent output samples.
#[derive(Clone)]
pub struct AudioTap {
    inner: Arc<TapInner>,
}

impl std::fmt::Debug for AudioTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTap")
            .field("sample_rate", &self.inner.sample_rate)
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AudioTap {
    /// Create a tap holding up to one second of audio at `sample_rate`.
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capacity(sample_rate, sample_rate.max(1) as usize)
    }

    /// Create a tap holding at most `capacity` samples.
    #[must_use]
    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(TapInner {
                samples: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                sample_rate,
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<f32>> {
        match self.inner.samples.lock() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sample rate of pushed audio.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Append mono `f32` samples, dropping the oldest beyond capacity.
    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() || self.is_closed() {
            return;
        }
        let mut buf = self.buffer();
        let cap = self.inner.capacity;

        // If the new data alone exceeds the cap, keep only the tail.
        let data = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };

        let needed = data.len().saturating_sub(cap.saturating_sub(buf.len()));
        let stale = needed.min(buf.len());
        buf.drain(..stale);
        buf.extend(data.iter());
    }

    /// Append signed 16-bit PCM samples.
    pub fn push_pcm16(&self, samples: &[i16]) {
        let converted: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
        self.push(&converted);
    }

    /// The newest `n` samples, zero-padded at the front when fewer exist.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<f32> {
        let buf = self.buffer();
        let available = buf.len().min(n);
        let mut out = vec![0.0; n - available];
        out.extend(buf.iter().skip(buf.len() - available));
        out
    }

    /// Number of buffered samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buffered audio (e.g. on barge-in).
    pub fn clear(&self) {
        self.buffer().clear();
    }

    /// Mark the stream as removed. Further pushes are ignored.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.clear();
    }

    /// Whether [`close`](Self::close) was called on any handle.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Decode little-endian PCM16 bytes into samples.
#[must_use]
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn latest_pads_short_buffers() {
        let tap = AudioTap::with_capacity(16_000, 8);
        tap.push(&[0.1, 0.2]);
        assert_eq!(tap.latest(4), vec![0.0, 0.0, 0.1, 0.2]);
    }

    #[test]
    fn push_keeps_only_the_newest_samples() {
        let tap = AudioTap::with_capacity(16_000, 4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0]);
        assert_eq!(tap.len(), 4);
        assert_eq!(tap.latest(4), vec![2.0, 3.0, 4.0, 5.0]);

        tap.push(&[6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(tap.latest(4), vec![7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn clones_share_the_buffer_and_close_flag() {
        let tap = AudioTap::new(24_000);
        let writer = tap.clone();
        writer.push_pcm16(&[16_384, -32_768]);
        assert_eq!(tap.latest(2), vec![0.5, -1.0]);

        writer.close();
        assert!(tap.is_closed());
        assert!(tap.is_empty());
        tap.push(&[1.0]);
        assert!(tap.is_empty());
    }

    #[test]
    fn overflowing_push_evicts_exactly_the_oldest() {
        let tap = AudioTap::with_capacity(24_000, 3);
        tap.push(&[1.0, 2.0]);
        tap.push(&[3.0, 4.0]);
        assert_eq!(tap.latest(3), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn poisoned_buffer_keeps_working() {
        let tap = AudioTap::with_capacity(24_000, 4);
        tap.push(&[0.5]);
        let holder = tap.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.inner.samples.lock().unwrap();
            panic!("poison the tap");
        })
        .join();
        assert!(tap.inner.samples.is_poisoned());

        tap.push(&[0.25]);
        assert_eq!(tap.len(), 2);
        assert_eq!(tap.latest(2), vec![0.5, 0.25]);
        tap.clear();
        assert!(tap.is_empty());
    }

    #[test]
    fn pcm16_decoding_ignores_trailing_byte() {
        assert_eq!(pcm16_from_le_bytes(&[0x00, 0x40, 0xff, 0xff, 0x01]), vec![16_384, -1]);
    }
}
