//! # Load History
//!
//! Fixed-size ring of recent run-queue samples with a running sum, used to
//! smooth the hotplug controller's input.
//!
//! ```text
//!   push(s):  sum -= buf[cursor]; buf[cursor] = s; sum += s;
//!             cursor = (cursor + 1) % N
//! ```
//!
//! Every update is O(1) and `sum` always equals the buffer total. Samples
//! are clamped to `u32::MAX / N` so the sum cannot overflow.

use crate::config::HISTORY_SIZE;

/// Ring buffer of the `N` most recent load samples.
#[derive(Debug, Clone)]
pub struct LoadHistory<const N: usize = HISTORY_SIZE> {
    samples: [u32; N],
    sum: u32,
    cursor: usize,
}

impl<const N: usize> LoadHistory<N> {
    const NON_EMPTY: () = assert!(N > 0, "load history needs at least one slot");

    /// Largest sample accepted without risking overflow of the sum.
    pub const MAX_SAMPLE: u32 = u32::MAX / N as u32;

    pub const fn new() -> Self {
        let () = Self::NON_EMPTY;
        Self {
            samples: [0; N],
            sum: 0,
            cursor: 0,
        }
    }

    /// Evict the oldest sample, insert `sample`, and return the new average.
    pub fn push(&mut self, sample: u32) -> u32 {
        let sample = sample.min(Self::MAX_SAMPLE);
        self.sum -= self.samples[self.cursor];
        self.samples[self.cursor] = sample;
        self.sum += sample;
        self.cursor = (self.cursor + 1) % N;
        self.average()
    }

    /// Overwrite every slot with `value`.
    pub fn fill(&mut self, value: u32) {
        let value = value.min(Self::MAX_SAMPLE);
        self.samples = [value; N];
        self.sum = value * N as u32;
    }

    /// Truncating mean of the buffered samples.
    #[inline]
    pub fn average(&self) -> u32 {
        self.sum / N as u32
    }

    #[inline]
    pub fn sum(&self) -> u32 {
        self.sum
    }

    /// Raw samples in storage order (not age order).
    pub fn samples(&self) -> &[u32; N] {
        &self.samples
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for LoadHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
