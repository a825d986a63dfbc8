//! Seeded xorshift64 PRNG used for sampling and initialization.
//!
//! The engine never draws randomness from the environment: every stochastic
//! pass (training-set sampling, centroid init, build order shuffling,
//! subspace iteration seeds) takes an explicit seed so runs are reproducible
//! under the sequential pool.

#[derive(Debug, Clone)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub(crate) fn new(seed: u64) -> Self {
        // A zero state would be a fixed point.
        Self {
            state: (seed ^ 0x5DEE_CE66_D1A4_B5B5) | 1,
        }
    }

    #[inline]
    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        s
    }

    /// Uniform draw from `[0, bound)`.
    #[inline]
    pub(crate) fn next_below(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }

    /// Uniform draw from `[0, 1)`.
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// In-place Fisher-Yates shuffle.
    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i + 1);
            items.swap(i, j);
        }
    }

    /// Draws `count` distinct indices from `[0, n)`.
    ///
    /// Uses a partial Fisher-Yates over the index set; `count` is clamped
    /// to `n`.
    pub(crate) fn sample_indices(&mut self, n: usize, count: usize) -> Vec<usize> {
        let count = count.min(n);
        let mut indices: Vec<usize> = (0..n).collect();
        for i in 0..count {
            let j = i + self.next_below(n - i);
            indices.swap(i, j);
        }
        indices.truncate(count);
        indices
    }
}
