/*
MIT License

Copyright (c) 2024 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/
//! Module for [`WindowedStats`], i.e. statistics over the most recent values
//! of a stream.

use core::ops::Index;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use thiserror::Error;

/// The requested capacity can't hold any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capacity of a windowed statistics buffer must be positive, got {0}")]
pub struct InvalidCapacityError(pub usize);

/// Fixed-capacity window over the most recent scalar values of a stream.
///
/// Once full, every [`WindowedStats::push`] evicts the oldest value. Index `0`
/// always refers to the oldest value and `len() - 1` to the newest one.
///
/// Mean and variance are recomputed from the current contents on every call.
/// As the window is bounded, this is cheap regardless of how long the stream
/// already runs.
#[derive(Debug)]
pub struct WindowedStats {
    values: AllocRingBuffer<f64>,
}

impl WindowedStats {
    /// Creates an empty window that holds at most `capacity` values.
    pub fn new(capacity: usize) -> Result<Self, InvalidCapacityError> {
        if capacity == 0 {
            return Err(InvalidCapacityError(capacity));
        }
        Ok(Self {
            values: AllocRingBuffer::new(capacity),
        })
    }

    /// Adds a value. If the window is full, the oldest value is overwritten.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Number of values currently in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.values.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Returns the value at `index` (`0` is the oldest), if present.
    #[inline]
    pub fn get(&self, index: usize) -> Option<f64> {
        (index < self.len()).then(|| self.values[index])
    }

    /// Arithmetic mean of the current contents. `0.0` for an empty window.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.len() as f64
    }

    /// Sample variance (Bessel-corrected, divisor `len() - 1`) of the current
    /// contents. `0.0` if the window holds less than two values.
    pub fn variance(&self) -> f64 {
        let count = self.len();
        if count <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let sum_squared_diff = self
            .values
            .iter()
            .map(|value| {
                let diff = value - mean;
                diff * diff
            })
            .sum::<f64>();

        sum_squared_diff / (count - 1) as f64
    }

    /// Iterates the values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Removes all values. The capacity stays the same.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl Index<usize> for WindowedStats {
    type Output = f64;

    /// Panics if `index` is not in `0..len()`.
    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        assert!(
            index < self.len(),
            "index {index} out of range for window with {} values",
            self.len()
        );
        &self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use float_cmp::approx_eq;
    use std::vec::Vec;

    #[test]
    fn zero_capacity_is_rejected() {
        check!(WindowedStats::new(0).unwrap_err() == InvalidCapacityError(0));
        check!(WindowedStats::new(1).is_ok());
    }

    #[test]
    fn len_is_bounded_by_capacity() {
        const CAPACITY: usize = 43;
        let mut stats = WindowedStats::new(CAPACITY).unwrap();

        for n in 1..=(CAPACITY * 3) {
            stats.push(n as f64);
            check!(stats.len() == n.min(CAPACITY));
            check!(stats.is_full() == (n >= CAPACITY));
            check!(stats.capacity() == CAPACITY);
        }
    }

    #[test]
    fn oldest_value_is_at_index_zero() {
        let mut stats = WindowedStats::new(4).unwrap();
        stats.push(1.0);
        stats.push(2.0);
        check!(stats[0] == 1.0);
        check!(stats[1] == 2.0);

        // overflow: 1.0 and 2.0 get evicted
        for value in [3.0, 4.0, 5.0, 6.0] {
            stats.push(value);
        }
        check!(stats.iter().collect::<Vec<_>>() == [3.0, 4.0, 5.0, 6.0]);

        // After N >= C pushes, [0] is the value pushed C pushes ago.
        for n in 7..100 {
            stats.push(n as f64);
            check!(stats[0] == (n - 3) as f64);
            check!(stats[stats.len() - 1] == n as f64);
        }
    }

    #[test]
    #[should_panic]
    fn index_out_of_range_panics() {
        let mut stats = WindowedStats::new(4).unwrap();
        stats.push(1.0);
        let _ = stats[1];
    }

    #[test]
    fn get_is_checked() {
        let mut stats = WindowedStats::new(2).unwrap();
        check!(stats.get(0) == None);
        stats.push(7.0);
        check!(stats.get(0) == Some(7.0));
        check!(stats.get(1) == None);
    }

    #[test]
    fn mean_and_variance() {
        let mut stats = WindowedStats::new(8).unwrap();
        check!(stats.mean() == 0.0);
        check!(stats.variance() == 0.0);

        stats.push(4.0);
        check!(stats.mean() == 4.0);
        check!(stats.variance() == 0.0, "a single value has no variance");

        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(value);
        }
        // window now holds [2, 4, 4, 4, 5, 5, 7, 9]
        check!(stats.mean() == 5.0);
        check!(approx_eq!(f64, stats.variance(), 32.0 / 7.0, ulps = 4));
    }

    #[test]
    fn variance_of_equal_values_is_zero() {
        let mut stats = WindowedStats::new(16).unwrap();
        for _ in 0..40 {
            stats.push(0.125);
            check!(stats.variance() == 0.0);
        }
    }

    #[test]
    fn variance_is_never_negative() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xbeef);
        let mut stats = WindowedStats::new(43).unwrap();
        for _ in 0..1000 {
            stats.push(rng.random_range(-1000.0..1000.0));
            check!(stats.variance() >= 0.0);
        }
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut stats = WindowedStats::new(3).unwrap();
        for value in [1.0, 2.0, 3.0, 4.0] {
            stats.push(value);
        }
        stats.clear();
        check!(stats.is_empty());
        check!(stats.capacity() == 3);
        check!(stats.mean() == 0.0);

        stats.push(9.0);
        check!(stats[0] == 9.0);
    }
}
