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

//! Synthetic audio for tests. All signals are deterministic.

use crate::strategies::TempoEstimator;
use crate::{AudioFrame, BeatEstimate};
use rand::{Rng, SeedableRng};
use std::vec::Vec;

/// Sampling rate of all generated signals.
pub const SAMPLE_RATE: u32 = 44100;

/// Click period of [`click_track`]: exactly 22 sub-frames of the
/// energy-variance estimator, so that beats land on the sub-frame grid.
pub const CLICK_PERIOD_SAMPLES: usize = 22 * 1024;

/// Length of a single click (kick drum like burst).
const CLICK_LEN: usize = 1024;
const CLICK_FREQUENCY_HZ: f32 = 80.0;
const CLICK_AMPLITUDE: f32 = 0.8;

/// Returns `len` mono samples of a perfectly periodic click track with
/// [`CLICK_PERIOD_SAMPLES`]. The first click starts at sample 0.
pub fn click_track(len: usize) -> Vec<f32> {
    click_track_with_period(len, CLICK_PERIOD_SAMPLES)
}

/// Like [`click_track`] but with a custom period (in samples).
pub fn click_track_with_period(len: usize, period: usize) -> Vec<f32> {
    assert!(period > CLICK_LEN);
    (0..len)
        .map(|i| i % period)
        .map(|pos| {
            if pos < CLICK_LEN {
                let t = pos as f32 / SAMPLE_RATE as f32;
                CLICK_AMPLITUDE * (2.0 * core::f32::consts::PI * CLICK_FREQUENCY_HZ * t).sin()
            } else {
                0.0
            }
        })
        .collect()
}

/// The tempo of [`click_track`].
pub fn click_track_bpm() -> f32 {
    60.0 * SAMPLE_RATE as f32 / CLICK_PERIOD_SAMPLES as f32
}

/// Uniform white noise in range `-0.5..0.5`.
pub fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-0.5..0.5)).collect()
}

/// Splits the samples into mono frames of `chunk_size` and feeds them to
/// the estimator. Returns one estimate per frame.
pub fn feed_mono(
    estimator: &mut dyn TempoEstimator,
    samples: &[f32],
    chunk_size: usize,
) -> Vec<BeatEstimate> {
    mono_frames(samples, chunk_size)
        .iter()
        .map(|frame| estimator.estimate(frame).unwrap())
        .collect()
}

/// Splits the samples into mono frames of `chunk_size`. The last frame may
/// be shorter.
pub fn mono_frames(samples: &[f32], chunk_size: usize) -> Vec<AudioFrame> {
    samples
        .chunks(chunk_size)
        .map(|chunk| AudioFrame::mono_from(chunk.to_vec(), SAMPLE_RATE).unwrap())
        .collect()
}

#[test]
fn test_click_track_is_as_expected() {
    let samples = click_track(CLICK_PERIOD_SAMPLES * 2);
    assert_eq!(samples.len(), CLICK_PERIOD_SAMPLES * 2);
    assert_eq!(samples[0], 0.0);
    assert!(samples[..CLICK_LEN].iter().any(|s| s.abs() > 0.5));
    assert!(samples[CLICK_LEN..CLICK_PERIOD_SAMPLES]
        .iter()
        .all(|&s| s == 0.0));
    assert_eq!(
        samples[..CLICK_PERIOD_SAMPLES],
        samples[CLICK_PERIOD_SAMPLES..]
    );
    assert!((click_track_bpm() - 117.45).abs() < 0.01);
}
