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
//! Streaming tempo estimation based on the variance of short-time energy.
//!
//! The algorithm follows the "sound energy" approach from Frédéric Patin's
//! *Beat Detection Algorithms*:
//!
//! 1. The mono signal is split into sub-frames of 1024 samples and the
//!    instant energy (sum of squares) of each sub-frame is computed.
//! 2. The energies of the last 43 sub-frames (~1 s at 44.1 kHz) form the
//!    local average. A sub-frame is an onset if its energy exceeds the local
//!    average by a factor `C`, which shrinks as the variance of the window
//!    grows: in dynamic passages, a smaller spike suffices.
//! 3. Onsets closer than 250 ms to the previous beat are ignored.
//! 4. The tempo is derived from the trimmed median of the last 20
//!    inter-beat intervals. Their spread yields the confidence.

use super::{EstimatorError, TempoEstimator};
use crate::estimate::MetadataValue;
use crate::frame::energy;
use crate::window_stats::{InvalidCapacityError, WindowedStats};
use crate::{AudioFrame, BeatEstimate};
use core::ops::RangeInclusive;
use ringbuffer::{AllocRingBuffer, RingBuffer};
use std::time::Duration;
use std::vec::Vec;
use thiserror::Error;

const NAME: &str = "Energy Variance";
const DESCRIPTION: &str = "Energy variance beat detection";

/// Metadata key: number of beats detected since the last reset.
pub const META_BEAT_COUNT: &str = "beat_count";
/// Metadata key: current variance of the energy history.
pub const META_ENERGY_VARIANCE: &str = "energy_variance";

/// Parameters of the energy-variance algorithm. [`Default`] yields the
/// well-tested values; there is rarely a reason to change them.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyVarianceParams {
    /// Mono samples per sub-frame for which the instant energy is computed.
    pub sub_frame_size: usize,
    /// Number of sub-frames in the energy history.
    pub history_size: usize,
    /// Below this variance, the window counts as calm.
    pub min_variance: f64,
    pub mid_variance: f64,
    /// Above this variance, the window counts as very dynamic.
    pub max_variance: f64,
    /// Minimum stream time between two beats, in seconds.
    pub min_beat_gap_s: f64,
    /// Amount of intervals needed before a tempo is reported.
    pub min_intervals: usize,
    /// Amount of most recent intervals the tempo is derived from.
    pub interval_window: usize,
    /// Fraction of intervals dropped from each tail before taking the median.
    pub trim_fraction: f64,
    /// Octave correction is only applied above this confidence (exclusive).
    pub octave_correction_confidence: f32,
    /// Trusted estimates outside of this range are doubled or halved.
    pub octave_range_bpm: RangeInclusive<f64>,
}

impl Default for EnergyVarianceParams {
    fn default() -> Self {
        Self {
            sub_frame_size: 1024,
            history_size: 43,
            min_variance: 0.0025,
            mid_variance: 0.01,
            max_variance: 0.02,
            min_beat_gap_s: 0.25,
            min_intervals: 5,
            interval_window: 20,
            trim_fraction: 0.1,
            octave_correction_confidence: 0.5,
            octave_range_bpm: 60.0..=180.0,
        }
    }
}

/// Possible errors when creating an estimator from [`EnergyVarianceParams`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidParamsError {
    #[error("sub-frame size must be positive")]
    ZeroSubFrameSize,
    #[error("invalid energy history: {0}")]
    History(#[from] InvalidCapacityError),
    #[error("at least one interval is needed to estimate a tempo")]
    ZeroIntervals,
    /// The interval history never holds enough intervals to report a tempo.
    #[error("{min_intervals} intervals are needed, but only {interval_window} are kept")]
    MinIntervalsExceedWindow {
        min_intervals: usize,
        interval_window: usize,
    },
    #[error("trim fraction {0} is not in range 0.0..0.5")]
    TrimFraction(f64),
    #[error("octave range {0:?} can't be reached by doubling or halving")]
    OctaveRange(RangeInclusive<f64>),
}

/// Computes the multiplier `C` for the local average energy above which a
/// sub-frame counts as onset. It is monotonically non-increasing in
/// `variance`.
pub fn adaptive_multiplier(variance: f64, params: &EnergyVarianceParams) -> f64 {
    if variance < params.min_variance {
        1.55
    } else if variance < params.mid_variance {
        1.4
    } else if variance < params.max_variance {
        1.3 - 10.0 * variance
    } else {
        1.25
    }
}

/// Doubles or halves `bpm` until it is inside the octave range. Only applied
/// if `confidence` is above the configured gate, as untrusted estimates are
/// better left as they are.
pub fn correct_octave(mut bpm: f64, confidence: f32, params: &EnergyVarianceParams) -> f64 {
    if confidence <= params.octave_correction_confidence || !bpm.is_normal() || bpm < 0.0 {
        return bpm;
    }
    while bpm < *params.octave_range_bpm.start() {
        bpm *= 2.0;
    }
    while bpm > *params.octave_range_bpm.end() {
        bpm /= 2.0;
    }
    bpm
}

/// Tempo derived from a series of inter-beat intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalTempo {
    /// Tempo before octave correction.
    pub bpm: f64,
    pub confidence: f32,
}

/// Derives the tempo from the most recent inter-beat intervals (in seconds,
/// oldest first).
///
/// Returns `None` if there are not enough intervals yet. Otherwise, the last
/// [`EnergyVarianceParams::interval_window`] intervals are sorted, the
/// extreme [`EnergyVarianceParams::trim_fraction`] is dropped from both
/// tails, and the median of the rest is the beat period. The confidence is
/// `1 - stddev / median`, clamped to `0.0..=1.0`.
pub fn tempo_from_intervals(
    intervals: &[f64],
    params: &EnergyVarianceParams,
) -> Option<IntervalTempo> {
    if intervals.len() < params.min_intervals {
        return None;
    }

    let recent_begin = intervals.len().saturating_sub(params.interval_window);
    let mut recent = intervals[recent_begin..].to_vec();
    recent.sort_by(f64::total_cmp);

    let remove_count = (recent.len() as f64 * params.trim_fraction) as usize;
    let trimmed = &recent[remove_count..recent.len() - remove_count];
    if trimmed.is_empty() {
        return None;
    }

    let median = trimmed[trimmed.len() / 2];
    if median <= 0.0 {
        return None;
    }
    let bpm = 60.0 / median;

    let coefficient_of_variation = sample_std_dev(trimmed) / median;
    let confidence = (1.0 - coefficient_of_variation).clamp(0.0, 1.0) as f32;

    Some(IntervalTempo { bpm, confidence })
}

/// Bessel-corrected standard deviation. `0.0` for less than two values.
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let sum_squared_diff = values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>();
    (sum_squared_diff / (values.len() - 1) as f64).sqrt()
}

/// Tempo estimator following the properties described in the
/// [module description].
///
/// [module description]: self
#[derive(Debug)]
pub struct EnergyVarianceEstimator {
    params: EnergyVarianceParams,
    /// Instant energies of the most recent sub-frames.
    energy_history: WindowedStats,
    /// Timestamps (stream time in seconds) of the most recent beats.
    beat_times: AllocRingBuffer<f64>,
    /// Most recent inter-beat intervals in seconds.
    beat_intervals: WindowedStats,
    /// Beats detected since the last reset.
    beat_count: usize,
    last_beat_time: Option<f64>,
    /// Stream time in seconds at the begin of the next frame.
    elapsed_s: f64,
    /// Mono samples consumed since the last reset.
    sample_count: usize,
}

impl EnergyVarianceEstimator {
    /// Creates a new estimator with the default parameters.
    pub fn new() -> Self {
        Self::with_params(EnergyVarianceParams::default())
            .expect("default parameters should be valid")
    }

    /// Creates a new estimator with custom parameters.
    pub fn with_params(params: EnergyVarianceParams) -> Result<Self, InvalidParamsError> {
        if params.sub_frame_size == 0 {
            return Err(InvalidParamsError::ZeroSubFrameSize);
        }
        if params.interval_window == 0 || params.min_intervals == 0 {
            return Err(InvalidParamsError::ZeroIntervals);
        }
        if params.min_intervals > params.interval_window {
            return Err(InvalidParamsError::MinIntervalsExceedWindow {
                min_intervals: params.min_intervals,
                interval_window: params.interval_window,
            });
        }
        if !(0.0..0.5).contains(&params.trim_fraction) {
            return Err(InvalidParamsError::TrimFraction(params.trim_fraction));
        }
        let (low, high) = (
            *params.octave_range_bpm.start(),
            *params.octave_range_bpm.end(),
        );
        if !(low > 0.0 && high >= 2.0 * low) {
            return Err(InvalidParamsError::OctaveRange(params.octave_range_bpm));
        }

        let energy_history = WindowedStats::new(params.history_size)?;
        let beat_intervals = WindowedStats::new(params.interval_window)?;
        let beat_times = AllocRingBuffer::new(params.interval_window + 1);

        Ok(Self {
            params,
            energy_history,
            beat_times,
            beat_intervals,
            beat_count: 0,
            last_beat_time: None,
            elapsed_s: 0.0,
            sample_count: 0,
        })
    }

    pub const fn params(&self) -> &EnergyVarianceParams {
        &self.params
    }

    /// Beats detected since the last reset.
    pub const fn beat_count(&self) -> usize {
        self.beat_count
    }

    /// Stream time consumed since the last reset.
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_s)
    }

    /// Mono samples consumed since the last reset.
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Timestamps (stream time) of the most recent beats, oldest first.
    pub fn recent_beats(&self) -> Vec<Duration> {
        self.beat_times
            .iter()
            .map(|&time| Duration::from_secs_f64(time))
            .collect()
    }

    /// Runs the algorithm on already downmixed (and possibly otherwise
    /// preprocessed) samples and reports the estimate under `algorithm`.
    ///
    /// The caller is responsible to only pass finite samples.
    pub(crate) fn analyze(
        &mut self,
        algorithm: &str,
        mono: &[f32],
        sample_rate: u32,
    ) -> BeatEstimate {
        let sample_rate = f64::from(sample_rate);
        let sub_frame_duration_s = self.params.sub_frame_size as f64 / sample_rate;

        for (i, sub_frame) in mono.chunks(self.params.sub_frame_size).enumerate() {
            let instant_energy = energy(sub_frame);
            self.energy_history.push(instant_energy);

            if self.energy_history.len() < self.params.history_size {
                continue;
            }

            let average_energy = self.energy_history.mean();
            let variance = self.energy_history.variance();
            let multiplier = adaptive_multiplier(variance, &self.params);

            if instant_energy > multiplier * average_energy {
                let current_time = self.elapsed_s + i as f64 * sub_frame_duration_s;
                self.on_onset(current_time);
            }
        }

        self.elapsed_s += mono.len() as f64 / sample_rate;
        self.sample_count += mono.len();

        self.create_estimate(algorithm)
    }

    /// Accepts the onset as beat unless it is too close to the previous one.
    fn on_onset(&mut self, time: f64) {
        if let Some(last_beat_time) = self.last_beat_time {
            let interval = time - last_beat_time;
            if interval < self.params.min_beat_gap_s {
                return;
            }
            self.beat_intervals.push(interval);
        }

        log::trace!("beat at {time:.3}s");
        self.beat_times.push(time);
        self.beat_count += 1;
        self.last_beat_time = Some(time);
    }

    fn create_estimate(&self, algorithm: &str) -> BeatEstimate {
        let timestamp = Duration::from_secs_f64(self.elapsed_s);
        let intervals = self.beat_intervals.iter().collect::<Vec<_>>();

        let mut estimate = match tempo_from_intervals(&intervals, &self.params) {
            Some(IntervalTempo { bpm, confidence }) => {
                let bpm = correct_octave(bpm, confidence, &self.params);
                let mut estimate = BeatEstimate::new(algorithm, bpm as f32, confidence, timestamp);
                estimate.alternative_bpms = vec![(bpm * 2.0) as f32, (bpm / 2.0) as f32];
                estimate
            }
            None => BeatEstimate::invalid(algorithm, timestamp),
        };

        estimate
            .metadata
            .insert(META_BEAT_COUNT.into(), MetadataValue::Count(self.beat_count));
        estimate.metadata.insert(
            META_ENERGY_VARIANCE.into(),
            MetadataValue::Number(self.energy_history.variance()),
        );
        estimate
    }
}

impl Default for EnergyVarianceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns an error for the first sample that is NaN or infinite.
pub(crate) fn check_finite(samples: &[f32]) -> Result<(), EstimatorError> {
    match samples.iter().position(|sample| !sample.is_finite()) {
        Some(index) => Err(EstimatorError::NonFiniteSample {
            index,
            value: samples[index],
        }),
        None => Ok(()),
    }
}

impl TempoEstimator for EnergyVarianceEstimator {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn minimum_samples(&self) -> usize {
        self.params.sub_frame_size * self.params.history_size
    }

    fn requires_full_audio(&self) -> bool {
        false
    }

    fn estimate(&mut self, frame: &AudioFrame) -> Result<BeatEstimate, EstimatorError> {
        let mono = frame.mono();
        check_finite(&mono)?;
        Ok(self.analyze(NAME, &mono, frame.sample_rate()))
    }

    fn reset(&mut self) {
        self.energy_history.clear();
        self.beat_times.clear();
        self.beat_intervals.clear();
        self.beat_count = 0;
        self.last_beat_time = None;
        self.elapsed_s = 0.0;
        self.sample_count = 0;
    }
}
