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
//! Energy-variance tempo estimation on the low-frequency part of the signal.
//!
//! Kick drums and bass lines carry the beat in most music. Filtering
//! everything else out before looking at the energy makes the onsets more
//! pronounced, especially for dense mixes where hi-hats and vocals keep the
//! overall energy high.

use super::energy_variance::{
    check_finite, EnergyVarianceEstimator, EnergyVarianceParams, InvalidParamsError,
};
use super::{EstimatorError, TempoEstimator};
use crate::{AudioFrame, BeatEstimate};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use std::vec::Vec;

const NAME: &str = "Lowpass Energy Variance";
const DESCRIPTION: &str = "Energy variance beat detection on the lowpassed signal";

/// Cutoff frequency for the lowpass filter to detect beats.
pub const CUTOFF_FREQUENCY_HZ: f32 = 95.0;

/// Lowpass filter for one sample rate.
#[derive(Debug)]
struct LowpassFilter {
    sample_rate: u32,
    filter: DirectForm2Transposed<f32>,
}

impl LowpassFilter {
    fn new(sample_rate: u32) -> Result<Self, EstimatorError> {
        let too_low = || EstimatorError::SampleRateTooLow {
            sample_rate,
            cutoff_hz: CUTOFF_FREQUENCY_HZ,
        };
        // Nyquist
        if (sample_rate as f32) <= CUTOFF_FREQUENCY_HZ * 2.0 {
            return Err(too_low());
        }

        let f0 = CUTOFF_FREQUENCY_HZ.hz();
        let fs = (sample_rate as f32).hz();
        let coefficients =
            Coefficients::<f32>::from_params(Type::LowPass, fs, f0, Q_BUTTERWORTH_F32)
                .map_err(|_| too_low())?;

        log::debug!("created {CUTOFF_FREQUENCY_HZ} Hz lowpass filter for {sample_rate} Hz");
        Ok(Self {
            sample_rate,
            filter: DirectForm2Transposed::<f32>::new(coefficients),
        })
    }
}

/// Runs the mono signal through a second-order Butterworth lowpass filter
/// before applying the [`EnergyVarianceEstimator`] algorithm.
///
/// The filter is created from the sample rate of the first frame. Its state
/// carries over from frame to frame, so the stream is filtered seamlessly.
#[derive(Debug)]
pub struct LowpassEnergyVarianceEstimator {
    inner: EnergyVarianceEstimator,
    /// Created lazily as the sample rate is only known with the first frame.
    filter: Option<LowpassFilter>,
}

impl LowpassEnergyVarianceEstimator {
    /// Creates a new estimator with the default parameters.
    pub fn new() -> Self {
        Self {
            inner: EnergyVarianceEstimator::new(),
            filter: None,
        }
    }

    /// Creates a new estimator with custom parameters of the underlying
    /// energy-variance algorithm.
    pub fn with_params(params: EnergyVarianceParams) -> Result<Self, InvalidParamsError> {
        Ok(Self {
            inner: EnergyVarianceEstimator::with_params(params)?,
            filter: None,
        })
    }

    /// Access to the underlying energy-variance state.
    pub const fn inner(&self) -> &EnergyVarianceEstimator {
        &self.inner
    }

    /// Returns the filter for `sample_rate`. A new filter is created if the
    /// sample rate changed.
    fn filter_for(&mut self, sample_rate: u32) -> Result<&mut LowpassFilter, EstimatorError> {
        match self.filter.take() {
            Some(filter) if filter.sample_rate == sample_rate => Ok(self.filter.insert(filter)),
            previous => {
                if let Some(previous) = previous {
                    log::debug!(
                        "sample rate changed from {} Hz to {sample_rate} Hz",
                        previous.sample_rate
                    );
                }
                let filter = LowpassFilter::new(sample_rate)?;
                Ok(self.filter.insert(filter))
            }
        }
    }
}

impl Default for LowpassEnergyVarianceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoEstimator for LowpassEnergyVarianceEstimator {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn minimum_samples(&self) -> usize {
        self.inner.minimum_samples()
    }

    fn requires_full_audio(&self) -> bool {
        false
    }

    fn estimate(&mut self, frame: &AudioFrame) -> Result<BeatEstimate, EstimatorError> {
        let mono = frame.mono();
        check_finite(&mono)?;

        let filter = self.filter_for(frame.sample_rate())?;
        let lowpassed = mono
            .iter()
            .map(|&sample| filter.filter.run(sample))
            .collect::<Vec<_>>();

        Ok(self.inner.analyze(NAME, &lowpassed, frame.sample_rate()))
    }

    fn reset(&mut self) {
        self.inner.reset();
        if let Some(filter) = self.filter.as_mut() {
            filter.filter.reset_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, SAMPLE_RATE};
    use assert2::check;

    #[test]
    fn converges_on_click_track() {
        let mut estimator = LowpassEnergyVarianceEstimator::new();
        let samples = test_utils::click_track(SAMPLE_RATE as usize * 10);
        let last = test_utils::feed_mono(&mut estimator, &samples, 8192)
            .pop()
            .unwrap();

        let expected_bpm = test_utils::click_track_bpm();
        check!(last.algorithm == NAME);
        check!(last.is_valid());
        check!((last.bpm - expected_bpm).abs() / expected_bpm < 0.02);
        check!(last.confidence > 0.99);
    }

    #[test]
    fn rejects_sample_rate_below_nyquist() {
        let mut estimator = LowpassEnergyVarianceEstimator::new();
        let frame = AudioFrame::mono_from(vec![0.0; 16], 150).unwrap();
        check!(
            estimator.estimate(&frame)
                == Err(EstimatorError::SampleRateTooLow {
                    sample_rate: 150,
                    cutoff_hz: CUTOFF_FREQUENCY_HZ
                })
        );
        check!(estimator.inner().sample_count() == 0);
    }

    #[test]
    fn sample_rate_change_recreates_filter() {
        let mut estimator = LowpassEnergyVarianceEstimator::new();
        let frame = AudioFrame::mono_from(vec![0.1; 64], 44100).unwrap();
        check!(estimator.estimate(&frame).is_ok());
        let frame = AudioFrame::mono_from(vec![0.1; 64], 48000).unwrap();
        check!(estimator.estimate(&frame).is_ok());
        check!(estimator.filter.as_ref().map(|f| f.sample_rate) == Some(48000));
    }

    #[test]
    fn reset_is_idempotent() {
        let samples = test_utils::click_track(SAMPLE_RATE as usize * 6);

        let mut fresh = LowpassEnergyVarianceEstimator::new();
        let expected = test_utils::feed_mono(&mut fresh, &samples, 4096);

        let mut reused = LowpassEnergyVarianceEstimator::new();
        let _ = test_utils::feed_mono(&mut reused, &test_utils::noise(20000, 7), 4096);
        reused.reset();
        let actual = test_utils::feed_mono(&mut reused, &samples, 4096);
        check!(actual == expected);
    }
}
