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
//! Tempo estimation strategies.
//!
//! Each strategy implements [`TempoEstimator`] and keeps its own state across
//! frames. The [`DetectionOrchestrator`] runs all registered strategies side
//! by side and merges their results, so adding a new strategy never requires
//! changes elsewhere.
//!
//! [`DetectionOrchestrator`]: crate::DetectionOrchestrator

use crate::{AudioFrame, BeatEstimate};
use core::fmt::Debug;
use std::boxed::Box;
use std::string::String;
use thiserror::Error;

pub mod energy_variance;
pub mod lowpass;

pub use energy_variance::{EnergyVarianceEstimator, EnergyVarianceParams, InvalidParamsError};
pub use lowpass::LowpassEnergyVarianceEstimator;

/// Possible errors of a single [`TempoEstimator::estimate`] invocation.
///
/// An error only affects the estimator that raised it and only for the frame
/// at hand.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    /// The frame contains NaN or infinite values.
    #[error("sample #{index} is not finite: {value}")]
    NonFiniteSample { index: usize, value: f32 },
    /// The sample rate can't represent the frequencies the estimator needs.
    #[error("sample rate of {sample_rate} Hz is too low for a cutoff frequency of {cutoff_hz} Hz")]
    SampleRateTooLow { sample_rate: u32, cutoff_hz: f32 },
    /// Any other failure of a custom estimator.
    #[error("{0}")]
    Other(String),
}

/// Common abstraction over a tempo estimation strategy. Each strategy consumes
/// ongoing audio frames, for example from an audio input device, and keeps an
/// internal state to relate the latest frame to previous ones.
///
/// Implementations must not share mutable state with other estimators: the
/// orchestrator runs them in parallel.
pub trait TempoEstimator: Send + Debug {
    /// Unique, human readable name. Used as key for the estimates.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Amount of mono samples the estimator needs to see before it can
    /// produce meaningful results. Before that, it emits invalid estimates
    /// rather than failing.
    fn minimum_samples(&self) -> usize;

    /// Whether the estimator can only work on a complete track. Such
    /// estimators are unsuited for live audio.
    fn requires_full_audio(&self) -> bool;

    /// Consumes the next frame of the stream and returns the current tempo
    /// estimate that takes all frames since the last [`Self::reset`] into
    /// account.
    fn estimate(&mut self, frame: &AudioFrame) -> Result<BeatEstimate, EstimatorError>;

    /// Drops all internal state. Afterwards, the estimator behaves exactly
    /// like a newly constructed one.
    fn reset(&mut self);
}

/// Enum that conveniently makes all [`TempoEstimator`]s provided by this
/// crate accessible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    /// Corresponds to [`EnergyVarianceEstimator`].
    EnergyVariance,
    /// Corresponds to [`LowpassEnergyVarianceEstimator`].
    LowpassEnergyVariance,
}

impl EstimatorKind {
    /// All estimators of this crate.
    pub const ALL: [Self; 2] = [Self::EnergyVariance, Self::LowpassEnergyVariance];

    /// Creates a concrete estimator with its default parameters.
    pub fn create(self) -> Box<dyn TempoEstimator> {
        match self {
            Self::EnergyVariance => Box::new(EnergyVarianceEstimator::new()),
            Self::LowpassEnergyVariance => Box::new(LowpassEnergyVarianceEstimator::new()),
        }
    }
}
