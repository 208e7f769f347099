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
//! bpm-consensus estimates the tempo (BPM) of live audio.
//!
//! Several independent [`TempoEstimator`]s look at every [`AudioFrame`]. A
//! [`DetectionOrchestrator`] runs them in parallel, keeps the latest valid
//! [`BeatEstimate`] of each, and merges them into one consensus estimate.
//! The consensus is octave-aware: an estimator that locked onto the double
//! or half tempo still counts as agreeing.
//!
//! # Example
//!
//! ```rust
//! use bpm_consensus::{AudioFrame, DetectionOrchestrator};
//!
//! let mut orchestrator = DetectionOrchestrator::with_default_estimators(Default::default());
//! orchestrator.start();
//!
//! // 1 s of silence, in stereo
//! let frame = AudioFrame::with_capacity(2 * 44100, 44100, 2).unwrap();
//! let outcome = orchestrator.process_frame(&frame).unwrap();
//! // not enough audio for a tempo yet
//! assert_eq!(outcome.snapshot.consensus_bpm(), 0.0);
//! ```
//!
//! For live input, move the orchestrator onto a worker thread with a
//! [`DetectionService`] and feed it from `recording::start_capture`
//! (feature `recording`).
//!
//! # Logging
//!
//! This crate logs via the [`log`] facade and never installs a logger.

pub mod consensus;
pub mod conversion;
mod estimate;
mod frame;
mod frame_assembler;
mod orchestrator;
#[cfg(feature = "recording")]
pub mod recording;
mod service;
pub mod strategies;
mod window_stats;

#[cfg(test)]
mod test_utils;

pub use consensus::{ConsensusConfig, CONSENSUS_KEY};
pub use estimate::{BeatEstimate, MetadataValue, DEFAULT_OCTAVE_TOLERANCE, MAX_VALID_BPM};
pub use frame::{energy, AudioFrame, FrameError};
pub use frame_assembler::{FrameAssembler, DEFAULT_FRAME_LEN};
pub use orchestrator::{
    DetectionOrchestrator, DetectionSnapshot, EstimatorFailure, RegistryError, RoundOutcome,
};
pub use service::{DetectionService, FrameSink, ServiceConfig, SinkClosedError, SpawnServiceError};
pub use strategies::{EstimatorError, EstimatorKind, TempoEstimator};
pub use window_stats::{InvalidCapacityError, WindowedStats};
