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
//! Module for [`DetectionOrchestrator`].

use crate::consensus::{compute_consensus, ConsensusConfig, CONSENSUS_KEY};
use crate::strategies::{EstimatorKind, TempoEstimator};
use crate::{AudioFrame, BeatEstimate};
use rayon::prelude::*;
use std::any::Any;
use std::boxed::Box;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::time::{Duration, Instant};
use std::vec::Vec;
use thiserror::Error;

/// Possible errors when registering a [`TempoEstimator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("an estimator named '{0}' is already registered")]
    DuplicateName(String),
    #[error("'{CONSENSUS_KEY}' is reserved for the consensus estimate")]
    ReservedName,
}

/// A failure of a single estimator in a single round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorFailure {
    pub algorithm: String,
    pub message: String,
    /// Round in which the failure happened.
    pub round: u64,
}

/// State of the detection after a round.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSnapshot {
    /// Number of the round, starting at 1 after each start.
    pub round: u64,
    /// Stream time processed since the detection was started.
    pub stream_time: Duration,
    /// Latest valid estimate of each algorithm, plus the consensus under
    /// [`CONSENSUS_KEY`].
    pub estimates: BTreeMap<String, BeatEstimate>,
}

impl DetectionSnapshot {
    /// The consensus estimate, if any valid estimate exists.
    pub fn consensus(&self) -> Option<&BeatEstimate> {
        self.estimates.get(CONSENSUS_KEY)
    }

    /// The consensus tempo or `0.0` if there is no consensus yet.
    pub fn consensus_bpm(&self) -> f32 {
        self.consensus().map(|consensus| consensus.bpm).unwrap_or(0.0)
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub snapshot: DetectionSnapshot,
    /// What each estimator returned this round, in registration order.
    /// Failed estimators are represented by an invalid placeholder.
    pub round_estimates: Vec<BeatEstimate>,
    pub failures: Vec<EstimatorFailure>,
}

/// Runs a set of [`TempoEstimator`]s on every frame and merges their results
/// into a consensus.
///
/// The estimators of a round run in parallel, each on its own state. A failing
/// (or panicking) estimator only affects its own result in that round. The
/// latest valid estimate of every estimator is retained until it is replaced
/// by a newer valid one, so a transient failure doesn't drop the tempo to
/// zero.
///
/// Rounds are serialized by `&mut self`: an estimator never sees two frames
/// at the same time.
#[derive(Debug)]
pub struct DetectionOrchestrator {
    estimators: Vec<Box<dyn TempoEstimator>>,
    retained: BTreeMap<String, BeatEstimate>,
    config: ConsensusConfig,
    running: bool,
    round: u64,
    stream_time: Duration,
}

impl DetectionOrchestrator {
    /// Creates an orchestrator without any estimator.
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            estimators: Vec::new(),
            retained: BTreeMap::new(),
            config,
            running: false,
            round: 0,
            stream_time: Duration::ZERO,
        }
    }

    /// Creates an orchestrator with all estimators of [`EstimatorKind::ALL`].
    pub fn with_default_estimators(config: ConsensusConfig) -> Self {
        let mut this = Self::new(config);
        this.estimators = EstimatorKind::ALL.iter().map(|kind| kind.create()).collect();
        this
    }

    /// Adds an estimator. Its name must be unique.
    pub fn register(&mut self, estimator: Box<dyn TempoEstimator>) -> Result<(), RegistryError> {
        let name = estimator.name();
        if name == CONSENSUS_KEY {
            return Err(RegistryError::ReservedName);
        }
        if self.estimators.iter().any(|e| e.name() == name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        log::debug!("registered estimator '{name}'");
        self.estimators.push(estimator);
        Ok(())
    }

    /// Names of the registered estimators in registration order.
    pub fn estimator_names(&self) -> Vec<&str> {
        self.estimators.iter().map(|e| e.name()).collect()
    }

    pub const fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Resets all estimators, forgets all estimates, and starts accepting
    /// frames. Does nothing if already running.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.estimators.iter_mut().for_each(|e| e.reset());
        self.retained.clear();
        self.round = 0;
        self.stream_time = Duration::ZERO;
        self.running = true;
        log::debug!("detection started with {} estimators", self.estimators.len());
    }

    /// Stops accepting frames. Does nothing if already stopped. The state is
    /// kept until the next [`Self::start`].
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        log::debug!("detection stopped after {} rounds", self.round);
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Latest valid estimate of each algorithm and the consensus.
    pub const fn estimates(&self) -> &BTreeMap<String, BeatEstimate> {
        &self.retained
    }

    pub fn consensus(&self) -> Option<&BeatEstimate> {
        self.retained.get(CONSENSUS_KEY)
    }

    /// Dispatches the frame to all estimators, merges their valid estimates,
    /// and recomputes the consensus. Returns `None` if the detection is not
    /// running.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<RoundOutcome> {
        if !self.running {
            log::trace!("ignoring frame: detection is not running");
            return None;
        }

        let begin = Instant::now();
        self.round += 1;
        self.stream_time += frame.duration();
        let round = self.round;
        let stream_time = self.stream_time;

        let results = self
            .estimators
            .par_iter_mut()
            .map(|estimator| run_estimator(estimator.as_mut(), frame))
            .collect::<Vec<_>>();

        let mut round_estimates = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (algorithm, result) in results {
            match result {
                Ok(estimate) => {
                    if estimate.is_valid() {
                        self.retained.insert(algorithm, estimate.clone());
                    }
                    round_estimates.push(estimate);
                }
                Err(message) => {
                    log::warn!("estimator '{algorithm}' failed in round {round}: {message}");
                    round_estimates.push(BeatEstimate::invalid(algorithm.as_str(), stream_time));
                    failures.push(EstimatorFailure {
                        algorithm,
                        message,
                        round,
                    });
                }
            }
        }

        let consensus = compute_consensus(
            self.retained
                .iter()
                .filter(|(name, _)| name.as_str() != CONSENSUS_KEY)
                .map(|(_, estimate)| estimate),
            &self.config,
            stream_time,
        );
        if let Some(consensus) = consensus {
            self.retained.insert(CONSENSUS_KEY.to_string(), consensus);
        }

        log::trace!(
            "round {round} took {:?}: consensus {:?} BPM",
            begin.elapsed(),
            self.consensus().map(|c| c.bpm)
        );

        Some(RoundOutcome {
            snapshot: DetectionSnapshot {
                round,
                stream_time,
                estimates: self.retained.clone(),
            },
            round_estimates,
            failures,
        })
    }
}

/// Runs a single estimator and turns errors and panics into a message.
fn run_estimator(
    estimator: &mut dyn TempoEstimator,
    frame: &AudioFrame,
) -> (String, Result<BeatEstimate, String>) {
    let name = estimator.name().to_string();
    let result = panic::catch_unwind(AssertUnwindSafe(|| estimator.estimate(frame)));
    let result = match result {
        Ok(Ok(mut estimate)) => {
            estimate.algorithm.clone_from(&name);
            Ok(estimate)
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    };
    (name, result)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<unknown>"
    }
}
