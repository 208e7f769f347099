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
//! Runs a [`DetectionOrchestrator`] on a dedicated worker thread.
//!
//! Audio producers (for example an audio input callback) hand frames to a
//! [`FrameSink`] without ever blocking. The worker processes one frame at a
//! time and publishes a [`DetectionSnapshot`] after every round.

use crate::orchestrator::{
    DetectionOrchestrator, DetectionSnapshot, EstimatorFailure, RoundOutcome,
};
use crate::AudioFrame;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::string::String;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Configuration of a [`DetectionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Number of frames waiting for the worker. When the queue is full, the
    /// oldest waiting frame is dropped.
    pub frame_queue_depth: usize,
    /// Capacity of the snapshot channel. When full, new snapshots are dropped.
    pub update_capacity: usize,
    /// Capacity of the failure channel. When full, new failures are dropped.
    pub error_capacity: usize,
    pub thread_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            frame_queue_depth: 1,
            update_capacity: 16,
            error_capacity: 64,
            thread_name: "bpm-detection".into(),
        }
    }
}

/// Possible errors when spawning a [`DetectionService`].
#[derive(Debug, Error)]
pub enum SpawnServiceError {
    #[error("the frame queue depth must be positive")]
    ZeroQueueDepth,
    #[error("failed to spawn the worker thread")]
    Spawn(#[from] std::io::Error),
}

/// The [`DetectionService`] behind a [`FrameSink`] is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the detection service was shut down")]
pub struct SinkClosedError;

/// A queued frame together with the detection session it was pushed in.
#[derive(Debug)]
struct SessionFrame {
    session: u64,
    frame: AudioFrame,
}

/// Cloneable, non-blocking input of a [`DetectionService`].
///
/// Frames are tagged with the session (the number of starts so far) at push
/// time. The worker discards frames of any other session, so frames queued
/// before a stop never leak into the next start.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: Sender<SessionFrame>,
    // Used to evict the oldest frame when the queue is full.
    rx: Receiver<SessionFrame>,
    session: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameSink {
    fn with_depth(depth: usize) -> Self {
        let (tx, rx) = bounded(depth);
        Self {
            tx,
            rx,
            session: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues the frame for the next round. If the queue is full, the oldest
    /// waiting frame is dropped in favor of this one. Never blocks.
    pub fn push(&self, frame: AudioFrame) -> Result<(), SinkClosedError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkClosedError);
        }

        let mut frame = SessionFrame {
            session: self.session.load(Ordering::Acquire),
            frame,
        };
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    // The worker may have taken the frame in the meantime.
                    if self.rx.try_recv().is_ok() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        log::warn!(
                            "detection can't keep up: dropped oldest frame ({dropped} in total)"
                        );
                    }
                    frame = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return Err(SinkClosedError),
            }
        }
    }

    /// Number of frames dropped so far because the worker was busy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Starts the given session.
    Start(u64),
    Stop,
}

/// Owns a worker thread that runs a [`DetectionOrchestrator`].
///
/// Dropping the service stops the worker and joins it.
#[derive(Debug)]
pub struct DetectionService {
    control_tx: Option<Sender<Command>>,
    sink: FrameSink,
    /// Whether the last command was a start.
    running: AtomicBool,
    updates: Receiver<DetectionSnapshot>,
    errors: Receiver<EstimatorFailure>,
    worker: Option<JoinHandle<()>>,
}

impl DetectionService {
    /// Moves the orchestrator onto a new worker thread. The detection is not
    /// running until [`Self::start`] is called.
    pub fn spawn(
        orchestrator: DetectionOrchestrator,
        config: ServiceConfig,
    ) -> Result<Self, SpawnServiceError> {
        if config.frame_queue_depth == 0 {
            return Err(SpawnServiceError::ZeroQueueDepth);
        }

        let sink = FrameSink::with_depth(config.frame_queue_depth);
        let (control_tx, control_rx) = bounded(16);
        let (updates_tx, updates) = bounded(config.update_capacity);
        let (errors_tx, errors) = bounded(config.error_capacity);

        let worker = Worker {
            orchestrator,
            control_rx,
            frame_rx: sink.rx.clone(),
            updates_tx,
            errors_tx,
        };
        let worker = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || worker.run())?;

        Ok(Self {
            control_tx: Some(control_tx),
            sink,
            running: AtomicBool::new(false),
            updates,
            errors,
            worker: Some(worker),
        })
    }

    /// Resets the detection and starts a new session. Only frames pushed
    /// after this call are processed. Does nothing if already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let session = self.sink.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.send(Command::Start(session));
    }

    /// Stops processing frames. Frames still queued are discarded. The last
    /// state stays available until the next start.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.send(Command::Stop);
    }

    fn send(&self, command: Command) {
        let Some(tx) = self.control_tx.as_ref() else {
            return;
        };
        if tx.send(command).is_err() {
            log::error!("detection worker is gone, can't send {command:?}");
        }
    }

    /// Returns a new handle to push frames.
    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    /// Snapshots in round order. Receivers compete for messages, so use one
    /// subscriber per receiver clone.
    pub const fn updates(&self) -> &Receiver<DetectionSnapshot> {
        &self.updates
    }

    /// Failures of single estimators.
    pub const fn errors(&self) -> &Receiver<EstimatorFailure> {
        &self.errors
    }

    pub fn dropped_frames(&self) -> u64 {
        self.sink.dropped_frames()
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        self.sink.closed.store(true, Ordering::Release);
        // disconnecting the control channel tells the worker to exit
        self.control_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("detection worker panicked");
            }
        }
    }
}

struct Worker {
    orchestrator: DetectionOrchestrator,
    control_rx: Receiver<Command>,
    frame_rx: Receiver<SessionFrame>,
    updates_tx: Sender<DetectionSnapshot>,
    errors_tx: Sender<EstimatorFailure>,
}

impl Worker {
    fn run(self) {
        let Self {
            mut orchestrator,
            control_rx,
            frame_rx,
            updates_tx,
            errors_tx,
        } = self;

        // 0 until the first start
        let mut session = 0;

        log::debug!("detection worker started");
        loop {
            select! {
                recv(control_rx) -> command => match command {
                    Ok(command) => apply(&mut orchestrator, &mut session, command),
                    Err(_) => break,
                },
                recv(frame_rx) -> frame => match frame {
                    Ok(SessionFrame { session: frame_session, frame }) => {
                        // commands sent before the frame was pushed come first
                        while let Ok(command) = control_rx.try_recv() {
                            apply(&mut orchestrator, &mut session, command);
                        }
                        if frame_session != session {
                            log::trace!("discarding frame of session {frame_session}");
                            continue;
                        }
                        if let Some(outcome) = orchestrator.process_frame(&frame) {
                            publish(outcome, &updates_tx, &errors_tx);
                        }
                    }
                    Err(_) => break,
                },
            }
        }
        log::debug!("detection worker stopped");
    }
}

fn apply(orchestrator: &mut DetectionOrchestrator, session: &mut u64, command: Command) {
    match command {
        Command::Start(next_session) => {
            orchestrator.start();
            *session = next_session;
        }
        Command::Stop => orchestrator.stop(),
    }
}

fn publish(
    outcome: RoundOutcome,
    updates_tx: &Sender<DetectionSnapshot>,
    errors_tx: &Sender<EstimatorFailure>,
) {
    for failure in outcome.failures {
        if errors_tx.try_send(failure).is_err() {
            log::debug!("failure channel is full, dropping failure");
        }
    }
    if updates_tx.try_send(outcome.snapshot).is_err() {
        log::debug!("update channel is full, dropping snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::EnergyVarianceEstimator;
    use crate::test_utils::{self, SAMPLE_RATE};
    use assert2::check;
    use crossbeam_channel::RecvTimeoutError;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn service() -> DetectionService {
        let mut orchestrator = DetectionOrchestrator::new(Default::default());
        orchestrator
            .register(Box::new(EnergyVarianceEstimator::new()))
            .unwrap();
        DetectionService::spawn(orchestrator, ServiceConfig::default()).unwrap()
    }

    #[test]
    fn is_send() {
        fn accept<I: Send>() {}

        accept::<DetectionService>();
        accept::<FrameSink>();
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let config = ServiceConfig {
            frame_queue_depth: 0,
            ..Default::default()
        };
        let orchestrator = DetectionOrchestrator::new(Default::default());
        let result = DetectionService::spawn(orchestrator, config);
        check!(let Err(SpawnServiceError::ZeroQueueDepth) = result);
    }

    #[test]
    fn full_queue_drops_oldest_frame() {
        let sink = FrameSink::with_depth(1);
        for i in 1..=3 {
            let frame = AudioFrame::mono_from(vec![i as f32 * 0.1], SAMPLE_RATE).unwrap();
            sink.push(frame).unwrap();
        }

        check!(sink.dropped_frames() == 2);
        check!(sink.rx.try_recv().unwrap().frame.samples() == [0.3]);
        check!(sink.rx.try_recv().is_err());
    }

    #[test]
    fn frames_of_a_stopped_session_are_discarded() {
        let sink = FrameSink::with_depth(4);
        let (control_tx, control_rx) = bounded(16);
        let (updates_tx, updates) = bounded(16);
        let (errors_tx, _errors) = bounded(16);
        let mut orchestrator = DetectionOrchestrator::new(Default::default());
        orchestrator
            .register(Box::new(EnergyVarianceEstimator::new()))
            .unwrap();
        let frame = |len| AudioFrame::mono_from(vec![0.0; len], SAMPLE_RATE).unwrap();

        // Everything is queued before the worker runs: a frame of session 1
        // is still waiting when session 2 starts.
        sink.session.store(1, Ordering::Release);
        control_tx.send(Command::Start(1)).unwrap();
        sink.push(frame(1024)).unwrap();
        control_tx.send(Command::Stop).unwrap();
        sink.session.store(2, Ordering::Release);
        control_tx.send(Command::Start(2)).unwrap();
        sink.push(frame(2048)).unwrap();

        let worker = Worker {
            orchestrator,
            control_rx,
            frame_rx: sink.rx.clone(),
            updates_tx,
            errors_tx,
        };
        let worker = thread::spawn(move || worker.run());

        let snapshot = updates.recv_timeout(TIMEOUT).unwrap();
        check!(snapshot.round == 1);
        check!(snapshot.stream_time == frame(2048).duration());

        drop(control_tx);
        worker.join().unwrap();
        check!(updates.try_recv().is_err());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let service = service();
        let frame = || AudioFrame::mono_from(vec![0.0; 4096], SAMPLE_RATE).unwrap();

        service.start();
        service.start();
        service.sink().push(frame()).unwrap();
        check!(service.updates().recv_timeout(TIMEOUT).unwrap().round == 1);

        service.stop();
        service.stop();
        service.start();
        service.sink().push(frame()).unwrap();
        // a restart resets the rounds
        check!(service.updates().recv_timeout(TIMEOUT).unwrap().round == 1);
    }

    #[test]
    fn publishes_snapshots_in_round_order() {
        let service = service();
        let sink = service.sink();
        service.start();

        let samples = test_utils::click_track(SAMPLE_RATE as usize * 10);
        let mut last: Option<DetectionSnapshot> = None;
        for frame in test_utils::mono_frames(&samples, 8192) {
            sink.push(frame).unwrap();
            // wait for the round, so that no frame gets dropped
            let snapshot = service.updates().recv_timeout(TIMEOUT).unwrap();
            if let Some(previous) = &last {
                check!(snapshot.round == previous.round + 1);
                check!(snapshot.stream_time > previous.stream_time);
            }
            last = Some(snapshot);
        }

        check!(service.dropped_frames() == 0);
        let expected_bpm = test_utils::click_track_bpm();
        let consensus_bpm = last.unwrap().consensus_bpm();
        check!((consensus_bpm - expected_bpm).abs() / expected_bpm < 0.02);
    }

    #[test]
    fn frames_are_ignored_until_started() {
        let service = service();
        let frame = || AudioFrame::mono_from(vec![0.0; 4096], SAMPLE_RATE).unwrap();

        service.sink().push(frame()).unwrap();
        check!(
            service.updates().recv_timeout(Duration::from_millis(200))
                == Err(RecvTimeoutError::Timeout)
        );

        service.start();
        service.sink().push(frame()).unwrap();
        check!(service.updates().recv_timeout(TIMEOUT).unwrap().round == 1);

        service.stop();
        service.sink().push(frame()).unwrap();
        check!(
            service.updates().recv_timeout(Duration::from_millis(200))
                == Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn estimator_failures_are_published() {
        let service = service();
        service.start();

        let mut samples = vec![0.0; 4096];
        samples[7] = f32::NAN;
        let frame = AudioFrame::mono_from(samples, SAMPLE_RATE).unwrap();
        service.sink().push(frame).unwrap();

        let failure = service.errors().recv_timeout(TIMEOUT).unwrap();
        check!(failure.algorithm == "Energy Variance");
        check!(failure.round == 1);
        // the round itself still completes
        let snapshot = service.updates().recv_timeout(TIMEOUT).unwrap();
        check!(snapshot.consensus().is_none());
    }

    #[test]
    fn drop_shuts_down_the_worker() {
        let service = service();
        let sink = service.sink();
        service.start();
        drop(service);

        check!(sink.is_closed());
        let frame = AudioFrame::mono_from(vec![0.0; 16], SAMPLE_RATE).unwrap();
        check!(sink.push(frame) == Err(SinkClosedError));
    }
}
