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
//! Streams a WAV file through all estimators and reports the consensus tempo.
//!
//! Usage: `cargo run --release --example wav-tempo -- <file.wav>`

use bpm_consensus::{ConsensusConfig, DetectionOrchestrator, FrameAssembler, DEFAULT_FRAME_LEN};
use hound::SampleFormat;
use std::path::Path;
use std::process::exit;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: wav-tempo <file.wav>");
        exit(1);
    };

    let (samples, spec) = read_wav(&path);
    log::info!(
        "{path}: {} Hz, {} channels, {:.1} s",
        spec.sample_rate,
        spec.channels,
        samples.len() as f32 / spec.channels as f32 / spec.sample_rate as f32
    );

    let mut assembler =
        FrameAssembler::new(DEFAULT_FRAME_LEN, spec.sample_rate, spec.channels).unwrap();
    let mut orchestrator =
        DetectionOrchestrator::with_default_estimators(ConsensusConfig::default());
    orchestrator.start();

    let frames = assembler.push(&samples);
    let frames_per_second = spec.sample_rate as usize * spec.channels as usize / DEFAULT_FRAME_LEN;
    for (i, frame) in frames.iter().enumerate() {
        let outcome = orchestrator.process_frame(frame).unwrap();
        for failure in &outcome.failures {
            log::warn!("{}: {}", failure.algorithm, failure.message);
        }
        if i % frames_per_second.max(1) == 0 {
            log::info!(
                "{:>6.1} s: {:>6.1} BPM",
                outcome.snapshot.stream_time.as_secs_f32(),
                outcome.snapshot.consensus_bpm()
            );
        }
    }

    println!("Estimates:");
    for (algorithm, estimate) in orchestrator.estimates() {
        println!(
            "  {algorithm:<24} {:>6.1} BPM (confidence {:.2})",
            estimate.bpm, estimate.confidence
        );
        for (key, value) in &estimate.metadata {
            println!("    {key}: {value}");
        }
    }
    if orchestrator.consensus().is_none() {
        println!("Not enough audio for a tempo estimate.");
    }
}

/// Reads all samples of the WAV file as interleaved `f32` samples.
fn read_wav(path: impl AsRef<Path>) -> (Vec<f32>, hound::WavSpec) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().map(|s| s.unwrap()).collect(),
        SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.unwrap() as f32 / max)
                .collect()
        }
    };

    (samples, spec)
}

