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
//! Detects the tempo of the audio input device and prints every change of
//! the consensus until Ctrl-C is pressed.

use bpm_consensus::{recording, DetectionOrchestrator, DetectionService, DEFAULT_FRAME_LEN};
use cpal::traits::{DeviceTrait, HostTrait};
use std::io::Write;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let input_device = select_audio_device();

    let stop_recording = Arc::new(AtomicBool::new(false));
    {
        let stop_recording = stop_recording.clone();
        ctrlc::set_handler(move || {
            stop_recording.store(true, Ordering::SeqCst);
        })
        .unwrap();
    }

    let orchestrator = DetectionOrchestrator::with_default_estimators(Default::default());
    let service = DetectionService::spawn(orchestrator, Default::default()).unwrap();
    service.start();

    let _stream =
        recording::start_capture(service.sink(), Some(input_device), DEFAULT_FRAME_LEN).unwrap();

    log::info!("Start recording");
    let mut last_bpm = 0.0;
    while !stop_recording.load(Ordering::SeqCst) {
        while let Ok(failure) = service.errors().try_recv() {
            log::warn!("{}: {}", failure.algorithm, failure.message);
        }
        let Ok(snapshot) = service.updates().recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        let bpm = snapshot.consensus_bpm();
        if (bpm - last_bpm).abs() >= 0.5 {
            let confidence = snapshot.consensus().map(|c| c.confidence).unwrap_or(0.0);
            println!(
                "{:>7.1} s: {bpm:>6.1} BPM (confidence {confidence:.2})",
                snapshot.stream_time.as_secs_f32()
            );
            last_bpm = bpm;
        }
    }
    service.stop();
    log::info!(
        "Stopped recording ({} frames dropped)",
        service.dropped_frames()
    );
}

/// Returns all valid and available input devices.
fn get_input_devices_flat() -> Vec<(cpal::HostId, cpal::Device)> {
    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok().map(|host| (host_id, host)))
        .filter_map(|(host_id, host)| host.devices().ok().map(|devices| (host_id, devices)))
        .flat_map(|(host_id, devices)| {
            devices
                // check: is input device?
                .filter(|dev| dev.default_input_config().is_ok())
                // check: can we get its name?
                .filter(|dev| dev.name().is_ok())
                .map(move |dev| (host_id, dev))
        })
        .collect::<Vec<_>>()
}

/// Prompts the user in the terminal to choose an audio input device.
fn select_audio_device() -> cpal::Device {
    let mut devices = get_input_devices_flat();

    if devices.is_empty() {
        println!("No audio input device available");
        exit(0);
    }

    if devices.len() == 1 {
        return devices.swap_remove(0).1;
    }

    println!("Available input devices:");
    for (device_i, (host_id, device)) in devices.iter().enumerate() {
        println!(
            "[{}]: {:?} - {}",
            device_i,
            host_id,
            device
                .name()
                .expect("should be existent at that point due to the filtering")
        );
    }

    let choice = loop {
        print!("Type a number: ");
        std::io::stdout().flush().unwrap();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap() == 0 {
            // stdin closed
            exit(1);
        }
        match parse_device_choice(&line, devices.len()) {
            Some(choice) => break choice,
            None => println!("Please type a number between 0 and {}", devices.len() - 1),
        }
    };

    // Remove element and take ownership.
    devices.swap_remove(choice).1
}

/// Parses a device number typed by the user. `None` if it is no number or
/// out of range.
fn parse_device_choice(line: &str, device_count: usize) -> Option<usize> {
    line.trim()
        .parse::<usize>()
        .ok()
        .filter(|&choice| choice < device_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    #[test]
    fn device_choice_is_validated() {
        check!(parse_device_choice("0\n", 3) == Some(0));
        check!(parse_device_choice(" 12\r\n", 13) == Some(12));
        check!(parse_device_choice("3\n", 3) == None);
        check!(parse_device_choice("-1\n", 3) == None);
        check!(parse_device_choice("abc\n", 3) == None);
        check!(parse_device_choice("\n", 3) == None);
    }
}
