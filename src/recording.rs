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
//! Live audio input from an audio input device via `cpal`.

use crate::conversion::i16_sample_to_f32;
use crate::frame::FrameError;
use crate::frame_assembler::FrameAssembler;
use crate::service::FrameSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::string::ToString;
use std::time::Duration;
use std::vec::Vec;
use thiserror::Error;

/// Possible errors of [`start_capture`].
#[derive(Debug, Error)]
pub enum StartCaptureError {
    /// There was no audio device provided and no default device can be found.
    #[error("no input device provided and no default input device found")]
    NoDefaultAudioDevice,
    #[error("failed to query the default input config")]
    InputConfig(#[from] cpal::DefaultStreamConfigError),
    /// Only `f32` and `i16` devices are supported.
    #[error("unsupported sample format {0:?}")]
    UnsupportedSampleFormat(SampleFormat),
    #[error("invalid frame layout")]
    Frame(#[from] FrameError),
    #[error("failed to build the input stream")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start the input stream")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Opens the preferred (or default) input device with its default
/// configuration and pushes frames of `frame_len` interleaved samples into
/// the sink.
///
/// The capture runs as long as the returned stream lives.
pub fn start_capture(
    sink: FrameSink,
    preferred_input_dev: Option<cpal::Device>,
    frame_len: usize,
) -> Result<cpal::Stream, StartCaptureError> {
    let input_dev = preferred_input_dev.map(Ok).unwrap_or_else(|| {
        let host = cpal::default_host();
        log::debug!("Using '{:?}' as input framework", host.id());
        host.default_input_device()
            .ok_or(StartCaptureError::NoDefaultAudioDevice)
    })?;

    log::debug!(
        "Using '{}' as input device",
        input_dev.name().unwrap_or_else(|_| "<unknown>".to_string())
    );

    let supported_input_config = input_dev.default_input_config()?;
    log::trace!("Supported input configuration: {supported_input_config:#?}");

    let sample_format = supported_input_config.sample_format();
    let input_config: StreamConfig = supported_input_config.config();
    log::debug!("Input configuration: {input_config:#?}");

    let mut assembler = FrameAssembler::new(
        frame_len,
        input_config.sample_rate.0,
        input_config.channels,
    )?;
    let sample_rate = input_config.sample_rate.0 as f32;

    let mut on_samples = move |data: &[f32]| {
        log::trace!(
            "audio input callback: {} samples ({} ms, sampling rate = {sample_rate})",
            data.len(),
            Duration::from_secs_f32(data.len() as f32 / sample_rate).as_millis()
        );
        for frame in assembler.push(data) {
            if sink.push(frame).is_err() {
                log::debug!("detection service is gone, discarding input");
                assembler.clear();
                return;
            }
        }
    };
    let on_error = |e: cpal::StreamError| log::error!("Input error: {e:#?}");
    // Worst case max blocking time. Not too short, as otherwise the error
    // callback is invoked frequently.
    let timeout = Some(Duration::from_secs(1));

    // Under the hood, this spawns a thread.
    let stream = match sample_format {
        SampleFormat::F32 => input_dev.build_input_stream(
            &input_config,
            move |data: &[f32], _info| on_samples(data),
            on_error,
            timeout,
        )?,
        SampleFormat::I16 => {
            let mut converted = Vec::new();
            input_dev.build_input_stream(
                &input_config,
                move |data: &[i16], _info| {
                    converted.clear();
                    converted.extend(data.iter().copied().map(i16_sample_to_f32));
                    on_samples(&converted);
                },
                on_error,
                timeout,
            )?
        }
        format => return Err(StartCaptureError::UnsupportedSampleFormat(format)),
    };

    stream.play()?;

    Ok(stream)
}
