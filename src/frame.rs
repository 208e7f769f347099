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
//! Module for [`AudioFrame`].

use std::borrow::Cow;
use std::time::Duration;
use std::vec::Vec;
use thiserror::Error;

/// Possible errors when constructing an [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("a frame needs at least one channel")]
    NoChannels,
    #[error("the sample rate must be positive")]
    ZeroSampleRate,
    /// The interleaved sample count doesn't fit the channel count.
    #[error("{len} interleaved samples can't be split into {channels} channels")]
    ChannelMismatch { len: usize, channels: u16 },
    /// A fixed frame length can't hold a single sample per channel.
    #[error("a frame length of {len} samples is too short for {channels} channels")]
    FrameTooShort { len: usize, channels: u16 },
}

/// An immutable batch of interleaved audio samples in range `-1.0..=1.0`
/// together with its sample rate and channel count.
///
/// The number of samples is always a multiple of the channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Creates a frame from interleaved samples (`LRLR..` for stereo).
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, FrameError> {
        if channels == 0 {
            return Err(FrameError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(FrameError::ZeroSampleRate);
        }
        if samples.len() % channels as usize != 0 {
            return Err(FrameError::ChannelMismatch {
                len: samples.len(),
                channels,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Creates a silent frame of `capacity` interleaved samples that the
    /// caller populates via [`Self::samples_mut`].
    pub fn with_capacity(
        capacity: usize,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, FrameError> {
        Self::new(vec![0.0; capacity], sample_rate, channels)
    }

    /// For callers that already validated the parameters.
    pub(crate) fn from_parts_unchecked(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        debug_assert!(channels > 0 && sample_rate > 0);
        debug_assert_eq!(samples.len() % channels as usize, 0);
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Convenience constructor for mono audio.
    pub fn mono_from(samples: Vec<f32>, sample_rate: u32) -> Result<Self, FrameError> {
        Self::new(samples, sample_rate, 1)
    }

    /// The interleaved samples.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable access to the samples. The length is fixed so that the frame
    /// stays aligned to its channel count.
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    #[inline]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of interleaved samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per channel, i.e., the number of points in time.
    #[inline]
    pub fn frames_per_channel(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration of audio this frame covers.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_channel() as f64 / self.sample_rate as f64)
    }

    /// Returns the frame downmixed to mono. Each value is the mean of all
    /// channels at that point in time. Mono frames are borrowed as they are.
    pub fn mono(&self) -> Cow<'_, [f32]> {
        if self.channels == 1 {
            return Cow::Borrowed(&self.samples);
        }

        let channels = self.channels as usize;
        let mono = self
            .samples
            .chunks_exact(channels)
            .map(|group| group.iter().sum::<f32>() / channels as f32)
            .collect::<Vec<_>>();
        Cow::Owned(mono)
    }

    /// Sum of squared samples over all channels.
    pub fn energy(&self) -> f64 {
        energy(&self.samples)
    }

    /// Root mean square of all samples. `0.0` for an empty frame.
    pub fn rms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.energy() / self.samples.len() as f64).sqrt()
    }
}

/// Sum of squared samples.
#[inline]
pub fn energy(samples: &[f32]) -> f64 {
    samples
        .iter()
        .map(|&sample| {
            let sample = f64::from(sample);
            sample * sample
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use float_cmp::approx_eq;

    #[test]
    fn construction_is_validated() {
        check!(AudioFrame::new(vec![0.0; 4], 44100, 0) == Err(FrameError::NoChannels));
        check!(AudioFrame::new(vec![0.0; 4], 0, 2) == Err(FrameError::ZeroSampleRate));
        check!(
            AudioFrame::new(vec![0.0; 5], 44100, 2)
                == Err(FrameError::ChannelMismatch {
                    len: 5,
                    channels: 2
                })
        );
        check!(AudioFrame::new(vec![0.0; 6], 44100, 3).is_ok());
        check!(AudioFrame::new(vec![], 44100, 2).is_ok());
    }

    #[test]
    fn with_capacity_is_silent_and_writable() {
        let mut frame = AudioFrame::with_capacity(4, 48000, 2).unwrap();
        check!(frame.samples() == [0.0; 4]);
        frame.samples_mut()[3] = 0.5;
        check!(frame.samples()[3] == 0.5);
        check!(frame.frames_per_channel() == 2);
        check!(AudioFrame::with_capacity(3, 48000, 2).is_err());
    }

    #[test]
    fn mono_is_borrowed_for_single_channel() {
        let frame = AudioFrame::mono_from(vec![0.1, -0.2, 0.3], 44100).unwrap();
        let mono = frame.mono();
        check!(matches!(mono, Cow::Borrowed(_)));
        check!(mono.as_ref() == frame.samples());
    }

    #[test]
    fn mono_averages_channel_groups() {
        let frame = AudioFrame::new(vec![1.0, 0.0, -0.5, -0.5, 0.25, 0.75], 44100, 2).unwrap();
        check!(frame.mono().as_ref() == [0.5, -0.5, 0.5]);

        let frame = AudioFrame::new(vec![0.3, 0.6, 0.9, 0.0, 0.0, 0.0], 44100, 3).unwrap();
        let mono = frame.mono();
        check!(mono.len() == 2);
        check!(approx_eq!(f32, mono[0], 0.6, epsilon = 1e-6));
        check!(mono[1] == 0.0);
    }

    #[test]
    fn energy_and_rms() {
        let frame = AudioFrame::mono_from(vec![0.5, -0.5, 0.5, -0.5], 44100).unwrap();
        check!(frame.energy() == 1.0);
        check!(frame.rms() == 0.5);

        let empty = AudioFrame::mono_from(vec![], 44100).unwrap();
        check!(empty.energy() == 0.0);
        check!(empty.rms() == 0.0);
    }

    #[test]
    fn duration_uses_frames_per_channel() {
        let frame = AudioFrame::with_capacity(88200, 44100, 2).unwrap();
        check!(frame.duration() == Duration::from_secs(1));
    }
}
