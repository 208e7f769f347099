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
//! Module for [`FrameAssembler`].

use crate::frame::FrameError;
use crate::AudioFrame;
use std::vec::Vec;

/// Default length of an assembled frame in interleaved samples.
pub const DEFAULT_FRAME_LEN: usize = 8192;

/// Accumulates interleaved samples that arrive in chunks of arbitrary size
/// (for example from an audio input callback) and cuts them into
/// [`AudioFrame`]s of a fixed length.
///
/// Frames don't overlap: each sample ends up in exactly one frame.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    buffer: Vec<f32>,
    frame_len: usize,
    sample_rate: u32,
    channels: u16,
}

impl FrameAssembler {
    /// Creates a new assembler. `frame_len` is rounded down to a multiple of
    /// `channels`.
    pub fn new(frame_len: usize, sample_rate: u32, channels: u16) -> Result<Self, FrameError> {
        if channels == 0 {
            return Err(FrameError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(FrameError::ZeroSampleRate);
        }
        let rounded_len = frame_len - frame_len % channels as usize;
        if rounded_len == 0 {
            return Err(FrameError::FrameTooShort {
                len: frame_len,
                channels,
            });
        }
        Ok(Self {
            buffer: Vec::with_capacity(rounded_len),
            frame_len: rounded_len,
            sample_rate,
            channels,
        })
    }

    /// Like [`Self::new`] with [`DEFAULT_FRAME_LEN`].
    pub fn with_default_len(sample_rate: u32, channels: u16) -> Result<Self, FrameError> {
        Self::new(DEFAULT_FRAME_LEN, sample_rate, channels)
    }

    /// Appends the samples and returns all frames that are complete now, in
    /// stream order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.buffer.extend_from_slice(samples);
        if self.buffer.len() < self.frame_len {
            return Vec::new();
        }

        let complete_len = self.buffer.len() - self.buffer.len() % self.frame_len;
        let frames = self.buffer[..complete_len]
            .chunks_exact(self.frame_len)
            .map(|chunk| {
                AudioFrame::from_parts_unchecked(chunk.to_vec(), self.sample_rate, self.channels)
            })
            .collect::<Vec<_>>();
        self.buffer.drain(..complete_len);
        frames
    }

    /// Number of buffered samples that don't form a complete frame yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered samples.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub const fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }
}
