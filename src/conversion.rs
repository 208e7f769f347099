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
//! Conversion of raw PCM data from audio devices or files into normalized
//! `f32` samples in range `-1.0..=1.0`, as expected by [`AudioFrame`].
//!
//! [`AudioFrame`]: crate::AudioFrame

use std::vec::Vec;
use thiserror::Error;

/// Encoding of raw little-endian PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// IEEE 754 float, already normalized.
    F32,
    I16,
    /// Packed 24-bit signed integer (3 bytes per sample).
    I24,
    I32,
}

impl SampleFormat {
    /// Width of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 => 4,
        }
    }
}

/// Possible errors when decoding raw PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("{len} bytes are not a multiple of the sample width ({width} bytes) of {format:?}")]
    TruncatedSample {
        len: usize,
        width: usize,
        format: SampleFormat,
    },
}

/// Transforms an audio sample of type `i16` to a `f32` in range
/// `-1.0..1.0`.
#[inline]
pub fn i16_sample_to_f32(val: i16) -> f32 {
    val as f32 / 32768.0
}

#[inline]
fn i24_sample_to_f32(bytes: [u8; 3]) -> f32 {
    // Place the 24 bits in the upper bytes and shift back: sign extension.
    let val = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
    val as f32 / 8_388_608.0
}

#[inline]
fn i32_sample_to_f32(val: i32) -> f32 {
    (val as f64 / 2_147_483_648.0) as f32
}

/// Decodes little-endian PCM bytes into normalized samples. Channel
/// interleaving is kept as it is.
pub fn bytes_to_f32_samples(
    bytes: &[u8],
    format: SampleFormat,
) -> Result<Vec<f32>, ConversionError> {
    let width = format.bytes_per_sample();
    if bytes.len() % width != 0 {
        return Err(ConversionError::TruncatedSample {
            len: bytes.len(),
            width,
            format,
        });
    }

    let chunks = bytes.chunks_exact(width);
    let samples = match format {
        SampleFormat::F32 => chunks
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        SampleFormat::I16 => chunks
            .map(|c| i16_sample_to_f32(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        SampleFormat::I24 => chunks
            .map(|c| i24_sample_to_f32([c[0], c[1], c[2]]))
            .collect(),
        SampleFormat::I32 => chunks
            .map(|c| i32_sample_to_f32(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    };
    Ok(samples)
}
