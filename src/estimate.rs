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
//! Module for [`BeatEstimate`], the result every tempo estimator emits.

use core::fmt::{Display, Formatter};
use std::collections::BTreeMap;
use std::string::String;
use std::time::Duration;
use std::vec::Vec;

/// BPM ratios under which two estimates are considered the same tempo in a
/// different "octave" (metrical level).
const OCTAVE_RATIOS: [f32; 7] = [0.5, 1.0, 2.0, 0.33, 3.0, 0.66, 1.5];

/// Default tolerance for [`BeatEstimate::is_octave_related`].
pub const DEFAULT_OCTAVE_TOLERANCE: f32 = 0.03;

/// Upper bound (exclusive) of a plausible tempo.
pub const MAX_VALID_BPM: f32 = 300.0;

/// Free-form metadata value attached to an estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Count(usize),
    Number(f64),
    Text(String),
}

impl Display for MetadataValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// A tempo estimate of a single algorithm (or of the consensus of several).
///
/// Estimates are created fresh for every processed frame and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatEstimate {
    /// Name of the algorithm that produced this estimate.
    pub algorithm: String,
    pub bpm: f32,
    /// Confidence in range `0.0..=1.0`.
    pub confidence: f32,
    /// Beat phase in range `0.0..1.0`, if the algorithm tracks it.
    pub phase: f32,
    /// Octave alternatives of [`Self::bpm`], such as the double and half tempo.
    pub alternative_bpms: Vec<f32>,
    /// Stream time at which the estimate was made, relative to the last reset.
    pub timestamp: Duration,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl BeatEstimate {
    /// Creates an estimate without alternatives and metadata.
    pub fn new(
        algorithm: impl Into<String>,
        bpm: f32,
        confidence: f32,
        timestamp: Duration,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            bpm,
            confidence,
            phase: 0.0,
            alternative_bpms: Vec::new(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// Zero-confidence placeholder. It is never [valid](Self::is_valid).
    pub fn invalid(algorithm: impl Into<String>, timestamp: Duration) -> Self {
        Self::new(algorithm, 0.0, 0.0, timestamp)
    }

    /// An estimate is valid if its tempo is plausible (`0 < bpm < 300`) and
    /// its confidence is positive.
    pub fn is_valid(&self) -> bool {
        self.bpm > 0.0 && self.bpm < MAX_VALID_BPM && self.confidence > 0.0
    }

    /// Checks whether both estimates describe the same tempo, possibly at a
    /// different metrical level (double, half, triple, ...).
    pub fn is_octave_related(&self, other: &Self, tolerance: f32) -> bool {
        if other.bpm == 0.0 {
            return false;
        }
        let ratio = self.bpm / other.bpm;
        OCTAVE_RATIOS
            .iter()
            .any(|octave| (ratio - octave).abs() < tolerance)
    }

    /// Looks up a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    fn estimate(bpm: f32, confidence: f32) -> BeatEstimate {
        BeatEstimate::new("test", bpm, confidence, Duration::ZERO)
    }

    #[test]
    fn validity() {
        check!(estimate(120.0, 0.5).is_valid());
        check!(estimate(299.9, 0.01).is_valid());
        check!(!estimate(0.0, 0.5).is_valid());
        check!(!estimate(300.0, 0.5).is_valid());
        check!(!estimate(-10.0, 0.5).is_valid());
        check!(!estimate(120.0, 0.0).is_valid());
        check!(!BeatEstimate::invalid("test", Duration::ZERO).is_valid());
    }

    #[test]
    fn octave_relation() {
        let base = estimate(120.0, 1.0);
        check!(base.is_octave_related(&estimate(120.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(base.is_octave_related(&estimate(60.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(base.is_octave_related(&estimate(240.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(base.is_octave_related(&estimate(80.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(base.is_octave_related(&estimate(40.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(!base.is_octave_related(&estimate(100.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
        check!(!base.is_octave_related(&estimate(0.0, 1.0), DEFAULT_OCTAVE_TOLERANCE));
    }

    #[test]
    fn metadata_display() {
        let mut estimate = estimate(128.0, 0.8);
        estimate
            .metadata
            .insert("beat_count".into(), MetadataValue::Count(12));
        estimate
            .metadata
            .insert("algorithms".into(), MetadataValue::Text("a, b".into()));
        check!(estimate.meta("beat_count") == Some(&MetadataValue::Count(12)));
        check!(estimate.meta("algorithms").unwrap().to_string() == "a, b");
        check!(estimate.meta("missing") == None);
    }
}
