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
//! Merges the estimates of several algorithms into one consensus estimate.
//!
//! Estimates are greedily grouped into clusters of the same tempo, where a
//! double or half tempo counts as the same tempo (octave errors are the most
//! common failure of beat trackers). The cluster with the highest summed
//! confidence wins.

use crate::estimate::MetadataValue;
use crate::BeatEstimate;
use std::string::String;
use std::time::Duration;
use std::vec::Vec;

/// Reserved algorithm name of the consensus estimate.
pub const CONSENSUS_KEY: &str = "Consensus";

/// Metadata key: number of estimates in the winning cluster.
pub const META_CLUSTER_SIZE: &str = "cluster_size";
/// Metadata key: comma-separated names of the contributing algorithms.
pub const META_ALGORITHMS: &str = "algorithms";

/// Parameters of the consensus computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusConfig {
    /// Maximum deviation of the BPM ratio from 1.0, 2.0, or 0.5 for an
    /// estimate to join a cluster.
    pub cluster_tolerance: f32,
    /// Maximum deviation of the BPM ratio from 2.0 or 0.5 for a member to be
    /// halved or doubled when it joins.
    pub octave_snap_tolerance: f32,
    /// Factor applied to the confidence if only a single estimate exists.
    pub single_source_factor: f32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            cluster_tolerance: 0.05,
            octave_snap_tolerance: 0.10,
            single_source_factor: 0.5,
        }
    }
}

/// A member of a [`TempoCluster`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub algorithm: String,
    /// The BPM of the estimate, halved or doubled to the cluster's octave.
    pub bpm: f32,
    pub confidence: f32,
}

/// Estimates that are believed to describe the same tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoCluster {
    members: Vec<ClusterMember>,
    /// Running mean of the (octave adjusted) member BPMs.
    center_bpm: f32,
    total_confidence: f32,
}

impl TempoCluster {
    fn new(estimate: &BeatEstimate) -> Self {
        Self {
            members: vec![ClusterMember {
                algorithm: estimate.algorithm.clone(),
                bpm: estimate.bpm,
                confidence: estimate.confidence,
            }],
            center_bpm: estimate.bpm,
            total_confidence: estimate.confidence,
        }
    }

    /// Whether the estimate has the same, double, or half tempo.
    fn accepts(&self, estimate: &BeatEstimate, tolerance: f32) -> bool {
        let ratio = estimate.bpm / self.center_bpm;
        (ratio - 1.0).abs() < tolerance
            || (ratio - 2.0).abs() < tolerance
            || (ratio - 0.5).abs() < tolerance
    }

    fn add(&mut self, estimate: &BeatEstimate, octave_snap_tolerance: f32) {
        let ratio = estimate.bpm / self.center_bpm;
        let adjusted_bpm = if (ratio - 2.0).abs() < octave_snap_tolerance {
            estimate.bpm / 2.0
        } else if (ratio - 0.5).abs() < octave_snap_tolerance {
            estimate.bpm * 2.0
        } else {
            estimate.bpm
        };

        self.members.push(ClusterMember {
            algorithm: estimate.algorithm.clone(),
            bpm: adjusted_bpm,
            confidence: estimate.confidence,
        });
        let count = self.members.len() as f32;
        self.center_bpm = (self.center_bpm * (count - 1.0) + adjusted_bpm) / count;
        self.total_confidence += estimate.confidence;
    }

    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    pub const fn center_bpm(&self) -> f32 {
        self.center_bpm
    }

    pub const fn total_confidence(&self) -> f32 {
        self.total_confidence
    }

    /// Mean of the member BPMs, weighted by their confidence.
    pub fn weighted_bpm(&self) -> f32 {
        let (weighted_sum, total_weight) = self
            .members
            .iter()
            .fold((0.0, 0.0), |(sum, weight), member| {
                (sum + member.bpm * member.confidence, weight + member.confidence)
            });
        weighted_sum / total_weight
    }

    /// Average confidence of the members.
    pub fn mean_confidence(&self) -> f32 {
        self.total_confidence / self.members.len() as f32
    }
}

/// Groups the estimates in a single greedy pass: each estimate joins the
/// first cluster whose center has the same, double, or half tempo, or starts
/// a new cluster. The result depends on the order of the estimates.
pub fn cluster_estimates<'a>(
    estimates: impl IntoIterator<Item = &'a BeatEstimate>,
    config: &ConsensusConfig,
) -> Vec<TempoCluster> {
    let mut clusters: Vec<TempoCluster> = Vec::new();

    for estimate in estimates {
        match clusters
            .iter_mut()
            .find(|cluster| cluster.accepts(estimate, config.cluster_tolerance))
        {
            Some(cluster) => cluster.add(estimate, config.octave_snap_tolerance),
            None => clusters.push(TempoCluster::new(estimate)),
        }
    }

    clusters
}

/// Computes the consensus of the given estimates. Invalid estimates and
/// previous consensus estimates are ignored. Returns `None` if no valid
/// estimate is left.
///
/// A single estimate is taken as it is, but with reduced confidence. For
/// more estimates, the cluster with the highest summed confidence wins (the
/// first one on a tie); its confidence-weighted BPM and its average
/// confidence form the consensus.
pub fn compute_consensus<'a>(
    estimates: impl IntoIterator<Item = &'a BeatEstimate>,
    config: &ConsensusConfig,
    timestamp: Duration,
) -> Option<BeatEstimate> {
    let candidates = estimates
        .into_iter()
        .filter(|estimate| estimate.is_valid() && estimate.algorithm != CONSENSUS_KEY)
        .collect::<Vec<_>>();

    let mut consensus = match candidates.as_slice() {
        [] => return None,
        [single] => {
            let mut consensus = BeatEstimate::new(
                CONSENSUS_KEY,
                single.bpm,
                single.confidence * config.single_source_factor,
                timestamp,
            );
            consensus
                .metadata
                .insert(META_CLUSTER_SIZE.into(), MetadataValue::Count(1));
            consensus.metadata.insert(
                META_ALGORITHMS.into(),
                MetadataValue::Text(single.algorithm.clone()),
            );
            consensus
        }
        _ => {
            let clusters = cluster_estimates(candidates.iter().copied(), config);
            let best = best_cluster(&clusters)?;
            let mut consensus = BeatEstimate::new(
                CONSENSUS_KEY,
                best.weighted_bpm(),
                best.mean_confidence(),
                timestamp,
            );
            consensus.metadata.insert(
                META_CLUSTER_SIZE.into(),
                MetadataValue::Count(best.members().len()),
            );
            let algorithms = best
                .members()
                .iter()
                .map(|member| member.algorithm.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            consensus
                .metadata
                .insert(META_ALGORITHMS.into(), MetadataValue::Text(algorithms));
            consensus
        }
    };

    consensus.alternative_bpms = vec![consensus.bpm * 2.0, consensus.bpm / 2.0];
    Some(consensus)
}

/// Returns the cluster with the highest total confidence. On a tie, the
/// earlier cluster wins.
fn best_cluster(clusters: &[TempoCluster]) -> Option<&TempoCluster> {
    clusters.iter().fold(None, |best: Option<&TempoCluster>, cluster| match best {
        Some(best) if best.total_confidence >= cluster.total_confidence => Some(best),
        _ => Some(cluster),
    })
}
