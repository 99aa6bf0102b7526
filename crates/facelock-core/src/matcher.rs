//! 1:N identity matching with per-identity adaptive thresholds.
//!
//! Descriptors are L2-normalised and compared with the configured distance
//! metric. Each enrolled identity carries its own threshold, nudged by its
//! recent match success rate or recalibrated from its own sample spread.
//! Identification additionally demands that the winner is separated from the
//! runner-up by a minimum similarity gap.

use crate::types::Descriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const MIN_THRESHOLD: f32 = 0.3;
pub const MAX_THRESHOLD: f32 = 0.95;

/// Weight of the cosine term in [`DistanceMetric::Combined`].
const COMBINED_COSINE_WEIGHT: f32 = 0.7;
const COMBINED_EUCLIDEAN_WEIGHT: f32 = 0.3;

/// How strongly intra-identity variability relaxes the threshold.
const VARIABILITY_RELAXATION: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor is empty")]
    EmptyDescriptor,
    #[error("recalibration needs at least two descriptors, got {0}")]
    InsufficientSamples(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    Manhattan,
    /// 0.7 × cosine + 0.3 × (euclidean / 2) on unit vectors.
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub metric: DistanceMetric,
    /// Starting threshold for every identity.
    pub base_threshold: f32,
    pub min_confidence: f32,
    /// Required similarity margin of the best identity over the runner-up.
    pub min_gap: f32,
    /// Upper bound on descriptor comparisons per identification.
    pub max_comparisons: usize,
    pub adaptive: bool,
    /// Comparisons between threshold adjustments.
    pub adaptation_interval: u32,
    pub adaptation_step: f32,
    /// Raise the threshold when the success rate falls below this.
    pub low_success_rate: f32,
    /// Lower the threshold when the success rate rises above this.
    pub high_success_rate: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            base_threshold: 0.6,
            min_confidence: 0.5,
            min_gap: 0.05,
            max_comparisons: 1000,
            adaptive: true,
            adaptation_interval: 10,
            adaptation_step: 0.05,
            low_success_rate: 0.7,
            high_success_rate: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub distance: f32,
    /// Monotonically decreasing in `distance`.
    pub similarity: f32,
    pub is_match: bool,
    pub confidence: f32,
    pub metric: DistanceMetric,
    /// Threshold the similarity was judged against.
    pub threshold: f32,
}

/// Why an identification produced no identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MatchRejection {
    NoIdentities,
    BelowThreshold { similarity: f32, threshold: f32 },
    LowConfidence { confidence: f32 },
    Ambiguous { best: f32, runner_up: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    /// Accepted identity, if any.
    pub identity: Option<String>,
    /// Best candidate's identity and comparison, accepted or not.
    pub best: Option<(String, ComparisonResult)>,
    /// Best comparison per identity.
    pub comparisons: HashMap<String, ComparisonResult>,
    pub rejection: Option<MatchRejection>,
    /// Descriptor comparisons actually performed.
    pub comparisons_made: usize,
}

impl IdentificationResult {
    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// Running counters for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityStatistics {
    pub comparisons: u64,
    pub successful_matches: u64,
    /// Running mean of comparison confidence.
    pub average_confidence: f32,
    pub threshold: f32,
    window_comparisons: u32,
    window_matches: u32,
}

impl IdentityStatistics {
    fn new(threshold: f32) -> Self {
        Self {
            comparisons: 0,
            successful_matches: 0,
            average_confidence: 0.0,
            threshold,
            window_comparisons: 0,
            window_matches: 0,
        }
    }

    pub fn success_rate(&self) -> f32 {
        if self.comparisons == 0 {
            0.0
        } else {
            self.successful_matches as f32 / self.comparisons as f32
        }
    }
}

/// Stateful matcher. Owns every identity's statistics.
#[derive(Debug)]
pub struct IdentityMatcher {
    config: MatcherConfig,
    stats: HashMap<String, IdentityStatistics>,
}

impl IdentityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            stats: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Current threshold for `identity` (the base threshold if never seen).
    pub fn threshold_for(&self, identity: &str) -> f32 {
        self.stats
            .get(identity)
            .map(|s| s.threshold)
            .unwrap_or_else(|| clamp_threshold(self.config.base_threshold))
    }

    pub fn statistics(&self, identity: &str) -> Option<&IdentityStatistics> {
        self.stats.get(identity)
    }

    /// Forget an identity's statistics (e.g. after deletion).
    pub fn forget(&mut self, identity: &str) {
        self.stats.remove(identity);
    }

    /// Compare two descriptors. With `identity`, that identity's threshold is
    /// used and its statistics are updated.
    pub fn compare(
        &mut self,
        query: &Descriptor,
        candidate: &Descriptor,
        identity: Option<&str>,
    ) -> Result<ComparisonResult, MatchError> {
        check_pair(query, candidate)?;
        let threshold = match identity {
            Some(id) => self.threshold_for(id),
            None => clamp_threshold(self.config.base_threshold),
        };
        let d = distance(self.config.metric, &query.values, &candidate.values);
        let result = self.judge(d, threshold);
        if let Some(id) = identity {
            self.record(id, &result);
        }
        Ok(result)
    }

    /// Identify `query` among the enrolled `gallery`.
    ///
    /// Every stored descriptor's dimension is checked before any comparison,
    /// so a mismatch anywhere in the gallery is always reported.
    pub fn identify(
        &mut self,
        query: &Descriptor,
        gallery: &BTreeMap<String, Vec<Descriptor>>,
    ) -> Result<IdentificationResult, MatchError> {
        if query.is_empty() {
            return Err(MatchError::EmptyDescriptor);
        }
        for candidate in gallery.values().flatten() {
            check_pair(query, candidate)?;
        }

        let metric = self.config.metric;
        let query_unit = normalize(&query.values);
        let mut budget = self.config.max_comparisons;
        let mut comparisons_made = 0usize;
        let mut per_identity: Vec<(String, f32)> = Vec::with_capacity(gallery.len());

        'outer: for (id, descriptors) in gallery {
            let mut best_distance: Option<f32> = None;
            for candidate in descriptors {
                if budget == 0 {
                    if let Some(d) = best_distance {
                        per_identity.push((id.clone(), d));
                    }
                    tracing::debug!(comparisons_made, "comparison budget exhausted");
                    break 'outer;
                }
                budget -= 1;
                comparisons_made += 1;
                let d = unit_distance(metric, &query_unit, &normalize(&candidate.values));
                best_distance = Some(best_distance.map_or(d, |b: f32| b.min(d)));
            }
            if let Some(d) = best_distance {
                per_identity.push((id.clone(), d));
            }
        }

        let mut comparisons = HashMap::with_capacity(per_identity.len());
        for (id, d) in per_identity {
            let result = self.judge(d, self.threshold_for(&id));
            self.record(&id, &result);
            comparisons.insert(id, result);
        }

        let mut ranked: Vec<(&String, &ComparisonResult)> = comparisons.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.similarity
                .partial_cmp(&a.1.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let best = ranked.first().map(|(id, r)| ((*id).clone(), **r));
        let runner_up = ranked.get(1).map(|(_, r)| r.similarity);

        let rejection = match &best {
            None => Some(MatchRejection::NoIdentities),
            Some((_, r)) if r.similarity < r.threshold => Some(MatchRejection::BelowThreshold {
                similarity: r.similarity,
                threshold: r.threshold,
            }),
            Some((_, r)) if !r.is_match => Some(MatchRejection::LowConfidence {
                confidence: r.confidence,
            }),
            Some((_, r)) => match runner_up {
                Some(second) if r.similarity - second < self.config.min_gap => {
                    Some(MatchRejection::Ambiguous {
                        best: r.similarity,
                        runner_up: second,
                    })
                }
                _ => None,
            },
        };

        let identity = match (&best, rejection) {
            (Some((id, _)), None) => Some(id.clone()),
            _ => None,
        };

        tracing::debug!(
            identities = comparisons.len(),
            comparisons_made,
            best = ?best.as_ref().map(|(id, r)| (id.as_str(), r.similarity)),
            rejection = ?rejection,
            "identification complete"
        );

        Ok(IdentificationResult {
            identity,
            best,
            comparisons,
            rejection,
            comparisons_made,
        })
    }

    /// Recalibrate `identity`'s threshold from a batch of its own descriptors.
    ///
    /// Mean pairwise distance ("variability") relaxes the base threshold:
    /// more varied samples yield a lower threshold. Returns the new threshold.
    pub fn recalibrate(
        &mut self,
        identity: &str,
        descriptors: &[Descriptor],
    ) -> Result<f32, MatchError> {
        if descriptors.len() < 2 {
            return Err(MatchError::InsufficientSamples(descriptors.len()));
        }
        for d in &descriptors[1..] {
            check_pair(&descriptors[0], d)?;
        }

        let units: Vec<Vec<f32>> = descriptors.iter().map(|d| normalize(&d.values)).collect();
        let mut total = 0.0f32;
        let mut pairs = 0usize;
        for i in 0..units.len() {
            for j in i + 1..units.len() {
                total += unit_distance(self.config.metric, &units[i], &units[j]);
                pairs += 1;
            }
        }
        let variability = total / pairs as f32;
        let threshold =
            clamp_threshold(self.config.base_threshold - variability * VARIABILITY_RELAXATION);

        let base = self.config.base_threshold;
        self.stats
            .entry(identity.to_string())
            .or_insert_with(|| IdentityStatistics::new(clamp_threshold(base)))
            .threshold = threshold;

        tracing::info!(identity, variability, threshold, "threshold recalibrated");
        Ok(threshold)
    }

    fn judge(&self, distance: f32, threshold: f32) -> ComparisonResult {
        let similarity = similarity_from_distance(self.config.metric, distance);
        let confidence = confidence(similarity, threshold);
        ComparisonResult {
            distance,
            similarity,
            is_match: similarity >= threshold && confidence >= self.config.min_confidence,
            confidence,
            metric: self.config.metric,
            threshold,
        }
    }

    fn record(&mut self, identity: &str, result: &ComparisonResult) {
        let config = &self.config;
        let stats = self
            .stats
            .entry(identity.to_string())
            .or_insert_with(|| IdentityStatistics::new(clamp_threshold(config.base_threshold)));

        stats.comparisons += 1;
        stats.average_confidence +=
            (result.confidence - stats.average_confidence) / stats.comparisons as f32;
        stats.window_comparisons += 1;
        if result.is_match {
            stats.successful_matches += 1;
            stats.window_matches += 1;
        }

        if config.adaptive && stats.window_comparisons >= config.adaptation_interval.max(1) {
            let rate = stats.window_matches as f32 / stats.window_comparisons as f32;
            let before = stats.threshold;
            if rate < config.low_success_rate {
                stats.threshold += config.adaptation_step;
            } else if rate > config.high_success_rate {
                stats.threshold -= config.adaptation_step;
            }
            stats.threshold = clamp_threshold(stats.threshold);
            stats.window_comparisons = 0;
            stats.window_matches = 0;
            if stats.threshold != before {
                tracing::debug!(
                    identity,
                    rate,
                    before,
                    after = stats.threshold,
                    "adaptive threshold adjusted"
                );
            }
        }
    }
}

fn clamp_threshold(t: f32) -> f32 {
    t.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

fn check_pair(a: &Descriptor, b: &Descriptor) -> Result<(), MatchError> {
    if a.is_empty() || b.is_empty() {
        return Err(MatchError::EmptyDescriptor);
    }
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// L2-normalise `v`. Vectors with a norm below machine epsilon are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

/// Distance between two raw descriptors under `metric` (both are normalised first).
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    unit_distance(metric, &normalize(a), &normalize(b))
}

fn unit_distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let euclidean = || a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt();
    let cosine = || 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    match metric {
        DistanceMetric::Cosine => cosine(),
        DistanceMetric::Euclidean => euclidean(),
        DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
        DistanceMetric::Combined => {
            COMBINED_COSINE_WEIGHT * cosine() + COMBINED_EUCLIDEAN_WEIGHT * (euclidean() / 2.0)
        }
    }
}

pub fn similarity_from_distance(metric: DistanceMetric, distance: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine | DistanceMetric::Combined => 1.0 - distance,
        DistanceMetric::Euclidean | DistanceMetric::Manhattan => (-distance).exp(),
    }
}

/// Confidence in [0.5, 1.0] above threshold, scaled by headroom; below 0.5 otherwise.
fn confidence(similarity: f32, threshold: f32) -> f32 {
    if similarity >= threshold {
        let headroom = (1.0 - threshold).max(f32::EPSILON);
        (0.5 + 0.5 * (similarity - threshold) / headroom).clamp(0.5, 1.0)
    } else if threshold > 0.0 {
        (0.5 * similarity / threshold).clamp(0.0, 0.5)
    } else {
        0.0
    }
}
