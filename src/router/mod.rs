//! Task Clustering & Router (C7): embeds tasks, clusters them, and recommends an agent with a
//! confidence, adapting over time from outcome feedback (§4.7).

pub mod embedding;

use std::collections::HashMap;

use rand::Rng;
use tracing::{info, instrument};

use crate::domain_types::ExplorationRate;
use crate::error::RouterError;
use crate::storage::OutcomeRecord;

pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};

const EPSILON_MIN: f64 = 0.05;
const EPSILON_MAX: f64 = 0.3;
const EPSILON_TAU: f64 = 200.0;
const SCORE_WEIGHT_SUCCESS: f64 = 0.7;
const SCORE_WEIGHT_DURATION: f64 = 0.3;

/// Per-cluster, per-agent performance statistics, updated incrementally (§4.7 step "Feedback").
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentClusterStats {
    /// Count of completions observed for this (agent, cluster) cell.
    pub n: u64,
    /// Running success rate (Bernoulli mean).
    pub success_rate: f64,
    /// Running mean duration, in seconds.
    pub mean_duration_secs: f64,
}

impl AgentClusterStats {
    fn observe(&mut self, duration_secs: f64, success: bool) {
        self.n += 1;
        let n = self.n as f64;
        self.success_rate += (f64::from(success) - self.success_rate) / n;
        self.mean_duration_secs += (duration_secs - self.mean_duration_secs) / n;
    }
}

/// An immutable snapshot of cluster centroids and per-agent performance, swapped atomically on
/// rebuild (§3, §5).
#[derive(Debug, Clone, Default)]
pub struct ClusterModel {
    /// Cluster centroids in feature space.
    pub centroids: Vec<Vec<f32>>,
    /// `(cluster_id, agent) -> stats`.
    pub stats: HashMap<(usize, String), AgentClusterStats>,
    /// Overall per-agent performance, used as the first routing fallback.
    pub overall: HashMap<String, AgentClusterStats>,
    /// Minimum sample count in a cell before it's trusted for cluster-level scoring.
    pub min_samples: u64,
}

impl ClusterModel {
    fn nearest_cluster(&self, features: &[f32]) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                distance(features, a)
                    .partial_cmp(&distance(features, b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map_or(0, |(idx, _)| idx)
    }
}

fn distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// A routing decision, returned alongside the chosen agent (§4.7 step 5).
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Which strategy produced the choice.
    pub method: RoutingMethod,
    /// Score gap between the best and second-best candidate, when scoring was used.
    pub confidence: f64,
    /// Cluster the task was assigned to.
    pub cluster_id: usize,
    /// The exploration rate in effect at decision time.
    pub epsilon: f64,
}

/// How a routing decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMethod {
    /// Uniform-random choice among candidates (exploration).
    Exploration,
    /// Best score within the assigned cluster.
    ClusterScore,
    /// Best overall per-agent performance (cluster had insufficient samples).
    OverallPerformance,
    /// Equal rotation among candidates (no performance data at all).
    RoundRobin,
    /// Only one candidate was supplied.
    FirstCandidate,
}

/// Decays `ε` with the observed sample count at the chosen cluster (§4.7 "Exploration policy").
#[must_use]
pub fn exploration_rate(n: u64) -> ExplorationRate {
    let value = EPSILON_MIN + (EPSILON_MAX - EPSILON_MIN) * (-(n as f64) / EPSILON_TAU).exp();
    ExplorationRate::try_new(value.clamp(EPSILON_MIN, EPSILON_MAX))
        .expect("epsilon is clamped into [EPSILON_MIN, EPSILON_MAX] which is within [0,1]")
}

/// Routes a task with the given `features` among `candidates`, using `model` and a running
/// round-robin cursor for the fallback path (§4.7).
///
/// # Errors
///
/// Returns [`RouterError::NoCandidates`] if `candidates` is empty.
#[instrument(skip(model, candidates, round_robin_cursor), fields(candidates = candidates.len()))]
pub fn route(
    model: &ClusterModel,
    features: &[f32],
    candidates: &[String],
    round_robin_cursor: &mut usize,
) -> Result<(String, RoutingDecision), RouterError> {
    if candidates.is_empty() {
        return Err(RouterError::NoCandidates);
    }
    if candidates.len() == 1 {
        return Ok((
            candidates[0].clone(),
            RoutingDecision {
                method: RoutingMethod::FirstCandidate,
                confidence: 1.0,
                cluster_id: 0,
                epsilon: 0.0,
            },
        ));
    }

    let cluster_id = if model.centroids.is_empty() {
        0
    } else {
        model.nearest_cluster(features)
    };

    let cluster_n: u64 = candidates
        .iter()
        .filter_map(|agent| model.stats.get(&(cluster_id, agent.clone())))
        .map(|s| s.n)
        .sum();
    let epsilon = exploration_rate(cluster_n).as_f64();

    if rand::thread_rng().gen_bool(epsilon) {
        let choice = &candidates[rand::thread_rng().gen_range(0..candidates.len())];
        return Ok((
            choice.clone(),
            RoutingDecision {
                method: RoutingMethod::Exploration,
                confidence: 0.0,
                cluster_id,
                epsilon,
            },
        ));
    }

    let mut scored: Vec<(String, f64, u64)> = candidates
        .iter()
        .filter_map(|agent| {
            model
                .stats
                .get(&(cluster_id, agent.clone()))
                .filter(|stats| stats.n >= model.min_samples)
                .map(|stats| {
                    let score = SCORE_WEIGHT_SUCCESS * stats.success_rate
                        + SCORE_WEIGHT_DURATION * (1.0 - normalized_duration(stats.mean_duration_secs));
                    (agent.clone(), score, stats.n)
                })
        })
        .collect();

    if !scored.is_empty() {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        let confidence = if scored.len() > 1 {
            scored[0].1 - scored[1].1
        } else {
            scored[0].1
        };
        return Ok((
            scored[0].0.clone(),
            RoutingDecision {
                method: RoutingMethod::ClusterScore,
                confidence,
                cluster_id,
                epsilon,
            },
        ));
    }

    // Fallback 1: overall per-agent performance.
    let mut overall_scored: Vec<(String, f64)> = candidates
        .iter()
        .filter_map(|agent| model.overall.get(agent).map(|s| (agent.clone(), s.success_rate)))
        .collect();
    if !overall_scored.is_empty() {
        overall_scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        return Ok((
            overall_scored[0].0.clone(),
            RoutingDecision {
                method: RoutingMethod::OverallPerformance,
                confidence: overall_scored[0].1,
                cluster_id,
                epsilon,
            },
        ));
    }

    // Fallback 2: round robin.
    *round_robin_cursor = (*round_robin_cursor + 1) % candidates.len();
    Ok((
        candidates[*round_robin_cursor].clone(),
        RoutingDecision {
            method: RoutingMethod::RoundRobin,
            confidence: 0.0,
            cluster_id,
            epsilon,
        },
    ))
}

fn normalized_duration(duration_secs: f64) -> f64 {
    (duration_secs / 300.0).clamp(0.0, 1.0)
}

/// Folds a completed task's outcome into `model`'s running statistics (§4.7 "Feedback").
#[instrument(skip(model))]
pub fn update_agent_stats(model: &mut ClusterModel, agent: &str, duration_secs: f64, success: bool, cluster_id: usize) {
    model
        .stats
        .entry((cluster_id, agent.to_string()))
        .or_default()
        .observe(duration_secs, success);
    model
        .overall
        .entry(agent.to_string())
        .or_default()
        .observe(duration_secs, success);
}

/// Rebuilds a [`ClusterModel`] from `history` using simple k-means over the feature vectors
/// recorded with each outcome, seeded deterministically from the first `k` distinct records.
#[instrument(skip(history))]
#[must_use]
pub fn rebuild(history: &[OutcomeRecord], k: usize, min_samples: u64) -> ClusterModel {
    if history.is_empty() || k == 0 {
        return ClusterModel {
            min_samples,
            ..ClusterModel::default()
        };
    }

    let features: Vec<&Vec<f32>> = history.iter().map(|r| &r.features).collect();
    let k = k.min(features.len());
    let mut centroids: Vec<Vec<f32>> = features.iter().take(k).map(|f| (*f).clone()).collect();

    for _ in 0..10 {
        let mut buckets: Vec<Vec<&Vec<f32>>> = vec![Vec::new(); centroids.len()];
        for f in &features {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| distance(f, a).partial_cmp(&distance(f, b)).unwrap_or(std::cmp::Ordering::Equal))
                .map_or(0, |(idx, _)| idx);
            buckets[nearest].push(f);
        }
        for (centroid, bucket) in centroids.iter_mut().zip(buckets.iter()) {
            if bucket.is_empty() {
                continue;
            }
            let dim = centroid.len();
            let mut sums = vec![0.0_f32; dim];
            for point in bucket {
                for (i, value) in point.iter().enumerate() {
                    sums[i] += value;
                }
            }
            for (i, sum) in sums.into_iter().enumerate() {
                centroid[i] = sum / bucket.len() as f32;
            }
        }
    }

    let mut model = ClusterModel {
        centroids,
        stats: HashMap::new(),
        overall: HashMap::new(),
        min_samples,
    };
    for record in history {
        let cluster_id = model.nearest_cluster(&record.features);
        update_agent_stats(&mut model, &record.agent, record.actual_duration.as_secs_f64(), record.success, cluster_id);
    }
    info!(clusters = model.centroids.len(), records = history.len(), "router model rebuilt");
    model
}
