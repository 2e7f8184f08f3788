//! Reasoning Effort Estimator (C6): a pure function from content + event + intent to an effort
//! label plus diagnostics, with auto-tuning fed by the outcome history (§4.6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::messages::{Diagnostics, Event, Intent, ReasoningEffort};
use crate::storage::OutcomeRecord;

/// Per-category keyword configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Whether this category participates in scoring.
    pub enabled: bool,
    /// Contribution of each hit to `complexity_score`; must be positive.
    pub weight: f64,
    /// Keywords (matched case-insensitively on word boundaries).
    pub keywords: Vec<String>,
}

/// Word-count thresholds, scaled by `complexity_score`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    /// Word count above which the base level is `high`.
    pub high_word_count: usize,
    /// Word count above which the base level is `medium`.
    pub medium_word_count: usize,
    /// Scale applied to `complexity_score` when comparing against `high_word_count`.
    pub high_scale: f64,
    /// Scale applied to `complexity_score` when comparing against `medium_word_count`.
    pub medium_scale: f64,
}

/// Overrides applied after the base level is determined (§4.6 step 4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Overrides {
    /// Confidence below which the level is bumped one notch.
    pub low_confidence: f64,
    /// Deadline pressure above which the level is bumped to `high`.
    pub deadline_pressure: f64,
    /// Bonus added to `complexity_score` when two or more categories have hits (informational).
    pub category_overlap_bonus: f64,
}

/// Auto-tuning controls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutotuneConfig {
    /// Whether auto-tuning is active.
    pub enabled: bool,
    /// Number of new outcome records required since the last tune before tuning again.
    pub analysis_after: usize,
    /// Whether to retain the full outcome history (vs. trimming after each tune).
    pub retain_history: bool,
    /// Maximum number of outcome records kept when `retain_history` is false.
    pub history_limit: usize,
}

/// The estimator's full, atomically-swappable configuration (§4.6, §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cfg {
    /// Category name → configuration.
    pub categories: HashMap<String, CategoryConfig>,
    /// Word-count thresholds.
    pub thresholds: Thresholds,
    /// Post-hoc overrides.
    pub overrides: Overrides,
    /// Auto-tuning controls.
    pub autotune: AutotuneConfig,
}

impl Default for Cfg {
    fn default() -> Self {
        let mut categories = HashMap::new();
        categories.insert(
            "analytical".to_string(),
            CategoryConfig {
                enabled: true,
                weight: 1.0,
                keywords: vec!["analyze", "compare", "evaluate", "why", "explain"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
        );
        categories.insert(
            "comparative".to_string(),
            CategoryConfig {
                enabled: true,
                weight: 1.0,
                keywords: vec!["versus", "vs", "compared to", "better than", "trade-off"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
        );
        categories.insert(
            "creative".to_string(),
            CategoryConfig {
                enabled: true,
                weight: 0.75,
                keywords: vec!["imagine", "design", "brainstorm", "invent"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
        );
        categories.insert(
            "complex".to_string(),
            CategoryConfig {
                enabled: true,
                weight: 1.5,
                keywords: vec!["architecture", "distributed", "concurrency", "trade-offs"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
        );
        Self {
            categories,
            thresholds: Thresholds {
                high_word_count: 120,
                medium_word_count: 40,
                high_scale: 20.0,
                medium_scale: 10.0,
            },
            overrides: Overrides {
                low_confidence: 0.4,
                deadline_pressure: 0.7,
                category_overlap_bonus: 0.5,
            },
            autotune: AutotuneConfig {
                enabled: true,
                analysis_after: 50,
                retain_history: true,
                history_limit: 10_000,
            },
        }
    }
}

/// Inputs available when estimating effort for a piece of content.
#[derive(Debug, Clone, Copy)]
pub struct EstimateInputs<'a> {
    /// The content to estimate effort for.
    pub content: &'a str,
    /// The lifecycle event, if known.
    pub event: Option<&'a Event>,
    /// The intent, if known.
    pub intent: Option<&'a Intent>,
    /// Sender's confidence, if supplied.
    pub confidence: Option<f64>,
    /// External deadline-pressure signal, `[0, 1]`.
    pub deadline_pressure: Option<f64>,
}

/// Tokenizes on whitespace and counts, per enabled category, how many keywords appear.
fn category_hits(content: &str, cfg: &Cfg) -> HashMap<String, usize> {
    let normalized = content.to_lowercase();
    let mut hits = HashMap::new();
    for (name, category) in &cfg.categories {
        if !category.enabled {
            continue;
        }
        let count = category
            .keywords
            .iter()
            .filter(|keyword| normalized.contains(keyword.to_lowercase().as_str()))
            .count();
        if count > 0 {
            hits.insert(name.clone(), count);
        }
    }
    hits
}

fn bump(level: ReasoningEffort) -> ReasoningEffort {
    level.bump()
}

/// Estimates reasoning effort for `inputs` under `cfg` (§4.6).
///
/// Pure: no I/O, no mutable shared state; `cfg` is a plain value snapshot so repeated calls with
/// the same inputs and config are deterministic.
#[instrument(skip(inputs, cfg), fields(word_count))]
#[must_use]
pub fn estimate(inputs: EstimateInputs<'_>, cfg: &Cfg) -> (ReasoningEffort, Diagnostics) {
    let word_count = inputs.content.split_whitespace().count();
    let hits = category_hits(inputs.content, cfg);
    let complexity_score: f64 = hits
        .iter()
        .filter_map(|(name, count)| cfg.categories.get(name).map(|c| c.weight * *count as f64))
        .sum();

    let mut adjustments = Vec::new();

    let mut level = if word_count as f64
        > inputs_scaled(cfg.thresholds.high_word_count, complexity_score, cfg.thresholds.high_scale)
    {
        ReasoningEffort::High
    } else if word_count as f64
        > inputs_scaled(cfg.thresholds.medium_word_count, complexity_score, cfg.thresholds.medium_scale)
    {
        ReasoningEffort::Medium
    } else {
        ReasoningEffort::Low
    };

    if matches!(inputs.event, Some(Event::Refine) | Some(Event::Escalate)) {
        level = level.max(ReasoningEffort::High);
        adjustments.push("event_refine_or_escalate".to_string());
    }
    if matches!(inputs.intent, Some(Intent::ModifyTask)) {
        level = level.max(ReasoningEffort::High);
        adjustments.push("intent_modify_task".to_string());
    }
    if let Some(confidence) = inputs.confidence {
        if confidence < cfg.overrides.low_confidence {
            level = bump(level);
            adjustments.push("low_confidence".to_string());
        }
    }
    if let Some(pressure) = inputs.deadline_pressure {
        if pressure > cfg.overrides.deadline_pressure {
            level = level.max(ReasoningEffort::High);
            adjustments.push("deadline_pressure".to_string());
        }
    }
    if hits.len() >= 2 {
        level = bump(level);
        adjustments.push("multi_category_overlap".to_string());
    }

    let diagnostics = Diagnostics {
        word_count,
        category_hits: hits,
        complexity_score,
        adjustments_applied: adjustments,
    };

    (level, diagnostics)
}

fn inputs_scaled(threshold: usize, complexity_score: f64, scale: f64) -> f64 {
    threshold as f64 - complexity_score * scale / 10.0
}

/// Empirical effort bucket derived from an actual task duration, for auto-tune comparison.
fn empirical_effort(duration: std::time::Duration) -> ReasoningEffort {
    if duration > std::time::Duration::from_secs(120) {
        ReasoningEffort::High
    } else if duration > std::time::Duration::from_secs(30) {
        ReasoningEffort::Medium
    } else {
        ReasoningEffort::Low
    }
}

/// Recomputes category weights from `history` and returns a new `Cfg` snapshot (§4.6).
///
/// Only called once `history.len() >= cfg.autotune.analysis_after` new records have
/// accumulated since the previous tune; the caller is responsible for that gating and for
/// swapping the returned snapshot in atomically.
#[instrument(skip(history, cfg))]
#[must_use]
pub fn autotune(history: &[OutcomeRecord], cfg: &Cfg) -> Cfg {
    let mut tuned = cfg.clone();
    if !cfg.autotune.enabled || history.is_empty() {
        return tuned;
    }

    for (name, category) in &mut tuned.categories {
        let relevant: Vec<&OutcomeRecord> = history
            .iter()
            .filter(|record| record.dominant_category.as_deref() == Some(name.as_str()))
            .collect();
        if relevant.is_empty() {
            continue;
        }
        let misclassified = relevant
            .iter()
            .filter(|record| {
                let empirical = empirical_effort(record.actual_duration);
                record.predicted_effort != empirical
            })
            .count();
        let misclassification_rate = misclassified as f64 / relevant.len() as f64;
        let delta = (misclassification_rate - 0.2).clamp(-0.1, 0.1);
        category.weight = (category.weight * (1.0 + delta)).max(0.01);
    }

    info!(records = history.len(), "estimator config auto-tuned");
    tuned
}
