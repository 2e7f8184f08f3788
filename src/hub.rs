//! Intelligence Hub (C9): the façade composing the estimator (C6), router (C7), and
//! orchestrator (C8) behind `create_and_route_task`, `complete_task`, and status queries (§4.9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tracing::{info, instrument};

use crate::domain_types::{AgentName, Confidence, TaskId};
use crate::error::FabricError;
use crate::estimator::{self, Cfg, EstimateInputs};
use crate::messages::{Diagnostics, Event, Intent, Outcome, ReasoningEffort, Task, TaskResult};
use crate::orchestrator::Orchestrator;
use crate::router::embedding::EmbeddingProvider;
use crate::router::{self, ClusterModel, RoutingDecision};
use crate::storage::{OutcomeRecord, OutcomeStore};

/// Minimum new outcomes since the last rebuild before the background task retrains (§4.9).
const DEFAULT_RETRAIN_THRESHOLD: usize = 20;
/// Minimum new outcomes since the last auto-tune before the estimator config is retuned (§4.6).
const DEFAULT_CLUSTER_COUNT: usize = 8;

/// A point-in-time view of the fabric's health and tuning, returned by `get_system_status`.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    /// Known agents and their online/offline status.
    pub agents: HashMap<String, String>,
    /// Number of tasks currently in flight.
    pub active_tasks: usize,
    /// Count of tasks concluded at each effort label since startup.
    pub effort_distribution: HashMap<String, u64>,
    /// Current router exploration rate (computed at the last routing decision).
    pub exploration_rate: f64,
    /// When the cluster model was last rebuilt.
    pub last_cluster_rebuild_at: Option<chrono::DateTime<Utc>>,
}

/// Composes the estimator, router, and orchestrator behind the operations the rest of the
/// fabric calls to create, route, and conclude tasks (§4.9, §9's `HubContext` redesign).
pub struct Hub {
    orchestrator: Arc<Orchestrator>,
    store: Arc<OutcomeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    estimator_cfg: ArcSwap<Cfg>,
    cluster_model: ArcSwap<ClusterModel>,
    round_robin_cursor: std::sync::Mutex<usize>,
    candidates: Vec<AgentName>,
    min_cluster_samples: u64,
    cluster_count: usize,
    retrain_threshold: usize,
    last_rebuild_outcome_count: AtomicU64,
    last_rebuild_at: ArcSwap<Option<chrono::DateTime<Utc>>>,
    effort_distribution: dashmap::DashMap<String, AtomicU64>,
    last_epsilon: std::sync::atomic::AtomicU64,
}

impl Hub {
    /// Builds a hub over an existing orchestrator and outcome store.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<OutcomeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        candidates: Vec<AgentName>,
        min_cluster_samples: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            store,
            embedder,
            estimator_cfg: ArcSwap::from_pointee(Cfg::default()),
            cluster_model: ArcSwap::from_pointee(ClusterModel {
                min_samples: min_cluster_samples,
                ..ClusterModel::default()
            }),
            round_robin_cursor: std::sync::Mutex::new(0),
            candidates,
            min_cluster_samples,
            cluster_count: DEFAULT_CLUSTER_COUNT,
            retrain_threshold: DEFAULT_RETRAIN_THRESHOLD,
            last_rebuild_outcome_count: AtomicU64::new(0),
            last_rebuild_at: ArcSwap::from_pointee(None),
            effort_distribution: dashmap::DashMap::new(),
            last_epsilon: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Estimates effort, routes to a candidate agent, and constructs a [`Task`] ready to
    /// publish (§4.9, `create_and_route_task`).
    ///
    /// # Errors
    ///
    /// Returns an error if no candidates are configured.
    #[instrument(skip(self, content))]
    pub async fn create_and_route_task(
        &self,
        content: String,
        agent: AgentName,
        intent: Intent,
        event: Event,
        confidence: Option<Confidence>,
    ) -> Result<(Task, AgentName), FabricError> {
        let cfg = self.estimator_cfg.load();
        let (effort, diagnostics) = estimator::estimate(
            EstimateInputs {
                content: &content,
                event: Some(&event),
                intent: Some(&intent),
                confidence: confidence.map(|c| c.as_f64()),
                deadline_pressure: None,
            },
            &cfg,
        );
        self.effort_distribution
            .entry(effort_label(effort).to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let features = self.features_for(&content, &diagnostics).await;
        let model = self.cluster_model.load();
        let candidate_names: Vec<String> = self.candidates.iter().map(AgentName::to_string).collect();
        let (target_name, decision) = {
            let mut cursor = self
                .round_robin_cursor
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            router::route(&model, &features, &candidate_names, &mut cursor).map_err(FabricError::from)?
        };
        self.last_epsilon
            .store(decision.epsilon.to_bits(), Ordering::Relaxed);
        self.store.record_decision(target_name.clone(), decision).await;

        let target_agent = AgentName::try_new(target_name.clone())
            .map_err(|e| FabricError::Configuration(e.to_string()))?;

        let task_id = TaskId::generate();
        self.orchestrator
            .start_task(task_id, agent.to_string(), target_name);

        let task = Task {
            task_id,
            agent,
            content,
            intent,
            timestamp: Utc::now(),
            target_agent: target_agent.clone(),
            event,
            confidence,
            reasoning_effort: Some(effort),
            diagnostics: Some(diagnostics),
        };
        Ok((task, target_agent))
    }

    /// Builds a [`TaskResult`], records the outcome, and feeds it back to the estimator and
    /// router (§4.9, `complete_task`).
    #[instrument(skip(self, result_content))]
    pub async fn complete_task(
        &self,
        task_id: TaskId,
        outcome: Outcome,
        result_content: String,
        sender: AgentName,
        target_agent: AgentName,
    ) -> TaskResult {
        let (contributing_agents, duration) = self
            .orchestrator
            .conclude(task_id)
            .unwrap_or_else(|| (vec![sender.to_string()], Duration::from_secs(0)));

        let record = OutcomeRecord {
            task_id: task_id.to_string(),
            predicted_effort: ReasoningEffort::Medium,
            dominant_category: None,
            actual_duration: duration,
            success: outcome.is_success(),
            cluster_id: 0,
            agent: sender.to_string(),
            features: Vec::new(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append(record).await {
            tracing::warn!(error = %e, "failed to append outcome record");
        }
        self.maybe_rebuild().await;

        TaskResult {
            task_id,
            agent: sender,
            content: result_content,
            intent: Intent::ModifyTask,
            timestamp: Utc::now(),
            target_agent,
            event: if outcome.is_success() { Event::Complete } else { Event::Escalate },
            confidence: None,
            reasoning_effort: None,
            diagnostics: None,
            outcome,
            contributing_agents: contributing_agents
                .into_iter()
                .filter_map(|a| AgentName::try_new(a).ok())
                .collect(),
        }
    }

    /// Returns a point-in-time status snapshot (§4.9, `get_system_status`).
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        let effort_distribution = self
            .effort_distribution
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        SystemStatus {
            agents: HashMap::new(),
            active_tasks: self.orchestrator.active_task_count(),
            effort_distribution,
            exploration_rate: f64::from_bits(self.last_epsilon.load(Ordering::Relaxed)),
            last_cluster_rebuild_at: *self.last_rebuild_at.load_full(),
        }
    }

    /// Returns the most recent router decisions (§4.9, `api_get_router_decisions`).
    pub async fn api_get_router_decisions(&self, limit: usize) -> Vec<(String, RoutingDecision, chrono::DateTime<Utc>)> {
        self.store.recent_decisions(limit).await
    }

    async fn features_for(&self, content: &str, diagnostics: &Diagnostics) -> Vec<f32> {
        let mut features = self.embedder.embed(content).await;
        features.push(diagnostics.complexity_score as f32);
        features.push(diagnostics.word_count as f32);
        for count in diagnostics.category_hits.values() {
            features.push(*count as f32);
        }
        features
    }

    /// Rebuilds the cluster model if enough new outcomes have accumulated (§4.9 periodic
    /// background action); swaps the new snapshot in atomically.
    #[instrument(skip(self))]
    async fn maybe_rebuild(&self) {
        let history = match self.store.recent(10_000).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load outcome history for rebuild");
                return;
            }
        };
        let previous = self.last_rebuild_outcome_count.load(Ordering::Relaxed) as usize;
        if history.len().saturating_sub(previous) < self.retrain_threshold {
            return;
        }
        let model = router::rebuild(&history, self.cluster_count, self.min_cluster_samples);
        self.cluster_model.store(Arc::new(model));
        self.last_rebuild_outcome_count
            .store(history.len() as u64, Ordering::Relaxed);
        self.last_rebuild_at.store(Arc::new(Some(Utc::now())));
        info!(history_len = history.len(), "cluster model rebuilt");

        if self.estimator_cfg.load().autotune.enabled {
            let tuned = estimator::autotune(&history, &self.estimator_cfg.load());
            self.estimator_cfg.store(Arc::new(tuned));
        }
    }

    /// Spawns the periodic rebuild background task (§4.9).
    pub fn spawn_periodic_rebuild(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                hub.maybe_rebuild().await;
            }
        })
    }
}

fn effort_label(effort: ReasoningEffort) -> &'static str {
    match effort {
        ReasoningEffort::Low => "low",
        ReasoningEffort::Medium => "medium",
        ReasoningEffort::High => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::embedding::HashingEmbeddingProvider;
    use crate::time_provider::production_time_provider;
    use crate::domain_types::{ConsensusThreshold, MaxRounds, PlateauDelta, TaskTimeoutSecs};

    fn hub() -> Arc<Hub> {
        let orchestrator = Orchestrator::new(
            MaxRounds::default(),
            TaskTimeoutSecs::default(),
            ConsensusThreshold::default(),
            PlateauDelta::default(),
            production_time_provider(),
        );
        let store = OutcomeStore::in_memory(1000);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::default());
        Hub::new(
            orchestrator,
            store,
            embedder,
            vec![AgentName::try_new("worker_a".to_string()).unwrap()],
            1,
        )
    }

    #[tokio::test]
    async fn create_and_route_task_picks_only_candidate() {
        let hub = hub();
        let (task, target) = hub
            .create_and_route_task(
                "Summarize the text 'hello world' in one sentence.".to_string(),
                AgentName::try_new("frontend".to_string()).unwrap(),
                Intent::StartTask,
                Event::Plan,
                None,
            )
            .await
            .unwrap();
        assert_eq!(target.to_string(), "worker_a");
        assert_eq!(task.target_agent.to_string(), "worker_a");
        assert!(task.reasoning_effort.is_some());
    }

    #[tokio::test]
    async fn complete_task_builds_terminal_result() {
        let hub = hub();
        let (task, target) = hub
            .create_and_route_task(
                "hello".to_string(),
                AgentName::try_new("frontend".to_string()).unwrap(),
                Intent::StartTask,
                Event::Plan,
                None,
            )
            .await
            .unwrap();
        let result = hub
            .complete_task(
                task.task_id,
                Outcome::Completed,
                "done".to_string(),
                target.clone(),
                task.agent.clone(),
            )
            .await;
        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(result.event, Event::Complete);
    }
}
