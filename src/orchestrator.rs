//! Orchestrator State Machine (C8): drives the debate protocol, detects loops and plateaus,
//! trips the kill-switch, and records outcomes (§4.8).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::agent::content_digest;
use crate::domain_types::{ConsensusThreshold, MaxRounds, PlateauDelta, TaskId, TaskTimeoutSecs};
use crate::error::OrchestratorError;
use crate::messages::Event;
use crate::time_provider::SharedTimeProvider;

const PLATEAU_WINDOW: usize = 3;
const LOOP_DETECTION_THRESHOLD: u32 = 2;

/// One entry in a [`TaskState`]'s bounded history log (§3).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Who sent this entry.
    pub sender: String,
    /// The lifecycle event it carried.
    pub event: Event,
    /// Normalized content digest, for loop detection.
    pub digest: String,
    /// When it was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// In-memory, per-task state the orchestrator owns exclusively (§3).
#[derive(Debug, Clone)]
pub struct TaskState {
    /// Current lifecycle stage.
    pub status: Event,
    /// Who originally requested this task.
    pub original_requester: String,
    /// The agent currently expected to act.
    pub current_step: String,
    /// Debate round, starting at 1, non-decreasing.
    pub round: u32,
    /// Bounded ordered log of recent activity.
    pub history: VecDeque<HistoryEntry>,
    /// Last K confidences observed, for plateau detection.
    pub last_confidences: VecDeque<f64>,
    /// Count of consecutive near-duplicate proposals from the same sender.
    pub similarity_hits: u32,
    /// Wall-clock creation time, for kill-switch timeout.
    pub created_at: Instant,
    /// Agents that have contributed, in order of first contribution.
    pub contributing_agents: Vec<String>,
}

impl TaskState {
    fn new(original_requester: String, current_step: String, now: Instant) -> Self {
        Self {
            status: Event::Plan,
            original_requester,
            current_step,
            round: 1,
            history: VecDeque::new(),
            last_confidences: VecDeque::new(),
            similarity_hits: 0,
            created_at: now,
            contributing_agents: Vec::new(),
        }
    }

    fn note_contribution(&mut self, agent: &str) {
        if !self.contributing_agents.iter().any(|a| a == agent) {
            self.contributing_agents.push(agent.to_string());
        }
    }

    fn plateaued(&self, delta: PlateauDelta) -> bool {
        if self.last_confidences.len() < PLATEAU_WINDOW {
            return false;
        }
        let max = self.last_confidences.iter().cloned().fold(f64::MIN, f64::max);
        let min = self.last_confidences.iter().cloned().fold(f64::MAX, f64::min);
        max - min < delta.as_f64()
    }
}

/// A decision the orchestrator reached for a given `Task` continuation: which state the task
/// moves to, and whether a terminal outcome was concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed to this next event, possibly forcing a pivot on loop detection.
    Advance { next: Event, force_pivot: bool },
    /// Conclude the task with this outcome.
    Conclude(crate::messages::Outcome),
}

/// Owns every task's [`TaskState`] and applies the debate transition rules (§4.8).
pub struct Orchestrator {
    tasks: DashMap<TaskId, TaskState>,
    max_rounds: MaxRounds,
    task_timeout: TaskTimeoutSecs,
    consensus_threshold: ConsensusThreshold,
    plateau_delta: PlateauDelta,
    time: SharedTimeProvider,
}

impl Orchestrator {
    /// Builds an orchestrator with the given thresholds.
    #[must_use]
    pub fn new(
        max_rounds: MaxRounds,
        task_timeout: TaskTimeoutSecs,
        consensus_threshold: ConsensusThreshold,
        plateau_delta: PlateauDelta,
        time: SharedTimeProvider,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            max_rounds,
            task_timeout,
            consensus_threshold,
            plateau_delta,
            time,
        })
    }

    /// Begins tracking a new task, moving it to `plan` (§4.8, `start_task` transition).
    #[instrument(skip(self))]
    pub fn start_task(&self, task_id: TaskId, original_requester: String, current_step: String) {
        self.tasks
            .insert(task_id, TaskState::new(original_requester, current_step, self.time.instant()));
    }

    /// Records a proposal/critique/refinement and decides the next transition (§4.8).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TaskNotFound`] if no state exists for `task_id`, and
    /// [`OrchestratorError::AlreadyTerminal`] if the task already concluded.
    #[instrument(skip(self, content), fields(task_id = %task_id))]
    pub fn advance(
        &self,
        task_id: TaskId,
        sender: &str,
        content: &str,
        confidence: Option<f64>,
    ) -> Result<Decision, OrchestratorError> {
        let mut state = self
            .tasks
            .get_mut(&task_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;

        if state.status.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(task_id));
        }

        // Kill-switch: timeout or round budget, checked before recording new state.
        if self.time.instant().duration_since(state.created_at) >= self.task_timeout.as_duration() {
            warn!("task exceeded wall-clock timeout, escalating");
            return Ok(Decision::Conclude(crate::messages::Outcome::Escalated));
        }
        if state.round > self.max_rounds.kill_switch_rounds() {
            warn!("task exceeded kill-switch round budget, escalating");
            return Ok(Decision::Conclude(crate::messages::Outcome::Escalated));
        }

        let digest = content_digest(content);
        let repeated = state
            .history
            .back()
            .is_some_and(|last| last.sender == sender && last.digest == digest);
        if repeated {
            state.similarity_hits += 1;
        } else {
            state.similarity_hits = 0;
        }

        let status_at_contribution = state.status.clone();
        state.note_contribution(sender);
        state.history.push_back(HistoryEntry {
            sender: sender.to_string(),
            event: status_at_contribution,
            digest,
            timestamp: chrono::Utc::now(),
        });
        state.round += 1;

        if let Some(confidence) = confidence {
            if state.last_confidences.len() == PLATEAU_WINDOW {
                state.last_confidences.pop_front();
            }
            state.last_confidences.push_back(confidence);
        }

        if state.similarity_hits >= LOOP_DETECTION_THRESHOLD {
            if state.similarity_hits > LOOP_DETECTION_THRESHOLD {
                info!("loop persisted through forced pivot, escalating");
                return Ok(Decision::Conclude(crate::messages::Outcome::Escalated));
            }
            info!("loop detected, forcing refine pivot");
            state.status = Event::Refine;
            return Ok(Decision::Advance {
                next: Event::Refine,
                force_pivot: true,
            });
        }

        if let Some(confidence) = confidence {
            if confidence >= self.consensus_threshold.as_f64() {
                return Ok(Decision::Conclude(crate::messages::Outcome::Completed));
            }
        }

        if state.plateaued(self.plateau_delta) {
            info!("confidence plateaued, concluding by majority");
            return Ok(Decision::Conclude(crate::messages::Outcome::Merged));
        }

        if state.round > self.max_rounds.into_inner() {
            return Ok(Decision::Conclude(crate::messages::Outcome::Completed));
        }

        let current = state.status.clone();
        let next = match current {
            Event::Plan => Event::Execute,
            Event::Execute => Event::Refine,
            Event::Refine => Event::Execute,
            other => other,
        };
        state.status = next.clone();
        Ok(Decision::Advance {
            next,
            force_pivot: false,
        })
    }

    /// Tears down task state after a terminal outcome, returning the contributing agents and
    /// elapsed duration for outcome recording (§4.8, "Outcome recording").
    pub fn conclude(&self, task_id: TaskId) -> Option<(Vec<String>, std::time::Duration)> {
        self.tasks.remove(&task_id).map(|(_, state)| {
            (
                state.contributing_agents,
                self.time.instant().duration_since(state.created_at),
            )
        })
    }

    /// Returns a snapshot of a task's current state, for `check_status` (§4.9).
    #[must_use]
    pub fn status(&self, task_id: TaskId) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|entry| entry.value().clone())
    }

    /// Number of tasks currently tracked (in-flight).
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::production_time_provider;

    fn orchestrator() -> Arc<Orchestrator> {
        Orchestrator::new(
            MaxRounds::default(),
            TaskTimeoutSecs::default(),
            ConsensusThreshold::default(),
            PlateauDelta::default(),
            production_time_provider(),
        )
    }

    #[test]
    fn high_confidence_concludes_completed() {
        let orchestrator = orchestrator();
        let task_id = TaskId::generate();
        orchestrator.start_task(task_id, "client_1".to_string(), "worker_a".to_string());
        let decision = orchestrator
            .advance(task_id, "worker_a", "a proposal", Some(0.95))
            .unwrap();
        assert_eq!(decision, Decision::Conclude(crate::messages::Outcome::Completed));
    }

    #[test]
    fn repeated_identical_proposals_force_pivot_then_escalate() {
        let orchestrator = orchestrator();
        let task_id = TaskId::generate();
        orchestrator.start_task(task_id, "client_1".to_string(), "worker_a".to_string());
        orchestrator.advance(task_id, "worker_a", "same text", None).unwrap();
        let second = orchestrator.advance(task_id, "worker_a", "same text", None).unwrap();
        assert!(matches!(second, Decision::Advance { force_pivot: false, .. }));
        let third = orchestrator.advance(task_id, "worker_a", "same text", None).unwrap();
        assert!(matches!(
            third,
            Decision::Advance { force_pivot: true, .. }
        ));
        let fourth = orchestrator.advance(task_id, "worker_a", "same text", None).unwrap();
        assert_eq!(fourth, Decision::Conclude(crate::messages::Outcome::Escalated));
    }

    #[test]
    fn plateaued_confidences_conclude_merged() {
        let orchestrator = orchestrator();
        let task_id = TaskId::generate();
        orchestrator.start_task(task_id, "client_1".to_string(), "worker_a".to_string());
        orchestrator.advance(task_id, "worker_a", "first", Some(0.81)).unwrap();
        orchestrator.advance(task_id, "worker_a", "second", Some(0.83)).unwrap();
        let third = orchestrator.advance(task_id, "worker_a", "third", Some(0.82)).unwrap();
        assert_eq!(third, Decision::Conclude(crate::messages::Outcome::Merged));
    }

    #[test]
    fn unknown_task_id_is_an_error() {
        let orchestrator = orchestrator();
        let result = orchestrator.advance(TaskId::generate(), "x", "y", None);
        assert!(matches!(result, Err(OrchestratorError::TaskNotFound(_))));
    }
}
