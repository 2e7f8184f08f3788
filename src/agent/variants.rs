//! Reference agent variants (§4.4.1): thin capability records wired to the shared
//! [`AgentRuntime`](super::AgentRuntime) driver, each holding only the collaborators its role
//! needs — the "dynamic dispatch on agent classes → capability record" redesign of §9.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::agent::{AgentContext, AgentHandler, Outgoing};
use crate::domain_types::AgentName;
use crate::messages::{Event, Intent, Message, Outcome, Task, TaskResult};
use crate::orchestrator::{Decision, Orchestrator};

fn advance_debate(orchestrator: &Orchestrator, task: &Task) -> Decision {
    let confidence = task.confidence.map(|c| c.as_f64());
    let sender = task.agent.to_string();
    match orchestrator.advance(task.task_id, &sender, &task.content, confidence) {
        Ok(decision) => decision,
        Err(e) => {
            warn!(error = %e, "orchestrator rejected advance, escalating");
            Decision::Conclude(Outcome::Escalated)
        }
    }
}

fn next_task(task: &Task, event: Event, target_agent: AgentName) -> Task {
    Task {
        task_id: task.task_id,
        agent: task.agent.clone(),
        content: task.content.clone(),
        intent: Intent::ModifyTask,
        timestamp: chrono::Utc::now(),
        target_agent,
        event,
        confidence: task.confidence,
        reasoning_effort: task.reasoning_effort,
        diagnostics: task.diagnostics.clone(),
    }
}

/// Kicks off the debate by requesting an initial proposal from the routed worker, and forwards
/// terminal results back to the task's original requester (§4.4.1).
pub struct Moderator {
    orchestrator: Arc<Orchestrator>,
    proposer: AgentName,
}

impl Moderator {
    /// Builds a moderator that forwards initial proposal requests to `proposer`.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, proposer: AgentName) -> Self {
        Self { orchestrator, proposer }
    }
}

#[async_trait]
impl AgentHandler for Moderator {
    fn get_notes(&self) -> String {
        "moderator: opens debates and relays terminal results to requesters".to_string()
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Option<Outgoing> {
        ctx.record_history(task.task_id, task.agent.clone(), &task.content, task.timestamp)
            .await;
        Some(Outgoing::Task(next_task(&task, Event::Execute, self.proposer.clone())))
    }

    async fn on_task_result(&self, _ctx: &AgentContext, result: TaskResult) -> Option<Outgoing> {
        let requester = self
            .orchestrator
            .status(result.task_id)
            .map(|state| state.original_requester)
            .unwrap_or_else(|| result.agent.to_string());
        let Ok(target) = AgentName::try_new(requester) else {
            return Some(Outgoing::TaskResult(result));
        };
        Some(Outgoing::TaskResult(TaskResult {
            target_agent: target,
            ..result
        }))
    }
}

/// Critiques the worker's proposal and pivots the debate toward `refine` (§4.4.1).
pub struct Arbitrator {
    orchestrator: Arc<Orchestrator>,
    refiner: AgentName,
    moderator: AgentName,
}

impl Arbitrator {
    /// Builds an arbitrator that forwards critiques to `refiner` and addresses concluding
    /// results to `moderator`, which relays them to the original requester.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, refiner: AgentName, moderator: AgentName) -> Self {
        Self { orchestrator, refiner, moderator }
    }
}

#[async_trait]
impl AgentHandler for Arbitrator {
    fn get_notes(&self) -> String {
        "arbitrator: critiques proposals and hands them to the refiner".to_string()
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Option<Outgoing> {
        if task.event != Event::Execute {
            return None;
        }
        ctx.record_history(task.task_id, task.agent.clone(), &task.content, task.timestamp)
            .await;
        match advance_debate(&self.orchestrator, &task) {
            Decision::Advance { next, .. } => Some(Outgoing::Task(next_task(&task, next, self.refiner.clone()))),
            Decision::Conclude(outcome) => Some(Outgoing::TaskResult(TaskResult {
                task_id: task.task_id,
                agent: task.agent,
                content: task.content,
                intent: Intent::ModifyTask,
                timestamp: chrono::Utc::now(),
                target_agent: self.moderator.clone(),
                event: if outcome.is_success() { Event::Complete } else { Event::Escalate },
                confidence: task.confidence,
                reasoning_effort: task.reasoning_effort,
                diagnostics: task.diagnostics,
                outcome,
                contributing_agents: vec![],
            })),
        }
    }
}

/// Produces a revised proposal, attaching confidence; alters its opening move when the
/// orchestrator signals a forced pivot from loop detection (§4.4.1, §4.8).
pub struct Refiner {
    orchestrator: Arc<Orchestrator>,
    arbitrator: AgentName,
    moderator: AgentName,
}

impl Refiner {
    /// Builds a refiner that returns revisions to `arbitrator` for another critique pass and
    /// addresses concluding results to `moderator`.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, arbitrator: AgentName, moderator: AgentName) -> Self {
        Self { orchestrator, arbitrator, moderator }
    }
}

#[async_trait]
impl AgentHandler for Refiner {
    fn get_notes(&self) -> String {
        "refiner: revises proposals under critique and attaches confidence".to_string()
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Option<Outgoing> {
        if task.event != Event::Refine {
            return None;
        }
        ctx.record_history(task.task_id, task.agent.clone(), &task.content, task.timestamp)
            .await;
        match advance_debate(&self.orchestrator, &task) {
            Decision::Advance { next, force_pivot } => {
                let mut revised = next_task(&task, next, self.arbitrator.clone());
                if force_pivot {
                    revised.content = format!("(revised strategy) {}", revised.content);
                }
                Some(Outgoing::Task(revised))
            }
            Decision::Conclude(outcome) => Some(Outgoing::TaskResult(TaskResult {
                task_id: task.task_id,
                agent: task.agent,
                content: task.content,
                intent: Intent::ModifyTask,
                timestamp: chrono::Utc::now(),
                target_agent: self.moderator.clone(),
                event: if outcome.is_success() { Event::Complete } else { Event::Escalate },
                confidence: task.confidence,
                reasoning_effort: task.reasoning_effort,
                diagnostics: task.diagnostics,
                outcome,
                contributing_agents: vec![],
            })),
        }
    }
}

/// Submits `tool_execute` tasks to the opaque tool-execution façade and replies once it
/// publishes completion (§4.4.1; the façade itself is out of scope, §4.5 Non-goals).
pub struct ToolExecutor {
    facade: Arc<dyn ToolFacade>,
}

/// The opaque tool-execution backend a deployment wires in; this crate only defines the seam.
#[async_trait]
pub trait ToolFacade: Send + Sync {
    /// Executes a tool invocation described by `content` and returns its textual result.
    async fn execute(&self, content: &str) -> Result<String, String>;
}

impl ToolExecutor {
    /// Builds a tool executor backed by `facade`.
    #[must_use]
    pub fn new(facade: Arc<dyn ToolFacade>) -> Self {
        Self { facade }
    }
}

#[async_trait]
impl AgentHandler for ToolExecutor {
    fn get_notes(&self) -> String {
        "tool_executor: submits tool_execute tasks to the tool façade".to_string()
    }

    async fn on_task(&self, _ctx: &AgentContext, task: Task) -> Option<Outgoing> {
        if task.intent != Intent::ToolExecute {
            return None;
        }
        let (outcome, content) = match self.facade.execute(&task.content).await {
            Ok(result) => (Outcome::Completed, result),
            Err(reason) => (Outcome::Escalated, reason),
        };
        Some(Outgoing::TaskResult(TaskResult {
            task_id: task.task_id,
            agent: task.agent.clone(),
            content,
            intent: Intent::ModifyTask,
            timestamp: chrono::Utc::now(),
            target_agent: task.agent,
            event: if outcome.is_success() { Event::Complete } else { Event::Escalate },
            confidence: None,
            reasoning_effort: task.reasoning_effort,
            diagnostics: task.diagnostics,
            outcome,
            contributing_agents: vec![],
        }))
    }
}

/// Owns the heartbeat-driven `system_status_update` publication and answers `check_status`
/// queries by consulting the orchestrator (§4.4.1, delegates emission to C3).
pub struct Coordinator {
    orchestrator: Arc<Orchestrator>,
}

impl Coordinator {
    /// Builds a coordinator over `orchestrator` for status lookups.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl AgentHandler for Coordinator {
    fn get_notes(&self) -> String {
        "coordinator: reports task status on request".to_string()
    }

    async fn on_message(&self, _ctx: &AgentContext, message: Message) -> Option<Outgoing> {
        if message.intent != Intent::CheckStatus {
            return None;
        }
        let status = self
            .orchestrator
            .status(message.task_id)
            .map_or_else(|| "unknown".to_string(), |state| state.status.as_str().to_string());
        Some(Outgoing::Message(Message {
            task_id: message.task_id,
            agent: message.agent.clone(),
            content: status,
            intent: Intent::CheckStatus,
            timestamp: chrono::Utc::now(),
        }))
    }
}

/// Synthesizes the initial plan outline consumed by the [`Moderator`] when a `start_task`
/// arrives with no existing orchestrator state (§4.4.1).
pub struct WorkflowGenerator {
    moderator: AgentName,
}

impl WorkflowGenerator {
    /// Builds a generator that forwards synthesized outlines to `moderator`.
    #[must_use]
    pub fn new(moderator: AgentName) -> Self {
        Self { moderator }
    }
}

#[async_trait]
impl AgentHandler for WorkflowGenerator {
    fn get_notes(&self) -> String {
        "workflow_generator: synthesizes an initial plan outline for new tasks".to_string()
    }

    async fn on_task(&self, ctx: &AgentContext, task: Task) -> Option<Outgoing> {
        if task.intent != Intent::StartTask || task.event != Event::Plan {
            return None;
        }
        ctx.record_history(task.task_id, task.agent.clone(), &task.content, task.timestamp)
            .await;
        let outline = format!("Plan outline: {}", task.content);
        Some(Outgoing::Task(Task {
            content: outline,
            ..next_task(&task, Event::Plan, self.moderator.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::domain_types::{ConsensusThreshold, MaxRounds, PlateauDelta, TaskId, TaskTimeoutSecs};
    use crate::time_provider::production_time_provider;

    fn ctx() -> AgentContext {
        let bus: Arc<dyn crate::bus::Bus> = Arc::new(MemoryBus::new());
        crate::agent::AgentContext::for_test(bus, AgentName::try_new("test_agent".to_string()).unwrap())
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Orchestrator::new(
            MaxRounds::default(),
            TaskTimeoutSecs::default(),
            ConsensusThreshold::default(),
            PlateauDelta::default(),
            production_time_provider(),
        )
    }

    fn sample_task(task_id: TaskId, event: Event) -> Task {
        Task {
            task_id,
            agent: AgentName::try_new("client_1".to_string()).unwrap(),
            content: "draft proposal".to_string(),
            intent: Intent::StartTask,
            timestamp: chrono::Utc::now(),
            target_agent: AgentName::try_new("moderator".to_string()).unwrap(),
            event,
            confidence: None,
            reasoning_effort: None,
            diagnostics: None,
        }
    }

    #[tokio::test]
    async fn moderator_forwards_initial_request_to_proposer() {
        let orchestrator = orchestrator();
        let proposer = AgentName::try_new("worker_a".to_string()).unwrap();
        let moderator = Moderator::new(orchestrator, proposer.clone());
        let task = sample_task(TaskId::generate(), Event::Plan);
        let Some(Outgoing::Task(forwarded)) = moderator.on_task(&ctx(), task).await else {
            panic!("expected a task");
        };
        assert_eq!(forwarded.target_agent, proposer);
        assert_eq!(forwarded.event, Event::Execute);
    }

    #[tokio::test]
    async fn arbitrator_ignores_non_execute_events() {
        let orchestrator = orchestrator();
        let refiner = AgentName::try_new("refiner".to_string()).unwrap();
        let moderator = AgentName::try_new("moderator".to_string()).unwrap();
        let arbitrator = Arbitrator::new(orchestrator, refiner, moderator);
        let task = sample_task(TaskId::generate(), Event::Plan);
        assert!(arbitrator.on_task(&ctx(), task).await.is_none());
    }

    #[tokio::test]
    async fn arbitrator_routes_to_refiner_on_execute() {
        let orchestrator = orchestrator();
        let task_id = TaskId::generate();
        orchestrator.start_task(task_id, "client_1".to_string(), "worker_a".to_string());
        let refiner = AgentName::try_new("refiner".to_string()).unwrap();
        let moderator = AgentName::try_new("moderator".to_string()).unwrap();
        let arbitrator = Arbitrator::new(orchestrator, refiner.clone(), moderator);
        let task = sample_task(task_id, Event::Execute);
        match arbitrator.on_task(&ctx(), task).await {
            Some(Outgoing::Task(next)) => assert_eq!(next.target_agent, refiner),
            _ => panic!("expected a task continuation"),
        }
    }

    #[tokio::test]
    async fn arbitrator_concludes_to_moderator_on_round_budget_exhaustion() {
        let orchestrator = Orchestrator::new(
            MaxRounds::try_new(1).unwrap(),
            TaskTimeoutSecs::default(),
            ConsensusThreshold::default(),
            PlateauDelta::default(),
            production_time_provider(),
        );
        let task_id = TaskId::generate();
        orchestrator.start_task(task_id, "client_1".to_string(), "worker_a".to_string());
        let refiner = AgentName::try_new("refiner".to_string()).unwrap();
        let moderator = AgentName::try_new("moderator".to_string()).unwrap();
        let arbitrator = Arbitrator::new(orchestrator, refiner, moderator.clone());
        let task = sample_task(task_id, Event::Execute);
        let Some(Outgoing::TaskResult(result)) = arbitrator.on_task(&ctx(), task).await else {
            panic!("expected a concluding task result");
        };
        assert_eq!(result.target_agent, moderator);
    }

    #[tokio::test]
    async fn coordinator_reports_unknown_for_missing_task() {
        let orchestrator = orchestrator();
        let coordinator = Coordinator::new(orchestrator);
        let message = Message {
            task_id: TaskId::generate(),
            agent: AgentName::try_new("client_1".to_string()).unwrap(),
            content: String::new(),
            intent: Intent::CheckStatus,
            timestamp: chrono::Utc::now(),
        };
        let Some(Outgoing::Message(reply)) = coordinator.on_message(&ctx(), message).await else {
            panic!("expected a message reply");
        };
        assert_eq!(reply.content, "unknown");
    }

    #[tokio::test]
    async fn workflow_generator_only_acts_on_fresh_start_tasks() {
        let generator = WorkflowGenerator::new(AgentName::try_new("moderator".to_string()).unwrap());
        let mut task = sample_task(TaskId::generate(), Event::Plan);
        task.intent = Intent::ModifyTask;
        assert!(generator.on_task(&ctx(), task).await.is_none());
    }
}
