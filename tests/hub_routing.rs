//! Integration coverage for the Hub's routing feedback loop: outcomes recorded through
//! `complete_task` feed the router's cluster rebuild, which then biases `create_and_route_task`
//! toward the higher-performing candidate (§8 E5), observed end to end through the public API
//! rather than by constructing a `ClusterModel` by hand.

use std::sync::Arc;

use switchboard::domain_types::{ConsensusThreshold, MaxRounds, PlateauDelta, TaskTimeoutSecs};
use switchboard::router::embedding::HashingEmbeddingProvider;
use switchboard::time_provider::production_time_provider;
use switchboard::{AgentName, Event, Hub, Intent, Orchestrator, Outcome, OutcomeStore, TaskId};

fn agent(name: &str) -> AgentName {
    AgentName::try_new(name.to_string()).unwrap()
}

fn hub_with_candidates() -> Arc<Hub> {
    let orchestrator = Orchestrator::new(
        MaxRounds::default(),
        TaskTimeoutSecs::default(),
        ConsensusThreshold::default(),
        PlateauDelta::default(),
        production_time_provider(),
    );
    let store = OutcomeStore::in_memory(1000);
    let embedder = Arc::new(HashingEmbeddingProvider::default());
    Hub::new(orchestrator, store, embedder, vec![agent("strong"), agent("weak")], 1)
}

#[tokio::test]
async fn router_feedback_biases_routing_toward_the_stronger_agent() {
    let hub = hub_with_candidates();

    for _ in 0..100 {
        hub.complete_task(TaskId::generate(), Outcome::Completed, "done".to_string(), agent("strong"), agent("frontend"))
            .await;
        hub.complete_task(TaskId::generate(), Outcome::Escalated, "failed".to_string(), agent("weak"), agent("frontend"))
            .await;
    }

    let status = hub.get_system_status();
    assert!(status.last_cluster_rebuild_at.is_some());

    let mut strong_wins = 0;
    for _ in 0..40 {
        let (_, target) = hub
            .create_and_route_task(
                "please help with this task".to_string(),
                agent("frontend"),
                Intent::StartTask,
                Event::Plan,
                None,
            )
            .await
            .unwrap();
        if target.to_string() == "strong" {
            strong_wins += 1;
        }
    }
    assert!(strong_wins > 20, "expected the stronger agent to win a clear majority, got {strong_wins}/40");
}

#[tokio::test]
async fn effort_distribution_and_active_task_count_are_visible_in_system_status() {
    let hub = hub_with_candidates();
    hub.create_and_route_task(
        "Summarize the text 'hello world' in one sentence.".to_string(),
        agent("frontend"),
        Intent::StartTask,
        Event::Plan,
        None,
    )
    .await
    .unwrap();

    let status = hub.get_system_status();
    assert_eq!(status.active_tasks, 1);
    let total_effort_count: u64 = status.effort_distribution.values().sum();
    assert_eq!(total_effort_count, 1);
}
