//! Integration coverage for `AgentRuntime` wired to a live `MemoryBus`: duplicate suppression
//! and E6's malformed-payload dead-lettering, observed from outside the runtime rather than by
//! calling its dispatch internals directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use switchboard::domain_types::{DedupCacheSize, DispatchWorkerCount, HeartbeatIntervalSecs, HistoryBufferSize};
use switchboard::{AgentContext, AgentHandler, AgentName, AgentRuntime, Bus, Envelope, Intent, Message, Outgoing, TaskId};
use tokio::sync::watch;

struct CountingHandler {
    calls: AtomicUsize,
}

impl CountingHandler {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentHandler for CountingHandler {
    async fn on_message(&self, _ctx: &AgentContext, _message: Message) -> Option<Outgoing> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

fn runtime_for(
    bus: Arc<dyn Bus>,
    name: AgentName,
    handler: Arc<CountingHandler>,
) -> Arc<AgentRuntime<CountingHandler>> {
    Arc::new(AgentRuntime::new(
        bus,
        name,
        handler,
        HeartbeatIntervalSecs::default(),
        DispatchWorkerCount::try_new(1).unwrap(),
        DedupCacheSize::default(),
        HistoryBufferSize::default(),
    ))
}

#[tokio::test]
async fn duplicate_envelope_is_dispatched_only_once() {
    let bus: Arc<dyn Bus> = Arc::new(switchboard::bus::memory::MemoryBus::new());
    let name = AgentName::try_new("worker_a".to_string()).unwrap();
    let handler = Arc::new(CountingHandler::new());
    let runtime = runtime_for(bus.clone(), name.clone(), handler.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn({
        let runtime = runtime.clone();
        async move {
            runtime.run(Duration::from_secs(1), shutdown_rx).await.unwrap();
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let message = Message {
        task_id: TaskId::generate(),
        agent: AgentName::try_new("client_1".to_string()).unwrap(),
        content: "hello".to_string(),
        intent: Intent::Chat,
        timestamp: Utc::now(),
    };
    let bytes = Envelope::Message(message).encode().unwrap();
    bus.publish(&name.channel(), bytes.clone()).await.unwrap();
    bus.publish(&name.channel(), bytes).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handler.calls(), 1);

    shutdown_tx.send(true).unwrap();
    run_handle.await.unwrap();
}

/// E6: a payload missing `task_id` decodes to `Envelope::Unknown`, never reaches a handler, and
/// is forwarded verbatim to the `dead_letter` channel.
#[tokio::test]
async fn malformed_payload_is_dead_lettered_and_never_reaches_the_handler() {
    let bus: Arc<dyn Bus> = Arc::new(switchboard::bus::memory::MemoryBus::new());
    let name = AgentName::try_new("worker_a".to_string()).unwrap();
    let handler = Arc::new(CountingHandler::new());
    let runtime = runtime_for(bus.clone(), name.clone(), handler.clone());

    let mut dead_letters = bus.subscribe("dead_letter").await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn({
        let runtime = runtime.clone();
        async move {
            runtime.run(Duration::from_secs(1), shutdown_rx).await.unwrap();
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let malformed = br#"{"agent":"worker_a","content":"hi","intent":"chat","timestamp":"2026-01-01T00:00:00Z"}"#.to_vec();
    bus.publish(&name.channel(), malformed.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), dead_letters.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, malformed);
    assert_eq!(handler.calls(), 0);

    shutdown_tx.send(true).unwrap();
    run_handle.await.unwrap();
}
