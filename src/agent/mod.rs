//! Agent Runtime (C4): the shared lifecycle every agent variant runs on top of.
//!
//! Variants are thin capability records implementing [`AgentHandler`]; the runtime owns
//! subscription, dispatch-by-intent, duplicate suppression, history bookkeeping, heartbeats,
//! and failure containment so a variant only ever writes domain logic (§4.4, §9's
//! "capability record" redesign).

pub mod variants;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use lru::LruCache;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, instrument, warn};

use crate::bus::Bus;
use crate::domain_types::{AgentName, DedupCacheSize, DispatchWorkerCount, HeartbeatIntervalSecs, HistoryBufferSize, TaskId};
use crate::error::AgentError;
use crate::heartbeat::emit_loop;
use crate::messages::{Envelope, Intent, Message, Task, TaskResult};

const PUBLISH_RETRY_ATTEMPTS: u32 = 3;

/// A response a handler wants published on its behalf (§4.4 step 4, "Emit").
pub enum Outgoing {
    /// A plain chat/control message.
    Message(Message),
    /// A task continuation.
    Task(Task),
    /// A terminal task result.
    TaskResult(TaskResult),
}

impl Outgoing {
    fn target_channel(&self) -> String {
        match self {
            Outgoing::Message(m) => m.agent.channel(),
            Outgoing::Task(t) => t.target_agent.channel(),
            Outgoing::TaskResult(r) => r.target_agent.channel(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, crate::error::ProtocolError> {
        match self {
            Outgoing::Message(m) => Envelope::Message(m.clone()).encode(),
            Outgoing::Task(t) => Envelope::Task(t.clone()).encode(),
            Outgoing::TaskResult(r) => Envelope::TaskResult(r.clone()).encode(),
        }
    }
}

/// A bounded ring of recent `(sender, content_digest, timestamp)` entries for one task (§3).
struct HistoryRing {
    capacity: usize,
    entries: VecDeque<(AgentName, String, chrono::DateTime<chrono::Utc>)>,
}

impl HistoryRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, sender: AgentName, digest: String, timestamp: chrono::DateTime<chrono::Utc>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((sender, digest, timestamp));
    }
}

/// Normalizes content for loop-detection digesting: lowercase, whitespace-collapsed (§4.8).
#[must_use]
pub fn content_digest(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Shared state and helpers passed to every handler invocation.
pub struct AgentContext {
    bus: Arc<dyn Bus>,
    name: AgentName,
    history: DashMap<TaskId, Mutex<HistoryRing>>,
    history_capacity: usize,
    malformed_messages: std::sync::atomic::AtomicU64,
}

impl AgentContext {
    /// Builds a context directly for use in handler unit tests, bypassing `AgentRuntime`.
    #[cfg(test)]
    pub(crate) fn for_test(bus: Arc<dyn Bus>, name: AgentName) -> Self {
        Self {
            bus,
            name,
            history: DashMap::new(),
            history_capacity: 32,
            malformed_messages: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// This agent's own name.
    #[must_use]
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// Records a content digest in the per-task history ring, creating it if absent.
    pub async fn record_history(&self, task_id: TaskId, sender: AgentName, content: &str, timestamp: chrono::DateTime<chrono::Utc>) {
        let ring = self
            .history
            .entry(task_id)
            .or_insert_with(|| Mutex::new(HistoryRing::new(self.history_capacity)));
        ring.value().lock().await.push(sender, content_digest(content), timestamp);
    }

    /// Drops the history ring for a task that has reached a terminal state.
    pub fn clear_history(&self, task_id: TaskId) {
        self.history.remove(&task_id);
    }

    /// Publishes `outgoing` to its target channel, retrying with backoff up to three times
    /// before surfacing an `error` payload on this agent's own channel (§4.4 failure semantics).
    #[instrument(skip(self, outgoing))]
    pub async fn publish(&self, outgoing: Outgoing) -> Result<(), AgentError> {
        let channel = outgoing.target_channel();
        let payload = outgoing.encode().map_err(|e| AgentError::HandlerFailed {
            task_id: TaskId::generate(),
            reason: e.to_string(),
        })?;

        let mut attempt = 0;
        loop {
            match self.bus.publish(&channel, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < PUBLISH_RETRY_ATTEMPTS => {
                    warn!(error = %e, attempt, channel, "publish failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt + 1))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, channel, "publish failed after retries");
                    let _ = self.bus.publish(&self.name.channel(), b"{\"type\":\"error\"}".to_vec()).await;
                    return Err(AgentError::Bus(e));
                }
            }
        }
    }

    fn note_malformed(&self) {
        self.malformed_messages
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Count of inbound payloads dropped for failing to decode or match a known shape (§7).
    #[must_use]
    pub fn malformed_message_count(&self) -> u64 {
        self.malformed_messages.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// The capability interface every reference agent variant implements (§4.4, §9).
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Free-text description of this agent's role, sent as the initial `notes` payload.
    fn get_notes(&self) -> String {
        String::new()
    }

    /// Handles a `chat` message. May ignore or respond.
    async fn on_message(&self, _ctx: &AgentContext, _message: Message) -> Option<Outgoing> {
        None
    }

    /// Handles `start_task`, or a `modify_task` continuation carrying a `Task` shape.
    async fn on_task(&self, _ctx: &AgentContext, _task: Task) -> Option<Outgoing> {
        None
    }

    /// Handles a `modify_task` continuation carrying a `TaskResult` shape.
    async fn on_task_result(&self, _ctx: &AgentContext, _result: TaskResult) -> Option<Outgoing> {
        None
    }

    /// Handles a `tool_execute` completion.
    async fn on_tool_response(&self, _ctx: &AgentContext, _result: TaskResult) -> Option<Outgoing> {
        None
    }
}

/// Drives one agent's lifecycle: start, listen, dispatch, emit, stop (§4.4).
pub struct AgentRuntime<H: AgentHandler + 'static> {
    handler: Arc<H>,
    ctx: Arc<AgentContext>,
    heartbeat_interval: HeartbeatIntervalSecs,
    worker_count: DispatchWorkerCount,
    dedup_capacity: DedupCacheSize,
}

impl<H: AgentHandler + 'static> AgentRuntime<H> {
    /// Builds a runtime for `handler`, named `name`, over `bus`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn Bus>,
        name: AgentName,
        handler: Arc<H>,
        heartbeat_interval: HeartbeatIntervalSecs,
        worker_count: DispatchWorkerCount,
        dedup_capacity: DedupCacheSize,
        history_capacity: HistoryBufferSize,
    ) -> Self {
        let ctx = Arc::new(AgentContext {
            bus,
            name,
            history: DashMap::new(),
            history_capacity: history_capacity.as_usize(),
            malformed_messages: std::sync::atomic::AtomicU64::new(0),
        });
        Self {
            handler,
            ctx,
            heartbeat_interval,
            worker_count,
            dedup_capacity,
        }
    }

    /// Runs the full lifecycle until `shutdown` fires, then drains in-flight handlers up to
    /// `drain_timeout` before returning (§4.4 step 5, "Stop").
    #[instrument(skip(self, shutdown), fields(agent = %self.ctx.name))]
    pub async fn run(self: Arc<Self>, drain_timeout: Duration, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        info!("agent starting");

        // Start: announce notes on our own channel.
        let notes = self.handler.get_notes();
        if !notes.is_empty() {
            let _ = self.ctx.bus.publish(&self.ctx.name.channel(), notes.into_bytes()).await;
        }

        // Begin heartbeat loop.
        let heartbeat_cancel = shutdown.clone();
        let heartbeat_bus = self.ctx.bus.clone();
        let heartbeat_name = self.ctx.name.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            emit_loop(heartbeat_bus, heartbeat_name, heartbeat_interval, heartbeat_cancel).await;
        });

        // Listen: subscribe to our own channel.
        let mut inbound = self
            .ctx
            .bus
            .subscribe(&self.ctx.name.channel())
            .await
            .map_err(AgentError::Bus)?;

        // Dispatch workers, partitioned by task_id hash (§5 ordering guarantee).
        let worker_count = self.worker_count.as_usize();
        let mut senders = Vec::with_capacity(worker_count);
        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<Envelope>(256);
            let handler = self.handler.clone();
            let ctx = self.ctx.clone();
            let dedup_capacity = self.dedup_capacity.as_usize();
            worker_handles.push(tokio::spawn(async move {
                let mut seen: LruCache<String, ()> =
                    LruCache::new(std::num::NonZeroUsize::new(dedup_capacity).unwrap());
                while let Some(envelope) = rx.recv().await {
                    dispatch_one(&handler, &ctx, &mut seen, envelope).await;
                }
            }));
            senders.push(tx);
        }

        loop {
            tokio::select! {
                maybe_payload = inbound.next() => {
                    let Some(payload) = maybe_payload else { break };
                    match Envelope::decode(&payload) {
                        Ok(Envelope::Unknown(_)) => {
                            self.ctx.note_malformed();
                            let _ = self.ctx.bus.publish("dead_letter", payload).await;
                        }
                        Ok(envelope) => {
                            let worker = partition_for(&envelope, worker_count);
                            if senders[worker].send(envelope).await.is_err() {
                                warn!("dispatch worker channel closed");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to decode inbound payload");
                            self.ctx.note_malformed();
                            let _ = self.ctx.bus.publish("dead_letter", payload).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(senders);
        let _ = tokio::time::timeout(drain_timeout, async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        })
        .await;
        let _ = heartbeat_task.await;
        info!("agent stopped");
        Ok(())
    }
}

fn partition_for(envelope: &Envelope, worker_count: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let task_id = match envelope {
        Envelope::Message(m) => m.task_id,
        Envelope::Task(t) => t.task_id,
        Envelope::TaskResult(r) => r.task_id,
        Envelope::Unknown(_) => return 0,
    };
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    task_id.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count.max(1)
}

fn dedup_key(task_id: TaskId, intent: &Intent, timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("{task_id}:{}:{}", intent.as_str(), timestamp.to_rfc3339())
}

#[instrument(skip(handler, ctx, seen, envelope))]
async fn dispatch_one<H: AgentHandler>(
    handler: &Arc<H>,
    ctx: &Arc<AgentContext>,
    seen: &mut LruCache<String, ()>,
    envelope: Envelope,
) {
    let (task_id, intent, timestamp) = match &envelope {
        Envelope::Message(m) => (m.task_id, m.intent.clone(), m.timestamp),
        Envelope::Task(t) => (t.task_id, t.intent.clone(), t.timestamp),
        Envelope::TaskResult(r) => (r.task_id, r.intent.clone(), r.timestamp),
        Envelope::Unknown(_) => return,
    };

    let key = dedup_key(task_id, &intent, timestamp);
    if seen.put(key, ()).is_some() {
        return;
    }

    let outgoing = match envelope {
        Envelope::Message(message) => handler.on_message(ctx, message).await,
        Envelope::Task(task) => handler.on_task(ctx, task).await,
        Envelope::TaskResult(result) if intent == Intent::ToolExecute => {
            handler.on_tool_response(ctx, result).await
        }
        Envelope::TaskResult(result) => handler.on_task_result(ctx, result).await,
        Envelope::Unknown(_) => None,
    };

    if let Some(outgoing) = outgoing {
        if let Err(e) = ctx.publish(outgoing).await {
            error!(error = %e, "handler response failed to publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::domain_types::Confidence;

    #[test]
    fn content_digest_normalizes_case_and_whitespace() {
        assert_eq!(content_digest("  Hello   World "), "hello world");
        assert_eq!(content_digest("hello world"), content_digest("  Hello   World "));
    }

    #[tokio::test]
    async fn duplicate_messages_are_suppressed() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let ctx = Arc::new(AgentContext {
            bus,
            name: AgentName::try_new("worker_a".to_string()).unwrap(),
            history: DashMap::new(),
            history_capacity: 32,
            malformed_messages: std::sync::atomic::AtomicU64::new(0),
        });
        let mut seen: LruCache<String, ()> = LruCache::new(std::num::NonZeroUsize::new(16).unwrap());
        let task_id = TaskId::generate();
        let timestamp = chrono::Utc::now();
        let key = dedup_key(task_id, &Intent::Chat, timestamp);
        assert!(seen.put(key.clone(), ()).is_none());
        assert!(seen.put(key, ()).is_some());
        let _ = ctx;
        let _ = Confidence::try_new(0.5).unwrap();
    }
}
