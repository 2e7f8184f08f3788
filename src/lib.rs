//! # switchboard - multi-agent orchestration fabric
//!
//! A Redis-backed pub/sub bus, `WebSocket` gateway, agent runtime contract, orchestrator debate
//! state machine, and task-intelligence/routing hub, composed behind a small set of seams:
//!
//! - [`bus`] (C2): pub/sub plus key-value-with-TTL, backed by Redis or an in-memory adapter.
//! - [`messages`] (C1): the wire schema (`Message`/`Task`/`TaskResult`) and its JSON codec.
//! - [`heartbeat`] (C3): per-agent liveness and system-readiness broadcast.
//! - [`agent`] (C4): the shared runtime every agent variant runs on top of, plus the reference
//!   variants in [`agent::variants`].
//! - [`estimator`] (C6): content → reasoning-effort classification.
//! - [`router`] (C7): task clustering and adaptive agent selection.
//! - [`orchestrator`] (C8): the debate state machine.
//! - [`hub`] (C9): composes the estimator, router, and orchestrator behind a small façade.
//! - [`gateway`] (C5): the `WebSocket`/REST front door.
//!
//! `config` and `observability` carry the ambient stack (configuration presets and logging
//! initialization); `error` aggregates every layer's failure modes into [`error::FabricError`].

pub mod agent;
pub mod bus;
pub mod config;
pub mod domain_types;
pub mod error;
pub mod estimator;
pub mod gateway;
pub mod heartbeat;
pub mod hub;
pub mod messages;
pub mod observability;
pub mod orchestrator;
pub mod router;
pub mod storage;
pub mod time_provider;

pub use crate::agent::{AgentContext, AgentHandler, AgentRuntime, Outgoing};
pub use crate::bus::Bus;
pub use crate::config::FabricConfig;
pub use crate::domain_types::{
    AgentName, ChannelCapacity, ClientId, Confidence, ConsensusThreshold, DedupCacheSize,
    DispatchWorkerCount, ExplorationRate, HeartbeatIntervalSecs, HistoryBufferSize, MaxRounds,
    PlateauDelta, TaskId, TaskTimeoutSecs,
};
pub use crate::error::FabricError;
pub use crate::gateway::Gateway;
pub use crate::hub::Hub;
pub use crate::messages::{Envelope, Event, Intent, Message, Outcome, ReasoningEffort, Task, TaskResult};
pub use crate::orchestrator::Orchestrator;
pub use crate::storage::OutcomeStore;
