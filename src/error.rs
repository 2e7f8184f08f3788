//! Error taxonomy for the switchboard fabric
//!
//! One `thiserror` enum per architectural layer (§7), aggregated into
//! [`FabricError`] at the binary boundary. `anyhow` is reserved for
//! `main.rs`/CLI entry points.

use thiserror::Error;

use crate::domain_types::TaskId;

/// Errors from the bus adapter (C2): connectivity, publish/subscribe, key-value ops.
#[derive(Debug, Error)]
pub enum BusError {
    /// The adapter is disconnected and the outbound publish failed fast (§4.2).
    #[error("bus disconnected, publish to '{channel}' rejected")]
    Disconnected {
        /// Channel the caller attempted to publish to.
        channel: String,
    },

    /// A broker-level I/O error occurred.
    #[error("bus connection error: {0}")]
    Connection(String),

    /// `set_with_ttl`/`get`/`scan` failed.
    #[error("bus key-value error on '{key}': {reason}")]
    KeyValue {
        /// Key the operation targeted.
        key: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// The bus was closed by the caller.
    #[error("bus is closed")]
    Closed,
}

/// Errors from the message codec (C1): decoding, validation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON failed to parse at all.
    #[error("malformed JSON payload: {0}")]
    MalformedJson(String),

    /// JSON parsed but is missing a required field.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// A field's value failed validation.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },
}

/// Errors from the agent runtime (C4): dispatch, handler execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A handler raised an error while processing a message.
    #[error("handler failed for task {task_id}: {reason}")]
    HandlerFailed {
        /// Task the handler was processing.
        task_id: TaskId,
        /// Why the handler failed.
        reason: String,
    },

    /// The dispatch work queue is full (capacity error, §7).
    #[error("dispatch queue full for agent '{agent}'")]
    QueueFull {
        /// Agent whose queue is saturated.
        agent: String,
    },

    /// Bus errors surfaced while the agent was publishing or subscribing.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors from the orchestrator state machine (C8): invalid transitions, missing state.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `check_status`/continuation referenced a task with no live state.
    #[error("no task state for {0}")]
    TaskNotFound(TaskId),

    /// A terminal outcome was recorded more than once for the same task.
    #[error("task {0} already reached a terminal outcome")]
    AlreadyTerminal(TaskId),

    /// An event was received that is not valid from the task's current state.
    #[error("invalid transition for task {task_id}: {from:?} -> {attempted:?}")]
    InvalidTransition {
        /// Task whose state machine rejected the transition.
        task_id: TaskId,
        /// Current state at the time of the attempted transition.
        from: crate::messages::Event,
        /// Event that was rejected.
        attempted: crate::messages::Event,
    },
}

/// Errors from the task clustering & router (C7).
#[derive(Debug, Error)]
pub enum RouterError {
    /// No candidate agents were supplied to route among.
    #[error("no candidate agents supplied for routing")]
    NoCandidates,

    /// The embedding provider failed to embed the task content.
    #[error("embedding provider failed: {0}")]
    EmbeddingFailed(String),
}

/// Top-level error aggregate composed at the binary boundary (§7).
#[derive(Debug, Error)]
pub enum FabricError {
    /// Bus-layer failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Protocol/codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Agent runtime failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Orchestrator logic failure.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Router failure.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Configuration failed validation at startup (fatal, §7).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage/persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl FabricError {
    /// Process exit code for this error, per the categories in §6.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            FabricError::Configuration(_) => 2,
            FabricError::Bus(_) => 3,
            _ => 4,
        }
    }
}
