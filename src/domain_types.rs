//! Domain types for the switchboard orchestration fabric
//!
//! This module defines strongly-typed domain values to prevent primitive obsession
//! and to make illegal configuration (negative intervals, confidences outside
//! `[0,1]`, empty agent names) unrepresentable at compile time.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for a task, shared by every message in its lifecycle.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Name of an agent (sender identity, channel name root, heartbeat key root).
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AgentName(String);

impl AgentName {
    /// Channel name this agent subscribes to for inbound messages.
    #[must_use]
    pub fn channel(&self) -> String {
        format!("{self}_channel")
    }

    /// Liveness key this agent refreshes every heartbeat interval.
    #[must_use]
    pub fn heartbeat_key(&self) -> String {
        format!("{self}_heartbeat")
    }
}

/// Client identifier assigned by the `WebSocket` gateway on connect.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct ClientId(Uuid);

impl ClientId {
    /// Creates a new random client ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Sender's confidence in the current content, bounded to `[0, 1]`.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TryFrom, Into)
)]
pub struct Confidence(f64);

impl Confidence {
    /// Gets the value as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Heartbeat emission interval, in seconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct HeartbeatIntervalSecs(u64);

impl Default for HeartbeatIntervalSecs {
    fn default() -> Self {
        Self::try_new(5).expect("default heartbeat interval is in range")
    }
}

impl HeartbeatIntervalSecs {
    /// Liveness TTL is always three times the heartbeat interval (§4.3).
    #[must_use]
    pub fn ttl_secs(&self) -> u64 {
        self.into_inner() * 3
    }

    /// The monitor polls at half the heartbeat interval (§4.3).
    #[must_use]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner() * 500)
    }
}

/// Maximum number of debate rounds before the orchestrator forces a conclusion.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct MaxRounds(u32);

impl Default for MaxRounds {
    fn default() -> Self {
        Self::try_new(10).expect("default max rounds is in range")
    }
}

impl MaxRounds {
    /// The kill-switch trips at twice the normal round budget (§4.8).
    #[must_use]
    pub fn kill_switch_rounds(&self) -> u32 {
        self.into_inner() * 2
    }
}

/// Wall-clock budget for a single task before the kill-switch fires.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 120
)]
pub struct TaskTimeoutSecs(u64);

impl Default for TaskTimeoutSecs {
    fn default() -> Self {
        Self::try_new(120).expect("default task timeout is in range")
    }
}

impl TaskTimeoutSecs {
    /// Gets the value as a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Maximum spread between the last K confidences still considered a plateau.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TryFrom, Into),
    default = 0.05
)]
pub struct PlateauDelta(f64);

impl Default for PlateauDelta {
    fn default() -> Self {
        Self::try_new(0.05).expect("default plateau delta is in range")
    }
}

impl PlateauDelta {
    /// Gets the value as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Confidence threshold above which a refined response is accepted as consensus.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TryFrom, Into),
    default = 0.85
)]
pub struct ConsensusThreshold(f64);

impl Default for ConsensusThreshold {
    fn default() -> Self {
        Self::try_new(0.85).expect("default consensus threshold is in range")
    }
}

impl ConsensusThreshold {
    /// Gets the value as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Exploration rate (ε) for the adaptive router, bounded to `[0, 1]`.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TryFrom, Into)
)]
pub struct ExplorationRate(f64);

impl ExplorationRate {
    /// Gets the value as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Bounded capacity for a dispatch or send queue.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1000
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of dispatch workers in an agent's bounded pool (§5).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 4
)]
pub struct DispatchWorkerCount(usize);

impl Default for DispatchWorkerCount {
    fn default() -> Self {
        Self::try_new(4).expect("default dispatch worker count is in range")
    }
}

impl DispatchWorkerCount {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Size of the duplicate-suppression LRU set an agent keeps per §4.4.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 1024
)]
pub struct DedupCacheSize(usize);

impl Default for DedupCacheSize {
    fn default() -> Self {
        Self::try_new(1024).expect("default dedup cache size is in range")
    }
}

impl DedupCacheSize {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Size of the per-task conversational history ring buffer (§4.4), default 32.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 32
)]
pub struct HistoryBufferSize(usize);

impl Default for HistoryBufferSize {
    fn default() -> Self {
        Self::try_new(32).expect("default history buffer size is in range")
    }
}

impl HistoryBufferSize {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_derives_channel_and_heartbeat_key() {
        let name = AgentName::try_new("moderator".to_string()).unwrap();
        assert_eq!(name.channel(), "moderator_channel");
        assert_eq!(name.heartbeat_key(), "moderator_heartbeat");
    }

    #[test]
    fn agent_name_rejects_empty() {
        assert!(AgentName::try_new(String::new()).is_err());
    }

    #[test]
    fn confidence_rejects_out_of_range() {
        assert!(Confidence::try_new(1.5).is_err());
        assert!(Confidence::try_new(-0.1).is_err());
        assert!(Confidence::try_new(0.5).is_ok());
    }

    #[test]
    fn heartbeat_interval_derives_ttl_and_poll() {
        let interval = HeartbeatIntervalSecs::try_new(5).unwrap();
        assert_eq!(interval.ttl_secs(), 15);
        assert_eq!(interval.poll_interval(), std::time::Duration::from_millis(2500));
    }

    #[test]
    fn max_rounds_derives_kill_switch_budget() {
        let max_rounds = MaxRounds::try_new(10).unwrap();
        assert_eq!(max_rounds.kill_switch_rounds(), 20);
    }
}
