//! Heartbeat Monitor (C3): per-agent liveness via TTL'd keys and a readiness broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::bus::Bus;
use crate::domain_types::{AgentName, HeartbeatIntervalSecs};

/// Payload published to `system_status` whenever readiness changes or on the periodic tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusUpdate {
    /// Always `"system_status_update"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The status payload.
    pub payload: SystemStatusPayload,
}

/// Body of a [`SystemStatusUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusPayload {
    /// Per-agent online/offline status.
    pub agent_status: HashMap<String, String>,
    /// True iff every expected agent is online.
    pub system_ready: bool,
    /// When this status was computed.
    pub timestamp: chrono::DateTime<Utc>,
}

/// The channel the monitor publishes readiness to.
pub const SYSTEM_STATUS_CHANNEL: &str = "system_status";

/// Maintains a readiness view over a fixed set of expected agents (§4.3).
///
/// No wall-clock comparisons are made: liveness is entirely TTL-based, read through
/// [`Bus::get`], which already returns `None` for an expired key.
pub struct HeartbeatMonitor {
    bus: Arc<dyn Bus>,
    expected_agents: Vec<AgentName>,
    interval: HeartbeatIntervalSecs,
}

impl HeartbeatMonitor {
    /// Creates a monitor for `expected_agents`, polling at `interval / 2` (§4.3).
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, expected_agents: Vec<AgentName>, interval: HeartbeatIntervalSecs) -> Self {
        Self {
            bus,
            expected_agents,
            interval,
        }
    }

    /// Reads every expected agent's liveness key once and reports readiness.
    #[instrument(skip(self))]
    pub async fn current_status(&self) -> SystemStatusPayload {
        let mut agent_status = HashMap::with_capacity(self.expected_agents.len());
        let mut system_ready = true;
        for agent in &self.expected_agents {
            let online = self
                .bus
                .get(&agent.heartbeat_key())
                .await
                .unwrap_or(None)
                .is_some();
            if !online {
                system_ready = false;
            }
            agent_status.insert(
                agent.to_string(),
                if online { "online" } else { "offline" }.to_string(),
            );
        }
        SystemStatusPayload {
            agent_status,
            system_ready,
            timestamp: Utc::now(),
        }
    }

    /// Runs the periodic readiness loop until the process shuts down, publishing on every tick
    /// and, redundantly but per §4.3's edge-triggered requirement, immediately whenever the
    /// per-agent status map changes between ticks.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval.poll_interval());
        let mut last_status: Option<HashMap<String, String>> = None;
        loop {
            ticker.tick().await;
            let status = self.current_status().await;
            let changed = last_status.as_ref() != Some(&status.agent_status);
            if changed || last_status.is_none() {
                info!(system_ready = status.system_ready, "publishing system status");
            }
            let update = SystemStatusUpdate {
                kind: "system_status_update",
                payload: status.clone(),
            };
            if let Ok(bytes) = serde_json::to_vec(&update) {
                if let Err(e) = self.bus.publish(SYSTEM_STATUS_CHANNEL, bytes).await {
                    warn!(error = %e, "failed to publish system status");
                }
            }
            last_status = Some(status.agent_status);
        }
    }
}

/// Emits `set_with_ttl(heartbeat_key, "alive", 3 × interval)` every `interval` until cancelled.
///
/// Runs as a background task per the agent lifecycle's "begin heartbeat loop" step (§4.4).
#[instrument(skip(bus, cancel))]
pub async fn emit_loop(
    bus: Arc<dyn Bus>,
    agent: AgentName,
    interval: HeartbeatIntervalSecs,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval.into_inner()));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = bus
                    .set_with_ttl(&agent.heartbeat_key(), "alive", std::time::Duration::from_secs(interval.ttl_secs()))
                    .await
                {
                    warn!(error = %e, agent = %agent, "heartbeat emission failed");
                }
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!(agent = %agent, "heartbeat loop cancelled");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;

    #[tokio::test]
    async fn all_agents_offline_yields_not_ready() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let monitor = HeartbeatMonitor::new(
            bus,
            vec![AgentName::try_new("worker_a".to_string()).unwrap()],
            HeartbeatIntervalSecs::default(),
        );
        let status = monitor.current_status().await;
        assert!(!status.system_ready);
        assert_eq!(status.agent_status.get("worker_a").unwrap(), "offline");
    }

    #[tokio::test]
    async fn recent_heartbeat_reports_online_and_ready() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let agent = AgentName::try_new("worker_a".to_string()).unwrap();
        let interval = HeartbeatIntervalSecs::default();
        bus.set_with_ttl(
            &agent.heartbeat_key(),
            "alive",
            std::time::Duration::from_secs(interval.ttl_secs()),
        )
        .await
        .unwrap();
        let monitor = HeartbeatMonitor::new(bus, vec![agent], interval);
        let status = monitor.current_status().await;
        assert!(status.system_ready);
    }
}
