//! Per-client session state (§4.5): `client_id`, bounded `send_queue`, subscriptions, liveness.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use crate::domain_types::{ChannelCapacity, ClientId};

/// An outbound frame queued for delivery to a client.
pub type OutboundFrame = String;

/// Owns one client's bounded outbound queue, subscriptions, and liveness bookkeeping (§4.5).
pub struct Session {
    client_id: ClientId,
    sender: mpsc::Sender<OutboundFrame>,
    subscriptions: HashSet<String>,
    last_activity: Instant,
    unanswered_pings: u8,
    dropped_events: u64,
}

impl Session {
    /// Creates a session and its paired receiver half for the write-loop to drain.
    #[must_use]
    pub fn new(client_id: ClientId, capacity: ChannelCapacity) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.as_usize());
        (
            Self {
                client_id,
                sender,
                subscriptions: HashSet::new(),
                last_activity: Instant::now(),
                unanswered_pings: 0,
                dropped_events: 0,
            },
            receiver,
        )
    }

    /// This session's assigned client id.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Adds `channel` to this session's subscription set.
    pub fn subscribe(&mut self, channel: String) {
        self.subscriptions.insert(channel);
    }

    /// Removes `channel` from this session's subscription set.
    pub fn unsubscribe(&mut self, channel: &str) {
        self.subscriptions.remove(channel);
    }

    /// Whether this session is subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    /// Marks activity now, resetting the unanswered-ping counter.
    pub fn note_activity(&mut self) {
        self.last_activity = Instant::now();
        self.unanswered_pings = 0;
    }

    /// Records that a heartbeat ping went unanswered; returns whether two have now accumulated
    /// (§4.5, "closed if two consecutive pings are unanswered").
    pub fn note_unanswered_ping(&mut self) -> bool {
        self.unanswered_pings += 1;
        self.unanswered_pings >= 2
    }

    /// Count of events dropped for backpressure.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Best-effort enqueue of an outbound frame; drops it and counts it if the queue is full
    /// rather than blocking the fan-out loop (§4.5, "backpressure").
    pub fn try_send(&mut self, frame: OutboundFrame) {
        if let Err(e) = self.sender.try_send(frame) {
            self.dropped_events += 1;
            warn!(client_id = %self.client_id, dropped_events = self.dropped_events, "send_queue full, dropping event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_and_counts() {
        let (mut session, _receiver) = Session::new(ClientId::generate(), ChannelCapacity::try_new(1).unwrap());
        session.try_send("first".to_string());
        session.try_send("second".to_string());
        assert_eq!(session.dropped_events(), 1);
    }

    #[test]
    fn two_unanswered_pings_signal_closure() {
        let (mut session, _receiver) = Session::new(ClientId::generate(), ChannelCapacity::default());
        assert!(!session.note_unanswered_ping());
        assert!(session.note_unanswered_ping());
    }

    #[test]
    fn activity_resets_unanswered_pings() {
        let (mut session, _receiver) = Session::new(ClientId::generate(), ChannelCapacity::default());
        session.note_unanswered_ping();
        session.note_activity();
        assert!(!session.note_unanswered_ping());
    }
}
