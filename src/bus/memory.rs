//! In-memory [`Bus`] implementation backing unit and integration tests without a live broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::{Bus, PayloadStream};
use crate::error::BusError;

const CHANNEL_CAPACITY: usize = 1024;

/// A process-local [`Bus`] backed by `tokio::sync::broadcast` channels and a `DashMap` for
/// key-value storage, in the style of the teacher's `DeliveryEngineImpl` (`DashMap`-keyed
/// queues standing in for a broker).
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    store: DashMap<String, (String, Instant)>,
    closed: AtomicBool,
}

impl MemoryBus {
    /// Creates an empty, open bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            store: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        // No subscribers is not an error: at-most-once delivery to whoever is listening (§4.2).
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let receiver = self.sender_for(channel).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(Result::ok);
        Ok(Box::pin(stream))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.store
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(self.store.get(key).and_then(|entry| {
            let (value, expires_at) = entry.value().clone();
            (Instant::now() < expires_at).then_some(value)
        }))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let now = Instant::now();
        Ok(self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().1 > now)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_round_trips() {
        let bus = MemoryBus::new();
        let mut stream = bus.subscribe("agent_a_channel").await.unwrap();
        bus.publish("agent_a_channel", b"hello".to_vec())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn set_with_ttl_expires() {
        let bus = MemoryBus::new();
        bus.set_with_ttl("agent_heartbeat", "alive", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(
            bus.get("agent_heartbeat").await.unwrap(),
            Some("alive".to_string())
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bus.get("agent_heartbeat").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_returns_matching_live_keys() {
        let bus = MemoryBus::new();
        bus.set_with_ttl("worker_a_heartbeat", "alive", Duration::from_secs(10))
            .await
            .unwrap();
        bus.set_with_ttl("worker_b_heartbeat", "alive", Duration::from_secs(10))
            .await
            .unwrap();
        bus.set_with_ttl("unrelated_key", "x", Duration::from_secs(10))
            .await
            .unwrap();
        let mut keys = bus.scan("worker_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["worker_a_heartbeat", "worker_b_heartbeat"]);
    }

    #[tokio::test]
    async fn closed_bus_rejects_operations() {
        let bus = MemoryBus::new();
        bus.close().await;
        assert!(matches!(
            bus.publish("x", vec![]).await,
            Err(BusError::Closed)
        ));
    }
}
