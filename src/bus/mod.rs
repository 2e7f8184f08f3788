//! Bus Adapter (C2): a thin abstraction over pub/sub plus a key-value store with TTL.
//!
//! The trait is the seam the rest of the fabric is written against; [`redis::RedisBus`] backs
//! production deployments and [`memory::MemoryBus`] backs unit/integration tests, mirroring the
//! teacher's `DeliveryEngine` trait-plus-`DashMap`-impl split in `message_router`.

pub mod memory;
pub mod redis;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::BusError;

/// A payload stream yielded by [`Bus::subscribe`].
pub type PayloadStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Publish/subscribe plus key-value-with-TTL operations the rest of the fabric depends on (§4.2).
///
/// Implementations serialize writes internally; callers never need to coordinate access to a
/// shared connection (§5, "the bus connection is shared by all tasks of an agent").
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes `payload` to `channel`, fire-and-forget, at-most-once to current subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] if the adapter is mid-reconnect and fails fast rather
    /// than buffering, and [`BusError::Connection`] for other broker-level publish failures.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribes to `channel`, returning a stream of payloads in broker-arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connection`] if the subscription could not be installed.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError>;

    /// Atomically sets `key` to `value` with the given `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::KeyValue`] on broker-level failure.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;

    /// Reads the current value of `key`, or `None` if absent/expired.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::KeyValue`] on broker-level failure.
    async fn get(&self, key: &str) -> Result<Option<String>, BusError>;

    /// Lists all keys matching `prefix*`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::KeyValue`] on broker-level failure.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, BusError>;

    /// Closes the adapter. Subsequent calls return [`BusError::Closed`].
    async fn close(&self);
}
