//! Redis-backed [`Bus`] implementation: pub/sub plus `SET ... PX` / `SCAN` (§4.2).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::{Bus, PayloadStream};
use crate::error::BusError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A [`Bus`] backed by a live Redis broker.
///
/// Regular commands (`SET`/`GET`/`SCAN`) go through a `ConnectionManager`, which reconnects
/// transparently; pub/sub uses its own dedicated connection per subscription, reinstalled with
/// exponential backoff and jitter on disconnect, matching §4.2's reconnection contract.
pub struct RedisBus {
    client: redis::Client,
    commands: Mutex<ConnectionManager>,
}

impl RedisBus {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connection`] if the initial connection cannot be established.
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let commands = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            commands: Mutex::new(commands),
        })
    }

    fn backoff_with_jitter(attempt: u32) -> Duration {
        let base = INITIAL_BACKOFF.saturating_mul(1 << attempt.min(5)).min(MAX_BACKOFF);
        let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
        let millis = base.as_millis() as f64 * (1.0 + jitter_frac);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

#[async_trait]
impl Bus for RedisBus {
    #[instrument(skip(self, payload), fields(channel, bytes = payload.len()))]
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut commands = self.commands.lock().await;
        commands
            .publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))
    }

    #[instrument(skip(self), fields(channel))]
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BusError> {
        let mut attempt = 0;
        loop {
            match self.client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(e) = pubsub.subscribe(channel).await {
                        warn!(error = %e, "subscribe failed, retrying with backoff");
                        tokio::time::sleep(Self::backoff_with_jitter(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let stream = pubsub
                        .into_on_message()
                        .map(|msg| msg.get_payload_bytes().to_vec());
                    return Ok(Box::pin(stream));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "pubsub connection failed, retrying");
                    tokio::time::sleep(Self::backoff_with_jitter(attempt)).await;
                    attempt += 1;
                    if attempt > 5 {
                        return Err(BusError::Disconnected {
                            channel: channel.to_string(),
                        });
                    }
                }
            }
        }
    }

    #[instrument(skip(self, value), fields(key))]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut commands = self.commands.lock().await;
        let seconds = ttl.as_secs().max(1);
        commands
            .set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| BusError::KeyValue {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self), fields(key))]
    async fn get(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut commands = self.commands.lock().await;
        commands.get(key).await.map_err(|e| BusError::KeyValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, BusError> {
        let mut commands = self.commands.lock().await;
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = commands
            .scan_match(pattern)
            .await
            .map_err(|e| BusError::KeyValue {
                key: prefix.to_string(),
                reason: e.to_string(),
            })?
            .collect()
            .await;
        Ok(keys)
    }

    async fn close(&self) {
        info!("redis bus closing");
    }
}
