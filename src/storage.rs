//! Outcome history persistence (ambient, §10): an append-only, bounded ring of
//! [`OutcomeRecord`]s backing auto-tuning (C6) and router rebuilds (C7), plus a log of router
//! decisions for `api_get_router_decisions` (C9).
//!
//! Follows the teacher's functional-core/imperative-shell split in `storage.rs`: pure SQL
//! generation and row mapping live in private `sql`/`mapping` modules; the only I/O is in
//! [`OutcomeStore`]'s methods.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::messages::ReasoningEffort;
use crate::router::RoutingDecision;

/// An append-only outcome record, the input to both auto-tuning and cluster rebuilds (§3).
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    /// Task this outcome concludes.
    pub task_id: String,
    /// Effort the estimator predicted at task creation.
    pub predicted_effort: ReasoningEffort,
    /// The single category that contributed the most to the estimate, if any.
    pub dominant_category: Option<String>,
    /// Wall-clock time from task creation to terminal outcome.
    pub actual_duration: Duration,
    /// Whether the outcome was `completed` or `merged` (vs. `escalated`).
    pub success: bool,
    /// Cluster the task was assigned to at routing time.
    pub cluster_id: usize,
    /// Agent that produced the terminal result.
    pub agent: String,
    /// Feature vector used for routing (embedding plus scaled diagnostics).
    pub features: Vec<f32>,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

mod sql {
    pub(super) fn create_outcomes_table() -> &'static str {
        "CREATE TABLE IF NOT EXISTS outcomes (
            task_id TEXT PRIMARY KEY,
            predicted_effort TEXT NOT NULL,
            dominant_category TEXT,
            actual_duration_ms INTEGER NOT NULL,
            success INTEGER NOT NULL,
            cluster_id INTEGER NOT NULL,
            agent TEXT NOT NULL,
            features TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        )"
    }

    pub(super) fn insert_outcome() -> &'static str {
        "INSERT OR REPLACE INTO outcomes
            (task_id, predicted_effort, dominant_category, actual_duration_ms, success,
             cluster_id, agent, features, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    }

    pub(super) fn select_recent_outcomes() -> &'static str {
        "SELECT task_id, predicted_effort, dominant_category, actual_duration_ms, success,
                cluster_id, agent, features, recorded_at
         FROM outcomes ORDER BY recorded_at DESC LIMIT ?"
    }
}

mod mapping {
    use super::OutcomeRecord;
    use crate::messages::ReasoningEffort;
    use std::time::Duration;

    pub(super) fn effort_to_str(effort: ReasoningEffort) -> &'static str {
        match effort {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    pub(super) fn effort_from_str(s: &str) -> ReasoningEffort {
        match s {
            "high" => ReasoningEffort::High,
            "medium" => ReasoningEffort::Medium,
            _ => ReasoningEffort::Low,
        }
    }

    pub(super) fn features_to_json(features: &[f32]) -> String {
        serde_json::to_string(features).unwrap_or_else(|_| "[]".to_string())
    }

    pub(super) fn features_from_json(json: &str) -> Vec<f32> {
        serde_json::from_str(json).unwrap_or_default()
    }

    pub(super) fn duration_to_millis(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }

    pub(super) fn duration_from_millis(millis: i64) -> Duration {
        Duration::from_millis(millis.max(0) as u64)
    }

    pub(super) fn timestamp_to_epoch_ms(timestamp: chrono::DateTime<chrono::Utc>) -> i64 {
        timestamp.timestamp_millis()
    }

    pub(super) fn timestamp_from_epoch_ms(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }

    pub(super) fn record_to_row(record: &OutcomeRecord) -> (String, &'static str, Option<String>, i64, bool, i64, String, String, i64) {
        (
            record.task_id.clone(),
            effort_to_str(record.predicted_effort),
            record.dominant_category.clone(),
            duration_to_millis(record.actual_duration),
            record.success,
            record.cluster_id as i64,
            record.agent.clone(),
            features_to_json(&record.features),
            timestamp_to_epoch_ms(record.timestamp),
        )
    }
}

/// Errors specific to the persistence layer, surfaced through [`sqlx::Error`] into
/// [`crate::error::FabricError::Storage`].
pub type StorageResult<T> = Result<T, sqlx::Error>;

enum Backing {
    Sqlite(SqlitePool),
    Memory(Mutex<Vec<OutcomeRecord>>),
}

/// Stores [`OutcomeRecord`]s and the router decision log.
///
/// Defaults to in-memory (no `storage_path`), matching the teacher's
/// `RouterConfig::development()` preset; a `storage_path` enables durable SQLite persistence.
pub struct OutcomeStore {
    backing: Backing,
    capacity: usize,
    decisions: Mutex<Vec<(String, RoutingDecision, DateTime<Utc>)>>,
}

impl OutcomeStore {
    /// Builds an in-memory store, bounded to `capacity` records.
    #[must_use]
    pub fn in_memory(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            backing: Backing::Memory(Mutex::new(Vec::new())),
            capacity,
            decisions: Mutex::new(Vec::new()),
        })
    }

    /// Opens (creating if absent) a SQLite-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the database cannot be opened or migrated.
    #[instrument(skip(path))]
    pub async fn sqlite(path: &str, capacity: usize) -> StorageResult<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&format!("sqlite://{path}?mode=rwc"))
            .await?;
        sqlx::query(sql::create_outcomes_table()).execute(&pool).await?;
        Ok(Arc::new(Self {
            backing: Backing::Sqlite(pool),
            capacity,
            decisions: Mutex::new(Vec::new()),
        }))
    }

    /// Appends `record`, evicting the oldest entry if the bounded capacity is exceeded.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] for SQLite-backed stores on write failure.
    #[instrument(skip(self, record), fields(task_id = %record.task_id))]
    pub async fn append(&self, record: OutcomeRecord) -> StorageResult<()> {
        match &self.backing {
            Backing::Memory(records) => {
                let mut records = records.lock().await;
                if records.len() >= self.capacity {
                    records.remove(0);
                }
                records.push(record);
            }
            Backing::Sqlite(pool) => {
                let row = mapping::record_to_row(&record);
                sqlx::query(sql::insert_outcome())
                    .bind(row.0)
                    .bind(row.1)
                    .bind(row.2)
                    .bind(row.3)
                    .bind(row.4)
                    .bind(row.5)
                    .bind(row.6)
                    .bind(row.7)
                    .bind(row.8)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Returns up to `limit` most recent outcome records, newest first.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] for SQLite-backed stores on read failure.
    pub async fn recent(&self, limit: usize) -> StorageResult<Vec<OutcomeRecord>> {
        match &self.backing {
            Backing::Memory(records) => {
                let records = records.lock().await;
                Ok(records.iter().rev().take(limit).cloned().collect())
            }
            Backing::Sqlite(pool) => {
                let rows = sqlx::query(sql::select_recent_outcomes())
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|row| OutcomeRecord {
                        task_id: row.get("task_id"),
                        predicted_effort: mapping::effort_from_str(row.get::<String, _>("predicted_effort").as_str()),
                        dominant_category: row.get("dominant_category"),
                        actual_duration: mapping::duration_from_millis(row.get("actual_duration_ms")),
                        success: row.get::<i64, _>("success") != 0,
                        cluster_id: row.get::<i64, _>("cluster_id") as usize,
                        agent: row.get("agent"),
                        features: mapping::features_from_json(row.get::<String, _>("features").as_str()),
                        timestamp: mapping::timestamp_from_epoch_ms(row.get("recorded_at")),
                    })
                    .collect())
            }
        }
    }

    /// Records a routing decision for later retrieval via `api_get_router_decisions`.
    pub async fn record_decision(&self, agent: String, decision: RoutingDecision) {
        let mut decisions = self.decisions.lock().await;
        if decisions.len() >= self.capacity {
            decisions.remove(0);
        }
        decisions.push((agent, decision, Utc::now()));
    }

    /// Returns up to `limit` most recent routing decisions, newest first.
    pub async fn recent_decisions(&self, limit: usize) -> Vec<(String, RoutingDecision, DateTime<Utc>)> {
        let decisions = self.decisions.lock().await;
        decisions.iter().rev().take(limit).cloned().collect()
    }
}
