//! Network-backed memory store over a [`Connection`].
//!
//! Long-term records and rolling context live in two tables scoped by
//! `user_id`. Similarity is computed server-side; the shared top-k selection
//! then applies the minimum-similarity gate and `k` truncation.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::owner_lock::OwnerLocks;
use super::similarity::{is_finite_vector, select_top, ScoredText};
use super::types::{OwnedMemoryRecord, RecentMessageRecord};
use super::{MemoryError, MemoryStore, Result};
use crate::config::RemoteConfig;
use crate::db::protocol::{rows, statement_results};
use crate::db::schema::{schema_sql, MEMORIES_TABLE, MEMORIES_UNIQUE_INDEX, RECENT_TABLE};
use crate::db::Connection;

const SEARCH_SQL: &str = "SELECT text, timestamp, vector::similarity::cosine(vector, $query) AS similarity \
     FROM memories WHERE user_id = $user_id \
     ORDER BY similarity DESC, timestamp ASC LIMIT $limit;";

const TRIM_RECENT_SQL: &str = "DELETE recent_messages WHERE user_id = $user_id AND id NOT IN \
     (SELECT id, timestamp FROM recent_messages WHERE user_id = $user_id ORDER BY timestamp DESC LIMIT $keep).id;";

const RECENT_SQL: &str = "SELECT text, timestamp FROM recent_messages \
     WHERE user_id = $user_id ORDER BY timestamp ASC;";

const CLEAR_RECENT_SQL: &str = "DELETE recent_messages WHERE user_id = $user_id;";

const DELETE_OWNER_SQL: &str = "DELETE memories WHERE user_id = $user_id; \
     DELETE recent_messages WHERE user_id = $user_id;";

/// Tuning for [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Embedding dimension enforced by the schema.
    pub dimension: usize,
    /// Rolling-context rows kept per owner after each insert.
    pub recent_cap: usize,
    /// Matches scoring below this are never returned.
    pub min_similarity: Option<f64>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            dimension: 768,
            recent_cap: 15,
            min_similarity: Some(0.6),
        }
    }
}

impl From<&RemoteConfig> for RemoteSettings {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            dimension: config.dimension,
            recent_cap: config.recent_cap,
            min_similarity: config.min_similarity,
        }
    }
}

pub struct RemoteStore {
    conn: Connection,
    settings: RemoteSettings,
    locks: OwnerLocks,
    clock: AtomicI64,
}

impl RemoteStore {
    /// Wrap a connected [`Connection`] and make sure the schema exists.
    ///
    /// Schema failures are logged, not returned: the tables may already exist
    /// or the server may become reachable later.
    pub async fn open(conn: Connection, settings: RemoteSettings) -> Self {
        let store = Self {
            conn,
            settings,
            locks: OwnerLocks::new(),
            clock: AtomicI64::new(0),
        };
        match store.init_schema().await {
            Ok(()) => tracing::info!(dimension = store.settings.dimension, "remote schema ready"),
            Err(e) => tracing::warn!(error = %e, "failed to initialize remote schema"),
        }
        store
    }

    pub async fn init_schema(&self) -> Result<()> {
        let sql = schema_sql(self.settings.dimension);
        self.statements(&sql, json!({})).await.map(|_| ())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn statements(&self, sql: &str, vars: Value) -> Result<Vec<Value>> {
        statement_results(self.conn.query(sql, vars).await?)
    }

    /// Milliseconds since the epoch, strictly increasing across calls so that
    /// ordering by timestamp matches insertion order.
    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

#[async_trait]
impl MemoryStore for RemoteStore {
    async fn add(&self, owner: &str, text: &str, vector: &[f32]) -> Result<()> {
        if !is_finite_vector(vector) {
            return Err(MemoryError::InvalidVector("non-finite component".into()));
        }
        let record = OwnedMemoryRecord {
            user_id: owner.to_string(),
            text: text.to_string(),
            vector: vector.to_vec(),
            timestamp: self.next_timestamp(),
        };
        match self
            .conn
            .create(MEMORIES_TABLE, serde_json::to_value(&record)?)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MemoryError::Duplicate),
            Err(e) => Err(e),
        }
    }

    async fn search(&self, owner: &str, query: &[f32], k: usize) -> Result<Vec<String>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.settings.dimension {
            tracing::warn!(
                owner = %owner,
                got = query.len(),
                expected = self.settings.dimension,
                "query vector dimension mismatch, no matches"
            );
            return Ok(Vec::new());
        }

        let vars = json!({ "user_id": owner, "query": query, "limit": k });
        let statements = self.statements(SEARCH_SQL, vars).await?;
        let candidates: Vec<ScoredText> = statements
            .into_iter()
            .next()
            .map(rows)
            .unwrap_or_default()
            .iter()
            .filter_map(scored_row)
            .collect();

        let returned = candidates.len();
        let top = select_top(candidates, k, self.settings.min_similarity);
        tracing::debug!(owner = %owner, returned, kept = top.len(), "remote search");
        Ok(top.into_iter().map(|m| m.text).collect())
    }

    async fn add_recent_message(&self, owner: &str, text: &str) -> Result<()> {
        let _guard = self.locks.lock(owner).await;

        let record = RecentMessageRecord {
            user_id: owner.to_string(),
            text: text.to_string(),
            timestamp: self.next_timestamp(),
        };
        self.conn
            .create(RECENT_TABLE, serde_json::to_value(&record)?)
            .await?;

        let vars = json!({ "user_id": owner, "keep": self.settings.recent_cap });
        self.statements(TRIM_RECENT_SQL, vars).await?;
        Ok(())
    }

    async fn get_recent_messages(&self, owner: &str) -> Result<Vec<String>> {
        let statements = self.statements(RECENT_SQL, json!({ "user_id": owner })).await?;
        let mut lines: Vec<String> = statements
            .into_iter()
            .next()
            .map(rows)
            .unwrap_or_default()
            .iter()
            .filter_map(|row| row.get("text").and_then(Value::as_str).map(str::to_string))
            .collect();
        if lines.len() > self.settings.recent_cap {
            lines.drain(..lines.len() - self.settings.recent_cap);
        }
        Ok(lines)
    }

    async fn clear_recent_messages(&self, owner: &str) -> Result<()> {
        let _guard = self.locks.lock(owner).await;
        self.statements(CLEAR_RECENT_SQL, json!({ "user_id": owner }))
            .await
            .map(|_| ())
    }

    async fn clear_recent_messages_if(
        &self,
        owner: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<bool> {
        let _guard = self.locks.lock(owner).await;
        if !still_idle() {
            return Ok(false);
        }
        self.statements(CLEAR_RECENT_SQL, json!({ "user_id": owner }))
            .await?;
        Ok(true)
    }

    async fn delete_user_data(&self, owner: &str) -> Result<()> {
        // Two statements in one request; not atomic across tables.
        self.statements(DELETE_OWNER_SQL, json!({ "user_id": owner }))
            .await?;
        self.locks.release(owner);
        tracing::info!(owner = %owner, "owner data deleted");
        Ok(())
    }

    fn shutdown(&self) {
        self.conn.close();
    }
}

/// A search row with its text and score. Rows carrying a distance instead of
/// a similarity are converted; rows with neither are skipped.
fn scored_row(row: &Value) -> Option<ScoredText> {
    let text = row.get("text").and_then(Value::as_str)?;
    let score = match (
        row.get("similarity").and_then(Value::as_f64),
        row.get("distance").and_then(Value::as_f64),
    ) {
        (Some(similarity), _) => similarity,
        (None, Some(distance)) => 1.0 - distance,
        (None, None) => {
            tracing::debug!(text, "search row without a score skipped");
            return None;
        }
    };
    Some(ScoredText {
        text: text.to_string(),
        score,
    })
}

fn is_unique_violation(err: &MemoryError) -> bool {
    match err {
        MemoryError::Protocol { message, .. } => {
            message.contains("already contains") || message.contains(MEMORIES_UNIQUE_INDEX)
        }
        _ => false,
    }
}
