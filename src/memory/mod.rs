//! The memory contract and its two backends.
//!
//! [`MemoryStore`] is what the orchestrator calls. [`local::LocalStore`] keeps
//! per-owner JSON documents on disk; [`remote::RemoteStore`] talks to a vector
//! database over a persistent [`crate::db::Connection`]. Both rank with the
//! shared [`similarity`] routine and serialize same-owner writes through
//! [`owner_lock::OwnerLocks`].

pub mod local;
pub mod owner_lock;
pub mod reaper;
pub mod remote;
pub mod service;
pub mod similarity;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

pub use crate::error::{MemoryError, Result};

use crate::config::{Backend, MemoryConfig};

/// Long-term semantic memory plus a bounded rolling context, partitioned by
/// owner id. Implementations are safe to call concurrently.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a long-term record. May fail with [`MemoryError::Duplicate`].
    async fn add(&self, owner: &str, text: &str, vector: &[f32]) -> Result<()>;

    /// Up to `k` texts for `owner`, most similar first, ties in insertion
    /// order. An empty `query` (no embedding available) matches nothing.
    async fn search(&self, owner: &str, query: &[f32], k: usize) -> Result<Vec<String>>;

    /// Append one line of rolling context, discarding the oldest beyond the cap.
    async fn add_recent_message(&self, owner: &str, text: &str) -> Result<()>;

    /// Rolling context, oldest first.
    async fn get_recent_messages(&self, owner: &str) -> Result<Vec<String>>;

    /// Drop rolling context only. Clearing nothing is not an error.
    async fn clear_recent_messages(&self, owner: &str) -> Result<()>;

    /// Drop rolling context only if `still_idle` holds once no other write
    /// for `owner` is in flight. Returns whether the clear ran.
    ///
    /// Stores with per-owner write serialization check and clear under the
    /// owner's lock, so a line appended after the check is never lost. The
    /// default checks first and clears without that guarantee.
    async fn clear_recent_messages_if(
        &self,
        owner: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<bool> {
        if !still_idle() {
            return Ok(false);
        }
        self.clear_recent_messages(owner).await?;
        Ok(true)
    }

    /// Drop both long-term records and rolling context for `owner`.
    async fn delete_user_data(&self, owner: &str) -> Result<()>;

    /// Release background resources. Called once at subsystem shutdown.
    fn shutdown(&self) {}
}

/// Build the store selected by `config.storage.backend`.
pub async fn open_store(config: &MemoryConfig) -> anyhow::Result<Arc<dyn MemoryStore>> {
    match config.storage.backend {
        Backend::Local => {
            let dir = config.resolved_local_dir();
            let store = local::LocalStore::open(&dir, (&config.local).into())
                .await
                .with_context(|| format!("failed to open local store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        Backend::Remote => {
            let conn_config = config.remote.connection_config()?;
            let url = conn_config.url.clone();
            let conn = crate::db::Connection::connect(conn_config)
                .await
                .with_context(|| format!("failed to connect to remote store at {url}"))?;
            let store = remote::RemoteStore::open(conn, (&config.remote).into()).await;
            Ok(Arc::new(store))
        }
    }
}
