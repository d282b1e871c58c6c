//! Orchestrator-facing memory facade.
//!
//! [`MemoryService`] ties a [`MemoryStore`], an [`EmbeddingProvider`] and the
//! [`InactivityReaper`] together. Reads degrade to empty results so a broken
//! backend never blocks a reply.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;

use super::reaper::{InactivityReaper, ReaperHandle, ReaperSettings};
use super::types::MemoryContext;
use super::{open_store, MemoryStore, Result};
use crate::config::MemoryConfig;
use crate::embedding::EmbeddingProvider;

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reaper: Arc<InactivityReaper>,
    reaper_task: Mutex<Option<ReaperHandle>>,
    recall_limit: usize,
}

impl MemoryService {
    /// Assemble a service around an existing store. The reaper is not
    /// started; see [`MemoryService::start_reaper`].
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        reaper: ReaperSettings,
        recall_limit: usize,
    ) -> Self {
        let reaper = Arc::new(InactivityReaper::new(Arc::clone(&store), reaper));
        Self {
            store,
            embedder,
            reaper,
            reaper_task: Mutex::new(None),
            recall_limit,
        }
    }

    /// Open the configured store and start the reaper if enabled.
    pub async fn start(
        config: &MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let store = open_store(config)
            .await
            .context("failed to open memory store")?;
        let service = Self::new(
            store,
            embedder,
            ReaperSettings::from(&config.reaper),
            config.recall.limit,
        );
        if config.reaper.enabled {
            service.start_reaper().await;
        }
        tracing::info!(
            backend = ?config.storage.backend,
            recall_limit = config.recall.limit,
            reaper = config.reaper.enabled,
            "memory service started"
        );
        Ok(service)
    }

    /// Start the periodic sweep. Calling it twice is a no-op.
    pub async fn start_reaper(&self) {
        let mut task = self.reaper_task.lock().await;
        if task.is_none() {
            *task = Some(self.reaper.spawn());
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn reaper(&self) -> &Arc<InactivityReaper> {
        &self.reaper
    }

    /// Rolling context plus the long-term memories most related to `message`.
    pub async fn context_for(&self, owner: &str, message: &str) -> MemoryContext {
        self.reaper.touch(owner);

        let recent = match self.store.get_recent_messages(owner).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "failed to load rolling context");
                Vec::new()
            }
        };

        let recalled = match self.embedder.embed(message).await {
            Ok(query) => match self.store.search(owner, &query, self.recall_limit).await {
                Ok(texts) => texts,
                Err(e) => {
                    tracing::warn!(owner = %owner, error = %e, "memory search failed");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "failed to embed message, skipping recall");
                Vec::new()
            }
        };

        MemoryContext { recent, recalled }
    }

    /// Append one user line and one reply line to the rolling context.
    pub async fn record_exchange(&self, owner: &str, user_line: &str, reply_line: &str) -> Result<()> {
        self.reaper.touch(owner);
        self.store.add_recent_message(owner, user_line).await?;
        self.store.add_recent_message(owner, reply_line).await
    }

    /// Store a long-term fact. Returns `false` if it was already known.
    pub async fn remember(&self, owner: &str, fact: &str) -> anyhow::Result<bool> {
        let vector = self
            .embedder
            .embed(fact)
            .await
            .context("failed to embed memory")?;
        match self.store.add(owner, fact, &vector).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate() => {
                tracing::debug!(owner = %owner, "memory already stored");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget everything about `owner`.
    pub async fn reset(&self, owner: &str) -> Result<()> {
        self.store.clear_recent_messages(owner).await?;
        self.store.delete_user_data(owner).await?;
        self.reaper.forget(owner);
        Ok(())
    }

    /// Stop the reaper and release the store. Writes already spawned by
    /// callers are not awaited.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper_task.lock().await.take() {
            handle.stop().await;
        }
        self.store.shutdown();
        tracing::info!("memory service stopped");
    }
}
