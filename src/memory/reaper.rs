//! Idle-owner sweep for rolling context.
//!
//! [`InactivityReaper`] keeps a last-active table. Each sweep scans the whole
//! table, removes owners idle past the threshold and clears their rolling
//! context. Long-term memory is never touched. An owner whose clear fails
//! goes back into the table with its old timestamp and is retried on the next
//! sweep, unless the store refuses the owner id outright.
//!
//! The scan is linear in tracked owners, which is fine for small and medium
//! active populations and a known limit for large ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{MemoryError, MemoryStore};
use crate::config::ReaperConfig;

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Owners inactive longer than this lose their rolling context.
    pub idle_threshold: Duration,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(30 * 60),
        }
    }
}

impl From<&ReaperConfig> for ReaperSettings {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            idle_threshold: Duration::from_secs(config.idle_threshold_secs),
        }
    }
}

pub struct InactivityReaper {
    store: Arc<dyn MemoryStore>,
    settings: ReaperSettings,
    last_active: Mutex<HashMap<String, Instant>>,
}

impl InactivityReaper {
    pub fn new(store: Arc<dyn MemoryStore>, settings: ReaperSettings) -> Self {
        Self {
            store,
            settings,
            last_active: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record activity for `owner` now.
    pub fn touch(&self, owner: &str) {
        self.touch_at(owner, Instant::now());
    }

    pub fn touch_at(&self, owner: &str, at: Instant) {
        self.table().insert(owner.to_string(), at);
    }

    /// Stop tracking `owner` without clearing anything.
    pub fn forget(&self, owner: &str) {
        self.table().remove(owner);
    }

    pub fn tracked(&self) -> usize {
        self.table().len()
    }

    pub fn is_tracked(&self, owner: &str) -> bool {
        self.table().contains_key(owner)
    }

    /// Sweep as of now. Returns the owners whose context was cleared.
    pub async fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now()).await
    }

    /// Sweep as of `now`.
    ///
    /// Idle owners are taken out of the table under the lock; the clears run
    /// after it is released so no network call happens while holding it. Each
    /// clear re-checks, under the store's write lock for that owner, that the
    /// owner has not been touched again since it was taken out.
    pub async fn sweep_at(&self, now: Instant) -> Vec<String> {
        let threshold = self.settings.idle_threshold;
        let idle: Vec<(String, Instant)> = {
            let mut table = self.table();
            let idle: Vec<(String, Instant)> = table
                .iter()
                .filter(|(_, last)| now.saturating_duration_since(**last) > threshold)
                .map(|(owner, last)| (owner.clone(), *last))
                .collect();
            for (owner, _) in &idle {
                table.remove(owner);
            }
            idle
        };

        let mut cleared = Vec::with_capacity(idle.len());
        for (owner, last) in idle {
            let still_idle = || !self.is_tracked(&owner);
            match self.store.clear_recent_messages_if(&owner, &still_idle).await {
                Ok(true) => {
                    tracing::info!(owner = %owner, idle_secs = threshold.as_secs(), "cleared rolling context for idle owner");
                    cleared.push(owner);
                }
                Ok(false) => {
                    tracing::debug!(owner = %owner, "owner became active again, rolling context kept");
                }
                Err(MemoryError::InvalidOwner(_)) => {
                    tracing::warn!(owner = %owner, "dropping unclearable owner from the reaper");
                }
                Err(e) => {
                    tracing::warn!(owner = %owner, error = %e, "failed to clear rolling context for idle owner, will retry");
                    self.table().entry(owner).or_insert(last);
                }
            }
        }
        cleared
    }

    /// Run sweeps on the configured interval until the handle is stopped.
    pub fn spawn(self: &Arc<Self>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let reaper = Arc::clone(self);
        let period = self.settings.sweep_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper.sweep().await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            tracing::debug!("inactivity reaper stopped");
        });

        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner of a running sweep loop.
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the loop and wait for it to exit. A sweep already in progress
    /// finishes first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}
