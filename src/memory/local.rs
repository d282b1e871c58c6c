//! File-backed memory store.
//!
//! Each owner gets a directory holding two independent JSON documents:
//! `memory.json` (long-term records) and `recent.json` (rolling context lines).
//! Writes rewrite the whole document through a temp file and rename, so readers
//! never observe a half-written file and run without taking a lock.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::owner_lock::OwnerLocks;
use super::similarity::{cosine_similarity, is_finite_vector, select_top, ScoredText};
use super::types::MemoryRecord;
use super::{MemoryError, MemoryStore, Result};
use crate::config::LocalConfig;

const MEMORY_FILE: &str = "memory.json";
const RECENT_FILE: &str = "recent.json";

/// Tuning for [`LocalStore`].
#[derive(Debug, Clone)]
pub struct LocalSettings {
    /// Rolling-context lines kept per owner.
    pub recent_cap: usize,
    /// Matches scoring below this are never returned.
    pub min_similarity: Option<f64>,
    /// Reject an exact (owner, text) repeat with [`MemoryError::Duplicate`].
    pub reject_duplicates: bool,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            recent_cap: 5,
            min_similarity: None,
            reject_duplicates: true,
        }
    }
}

impl From<&LocalConfig> for LocalSettings {
    fn from(config: &LocalConfig) -> Self {
        Self {
            recent_cap: config.recent_cap,
            min_similarity: config.min_similarity,
            reject_duplicates: config.reject_duplicates,
        }
    }
}

pub struct LocalStore {
    root: PathBuf,
    settings: LocalSettings,
    locks: OwnerLocks,
}

impl LocalStore {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, settings: LocalSettings) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(root = %root.display(), recent_cap = settings.recent_cap, "local memory store ready");
        Ok(Self {
            root,
            settings,
            locks: OwnerLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, owner: &str) -> Result<PathBuf> {
        validate_owner(owner)?;
        Ok(self.root.join(owner))
    }

    async fn load_records(&self, owner: &str) -> Result<Vec<MemoryRecord>> {
        read_document(&self.owner_dir(owner)?.join(MEMORY_FILE)).await
    }

    async fn load_recent(&self, owner: &str) -> Result<Vec<String>> {
        read_document(&self.owner_dir(owner)?.join(RECENT_FILE)).await
    }
}

#[async_trait]
impl MemoryStore for LocalStore {
    async fn add(&self, owner: &str, text: &str, vector: &[f32]) -> Result<()> {
        let dir = self.owner_dir(owner)?;
        if !is_finite_vector(vector) {
            return Err(MemoryError::InvalidVector("non-finite component".into()));
        }
        let _guard = self.locks.lock(owner).await;

        let path = dir.join(MEMORY_FILE);
        let mut records: Vec<MemoryRecord> = read_document(&path).await?;
        if self.settings.reject_duplicates && records.iter().any(|r| r.text == text) {
            return Err(MemoryError::Duplicate);
        }
        records.push(MemoryRecord::new(text, vector.to_vec()));
        write_document(&dir, &path, &records).await?;

        tracing::debug!(owner = %owner, total = records.len(), "memory added");
        Ok(())
    }

    async fn search(&self, owner: &str, query: &[f32], k: usize) -> Result<Vec<String>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .load_records(owner)
            .await?
            .into_iter()
            .map(|record| ScoredText {
                score: cosine_similarity(query, &record.vector),
                text: record.text,
            })
            .collect();

        let top = select_top(candidates, k, self.settings.min_similarity);
        Ok(top.into_iter().map(|m| m.text).collect())
    }

    async fn add_recent_message(&self, owner: &str, text: &str) -> Result<()> {
        let dir = self.owner_dir(owner)?;
        let _guard = self.locks.lock(owner).await;

        let path = dir.join(RECENT_FILE);
        let mut lines: Vec<String> = read_document(&path).await?;
        lines.push(text.to_string());
        keep_last(&mut lines, self.settings.recent_cap);
        write_document(&dir, &path, &lines).await
    }

    async fn get_recent_messages(&self, owner: &str) -> Result<Vec<String>> {
        let mut lines = self.load_recent(owner).await?;
        keep_last(&mut lines, self.settings.recent_cap);
        Ok(lines)
    }

    async fn clear_recent_messages(&self, owner: &str) -> Result<()> {
        let path = self.owner_dir(owner)?.join(RECENT_FILE);
        let _guard = self.locks.lock(owner).await;
        remove_document(&path).await
    }

    async fn clear_recent_messages_if(
        &self,
        owner: &str,
        still_idle: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<bool> {
        let path = self.owner_dir(owner)?.join(RECENT_FILE);
        let _guard = self.locks.lock(owner).await;
        if !still_idle() {
            return Ok(false);
        }
        remove_document(&path).await?;
        Ok(true)
    }

    async fn delete_user_data(&self, owner: &str) -> Result<()> {
        let dir = self.owner_dir(owner)?;
        {
            let _guard = self.locks.lock(owner).await;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.locks.release(owner);
        tracing::info!(owner = %owner, "owner data deleted");
        Ok(())
    }
}

/// Owner ids become directory names, so anything that could escape the root
/// or collide with a path component is refused.
fn validate_owner(owner: &str) -> Result<()> {
    let bad = owner.is_empty()
        || owner == "."
        || owner == ".."
        || owner.contains(['/', '\\', '\0'])
        || Path::new(owner).is_absolute();
    if bad {
        return Err(MemoryError::InvalidOwner(owner.to_string()));
    }
    Ok(())
}

fn keep_last(lines: &mut Vec<String>, cap: usize) {
    if lines.len() > cap {
        lines.drain(..lines.len() - cap);
    }
}

/// Read a JSON document; a missing file reads as an empty list.
async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "unreadable memory document");
        MemoryError::Serialization(format!("{}: {e}", path.display()))
    })
}

async fn remove_document(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Replace a JSON document atomically (tmp + rename).
async fn write_document<T: Serialize>(dir: &Path, path: &Path, items: &[T]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let data = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
