//! Core memory record definitions.
//!
//! [`MemoryRecord`] is a long-term fact with its embedding, [`RecentMessageRecord`]
//! is one line of rolling context, and [`MemoryContext`] is what the orchestrator
//! receives before composing a reply.

use serde::{Deserialize, Serialize};

/// A long-term memory as persisted in an owner's document.
///
/// The owner is implied by the document (local) or carried as a column (remote),
/// so it is not repeated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The remembered fact, verbatim.
    pub text: String,
    /// Embedding of `text`. All vectors compared together share one dimension.
    pub vector: Vec<f32>,
    /// Creation time, Unix milliseconds.
    pub timestamp: i64,
}

impl MemoryRecord {
    pub fn new(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A long-term memory row as stored remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedMemoryRecord {
    pub user_id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub timestamp: i64,
}

/// One line of rolling context as stored remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessageRecord {
    pub user_id: String,
    pub text: String,
    /// Insertion time, Unix milliseconds. Strictly increasing per writer.
    pub timestamp: i64,
}

/// Memory gathered for one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryContext {
    /// Rolling context, oldest first.
    pub recent: Vec<String>,
    /// Long-term facts, most similar first.
    pub recalled: Vec<String>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.recalled.is_empty()
    }
}
