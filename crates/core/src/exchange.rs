use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ThreadId;

pub type ExchangeId = Uuid;

/// A user turn plus its assistant response, scoped to a thread and topic.
///
/// Invariant: at most one memory chunk per exchange — `memory_chunk` is
/// set exactly once by the memory-chunker worker; a second attempt must
/// observe it already populated and leave the row unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub thread_id: ThreadId,
    pub topic: String,
    pub prompt_text: String,
    pub response_text: String,
    pub created_at: DateTime<Utc>,
    pub memory_chunk: Option<serde_json::Value>,
}

impl Exchange {
    pub fn new(thread_id: ThreadId, topic: impl Into<String>, prompt_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            topic: topic.into(),
            prompt_text: prompt_text.into(),
            response_text: String::new(),
            created_at: Utc::now(),
            memory_chunk: None,
        }
    }

    /// Sets the memory chunk once. Returns `false` without mutating if a
    /// chunk is already present — the "already set" signal from spec §8.
    pub fn set_memory_chunk(&mut self, chunk: serde_json::Value) -> bool {
        if self.memory_chunk.is_some() {
            return false;
        }
        self.memory_chunk = Some(chunk);
        true
    }
}
