//! C3 — working memory: a bounded ring buffer of recent turns per thread.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use cortex_core::ThreadId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into(), timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into(), timestamp: Utc::now() }
    }
}

/// Strict per-thread FIFO bounded to `max_turns`. Reads return turns
/// oldest-first, matching the spec's "all turns ordered oldest-first".
pub struct WorkingMemoryStore {
    max_turns: usize,
    threads: HashMap<ThreadId, VecDeque<Turn>>,
}

impl WorkingMemoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns, threads: HashMap::new() }
    }

    pub fn append(&mut self, thread_id: ThreadId, turn: Turn) {
        let buf = self.threads.entry(thread_id).or_default();
        buf.push_back(turn);
        while buf.len() > self.max_turns {
            buf.pop_front();
        }
    }

    pub fn turns(&self, thread_id: ThreadId) -> Vec<Turn> {
        self.threads.get(&thread_id).map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn depth(&self, thread_id: ThreadId) -> usize {
        self.threads.get(&thread_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Fill fraction in `[0,1]`, one of `context_warmth`'s three sub-scores
    /// (spec §4.4 Phase B).
    pub fn fill_ratio(&self, thread_id: ThreadId) -> f32 {
        if self.max_turns == 0 {
            return 0.0;
        }
        self.depth(thread_id) as f32 / self.max_turns as f32
    }

    /// Last two user reply lengths (words), most-recent-last — used by the
    /// mode router's cognitive-load signal and COMMUNICATE's gate.
    pub fn recent_user_reply_lengths(&self, thread_id: ThreadId, n: usize) -> Vec<usize> {
        self.threads
            .get(&thread_id)
            .map(|b| {
                b.iter()
                    .filter(|t| t.role == TurnRole::User)
                    .rev()
                    .take(n)
                    .map(|t| t.content.split_whitespace().count())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self, thread_id: ThreadId) {
        self.threads.remove(&thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn append_bounds_to_max_turns() {
        let mut store = WorkingMemoryStore::new(2);
        let thread = Uuid::new_v4();
        store.append(thread, Turn::user("a"));
        store.append(thread, Turn::assistant("b"));
        store.append(thread, Turn::user("c"));
        let turns = store.turns(thread);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "b");
        assert_eq!(turns[1].content, "c");
    }

    #[test]
    fn turns_are_ordered_oldest_first() {
        let mut store = WorkingMemoryStore::new(5);
        let thread = Uuid::new_v4();
        store.append(thread, Turn::user("first"));
        store.append(thread, Turn::assistant("second"));
        let turns = store.turns(thread);
        assert_eq!(turns[0].content, "first");
        assert_eq!(turns[1].content, "second");
    }

    #[test]
    fn cold_start_thread_has_zero_fill_ratio() {
        let store = WorkingMemoryStore::new(10);
        assert_eq!(store.fill_ratio(Uuid::new_v4()), 0.0);
    }
}
