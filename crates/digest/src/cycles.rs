//! Tool-work cycle tracking (spec §4.4 Phase C): dedup against an
//! in-flight semantically-similar request, and cancellation of active
//! tool-work on a cancel/self-resolved intent.
//!
//! Grounded on the original digest worker's `_check_active_tool_work` /
//! `_cancel_active_tool_work` (cosine > 0.65 dedup, elapsed-time-banded
//! progress phrases) — here a Redis + Postgres `CycleService` lookup
//! becomes a plain in-memory registry the runtime owns for the process
//! lifetime.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cortex_core::{Cycle, CycleId, CycleStatus, CycleType};
use cortex_memory::{Embedding, cosine_similarity};

struct TrackedCycle {
    cycle: Cycle,
    content: String,
    embedding: Embedding,
}

#[derive(Default)]
pub struct CycleTracker {
    cycles: HashMap<CycleId, TrackedCycle>,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, cycle: Cycle, content: impl Into<String>, embedding: Embedding) {
        let cycle_id = cycle.cycle_id;
        self.cycles.insert(cycle_id, TrackedCycle { cycle, content: content.into(), embedding });
    }

    pub fn complete(&mut self, cycle_id: CycleId, status: CycleStatus) {
        if let Some(tracked) = self.cycles.get_mut(&cycle_id) {
            tracked.cycle.status = status;
        }
    }

    /// Returns a progress phrase if a `tool_work` cycle on this topic,
    /// still `processing`, is semantically similar (cosine ≥ threshold)
    /// to `embedding` — the fast-path dedup check.
    pub fn check_in_flight(&self, topic: &str, embedding: &Embedding, cosine_threshold: f32, now: DateTime<Utc>) -> Option<String> {
        self.cycles
            .values()
            .filter(|t| t.cycle.topic == topic && t.cycle.kind == CycleType::ToolWork && t.cycle.status == CycleStatus::Processing)
            .filter(|t| cosine_similarity(&t.embedding, embedding) >= cosine_threshold)
            .max_by(|a, b| a.cycle.created_at.cmp(&b.cycle.created_at))
            .map(|t| progress_phrase(now - t.cycle.created_at))
    }

    /// Cancels every active `tool_work` cycle for `topic` (a cancel or
    /// self-resolved intent), returning how many were cancelled.
    pub fn cancel_active_tool_work(&mut self, topic: &str) -> usize {
        let mut cancelled = 0;
        for tracked in self.cycles.values_mut() {
            if tracked.cycle.topic == topic && tracked.cycle.kind == CycleType::ToolWork && tracked.cycle.status == CycleStatus::Processing {
                tracked.cycle.status = CycleStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drops cycles that have reached a terminal status, so the registry
    /// does not grow without bound across a long-running process.
    pub fn sweep_terminal(&mut self) {
        self.cycles.retain(|_, t| t.cycle.status == CycleStatus::Processing);
    }

    #[cfg(test)]
    fn content_of(&self, cycle_id: CycleId) -> Option<&str> {
        self.cycles.get(&cycle_id).map(|t| t.content.as_str())
    }
}

fn progress_phrase(elapsed: chrono::Duration) -> String {
    let elapsed_secs = elapsed.num_seconds();
    if elapsed_secs < 10 {
        "Just started looking into that. I'll update you shortly.".to_string()
    } else if elapsed_secs < 30 {
        "Still working on it. Pulling the latest info now.".to_string()
    } else {
        "Digging deeper into this. I'll share what I find soon.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_match_returns_progress_phrase() {
        let mut tracker = CycleTracker::new();
        let cycle = Cycle::root(CycleType::ToolWork, "travel");
        tracker.register(cycle, "find flights to rome", vec![1.0, 0.0]);
        let now = Utc::now();
        let phrase = tracker.check_in_flight("travel", &vec![1.0, 0.0], 0.65, now);
        assert!(phrase.is_some());
    }

    #[test]
    fn dissimilar_prompt_does_not_match() {
        let mut tracker = CycleTracker::new();
        let cycle = Cycle::root(CycleType::ToolWork, "travel");
        tracker.register(cycle, "find flights to rome", vec![1.0, 0.0]);
        let phrase = tracker.check_in_flight("travel", &vec![0.0, 1.0], 0.65, Utc::now());
        assert!(phrase.is_none());
    }

    #[test]
    fn cancel_marks_matching_cycles_cancelled_and_excludes_from_in_flight() {
        let mut tracker = CycleTracker::new();
        let cycle = Cycle::root(CycleType::ToolWork, "travel");
        let cycle_id = cycle.cycle_id;
        tracker.register(cycle, "find flights", vec![1.0, 0.0]);
        assert_eq!(tracker.cancel_active_tool_work("travel"), 1);
        assert!(tracker.check_in_flight("travel", &vec![1.0, 0.0], 0.65, Utc::now()).is_none());
        assert!(tracker.content_of(cycle_id).is_some());
    }
}
