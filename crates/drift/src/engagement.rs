//! Standalone engagement tracker (spec §9 resolves the original's circular
//! COMMUNICATE-owns-engagement reference by pulling this out as its own
//! module — every action that delivers user-facing output shares the same
//! pending-response/backoff/circuit-breaker state). Grounded on
//! `autonomous_actions/engagement_tracker.py`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use cortex_memory::{cosine_similarity, jaccard_similarity, Embedding};

use crate::action::Outcome;

const HISTORY_SIZE: usize = 10;
const RECENT_OUTCOMES_SIZE: usize = 3;
const BACKOFF_CAP: u32 = 16;

#[derive(Debug, Clone)]
struct OutcomeEntry {
    outcome: Outcome,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PendingProactive {
    pub id: uuid::Uuid,
    pub content: String,
    pub embedding: Option<Embedding>,
    pub thread_id: Option<uuid::Uuid>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EngagementResult {
    pub outcome: Outcome,
    pub score: f32,
    pub similarity: f32,
    pub word_count: usize,
}

/// How long a pending proactive message waits for a reply before it's
/// scored as `Ignored` (spec §4.11: 4h timeout).
pub const PENDING_TIMEOUT_SECS: i64 = 14_400;

pub struct EngagementTracker {
    engaged_similarity: f32,
    dismissed_similarity: f32,
    min_engaged_words: usize,

    recent_outcomes: VecDeque<OutcomeEntry>,
    history: VecDeque<OutcomeEntry>,
    engagement_score: f32,
    backoff_multiplier: u32,
    paused: bool,
    paused_since: Option<DateTime<Utc>>,
    pause_hours_applied: Option<i64>,
    pending: Option<PendingProactive>,
}

impl Default for EngagementTracker {
    fn default() -> Self {
        Self::new(0.35, 0.2, 3)
    }
}

impl EngagementTracker {
    pub fn new(engaged_similarity: f32, dismissed_similarity: f32, min_engaged_words: usize) -> Self {
        Self {
            engaged_similarity,
            dismissed_similarity,
            min_engaged_words,
            recent_outcomes: VecDeque::with_capacity(RECENT_OUTCOMES_SIZE),
            history: VecDeque::with_capacity(HISTORY_SIZE),
            engagement_score: 1.0,
            backoff_multiplier: 1,
            paused: false,
            paused_since: None,
            pause_hours_applied: None,
            pending: None,
        }
    }

    pub fn store_pending(&mut self, id: uuid::Uuid, content: impl Into<String>, embedding: Option<Embedding>, thread_id: Option<uuid::Uuid>) {
        self.pending = Some(PendingProactive { id, content: content.into(), embedding, thread_id, sent_at: Utc::now() });
    }

    pub fn pending(&self) -> Option<&PendingProactive> {
        self.pending.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Marks a pending message timed out past [`PENDING_TIMEOUT_SECS`] as
    /// `Ignored`; callers poll this on a schedule (the drift tick).
    pub fn expire_pending_if_timed_out(&mut self, now: DateTime<Utc>) -> Option<EngagementResult> {
        let timed_out = self.pending.as_ref().is_some_and(|p| (now - p.sent_at).num_seconds() > PENDING_TIMEOUT_SECS);
        if !timed_out {
            return None;
        }
        let result = EngagementResult { outcome: Outcome::Ignored, score: -0.5, similarity: 0.0, word_count: 0 };
        self.record_outcome(result.outcome, now);
        Some(result)
    }

    /// Scores a user message against the pending proactive message, if
    /// any. Returns `None` when there is nothing pending to correlate.
    pub fn check_and_score(&mut self, user_message: &str, user_embedding: Option<&Embedding>, now: DateTime<Utc>) -> Option<EngagementResult> {
        let pending = self.pending.clone()?;

        let similarity = match (user_embedding, pending.embedding.as_ref()) {
            (Some(a), Some(b)) => cosine_similarity(a, b),
            _ => jaccard_similarity(user_message, &pending.content),
        };
        let word_count = user_message.split_whitespace().count();
        let (outcome, score) = classify_response(similarity, word_count, self.engaged_similarity, self.dismissed_similarity, self.min_engaged_words);

        self.record_outcome(outcome, now);
        Some(EngagementResult { outcome, score, similarity, word_count })
    }

    fn record_outcome(&mut self, outcome: Outcome, now: DateTime<Utc>) {
        let entry = OutcomeEntry { outcome, at: now };
        self.recent_outcomes.push_front(entry.clone());
        self.recent_outcomes.truncate(RECENT_OUTCOMES_SIZE);
        self.history.push_front(entry);
        self.history.truncate(HISTORY_SIZE);

        self.recompute_engagement_score();

        match outcome {
            Outcome::Engaged | Outcome::Acknowledged => {
                self.backoff_multiplier = 1;
                if self.paused && self.engagement_score >= 0.5 {
                    self.paused = false;
                    self.paused_since = None;
                }
            }
            Outcome::Dismissed | Outcome::Ignored => {
                self.backoff_multiplier = (self.backoff_multiplier * 2).min(BACKOFF_CAP);
            }
        }

        self.pending = None;
    }

    fn recompute_engagement_score(&mut self) {
        if self.history.is_empty() {
            self.engagement_score = 1.0;
            return;
        }
        let total: f32 = self
            .history
            .iter()
            .map(|e| match e.outcome {
                Outcome::Engaged => 1.0,
                Outcome::Acknowledged => 0.5,
                Outcome::Dismissed => 0.0,
                Outcome::Ignored => -0.5,
            })
            .sum();
        let count = self.history.len() as f32;
        self.engagement_score = (0.0f32).max((total / count + 0.5) / 1.5);
    }

    pub fn engagement_score(&self) -> f32 {
        self.engagement_score
    }

    pub fn backoff_multiplier(&self) -> u32 {
        self.backoff_multiplier
    }

    /// `>= 2 of the last 3` ignored/dismissed outcomes within `window_hours`
    /// trips the breaker and pauses delivery for `pause_hours`.
    pub fn check_circuit_breaker(&mut self, now: DateTime<Utc>, window_hours: i64, pause_hours: i64, threshold: usize) -> bool {
        if self.recent_outcomes.len() < RECENT_OUTCOMES_SIZE - 1 {
            return false;
        }
        let cutoff = now - chrono::Duration::hours(window_hours);
        let failures = self
            .recent_outcomes
            .iter()
            .filter(|e| e.at >= cutoff && matches!(e.outcome, Outcome::Ignored | Outcome::Dismissed))
            .count();
        if failures >= threshold {
            self.paused = true;
            self.paused_since = Some(now);
            self.pause_hours_applied = Some(pause_hours);
            true
        } else {
            false
        }
    }

    /// Auto-pause below this engagement floor (spec §4.11 COMMUNICATE
    /// engagement gate), independent of the circuit breaker.
    pub fn auto_pause_if_low_engagement(&mut self, now: DateTime<Utc>, floor: f32) -> bool {
        if self.engagement_score < floor {
            self.paused = true;
            self.paused_since.get_or_insert(now);
            true
        } else {
            false
        }
    }

    /// `true` if currently paused and the pause hasn't expired yet. Expired
    /// pauses auto-lift (mirrors the teacher's Redis key TTL expiry).
    pub fn is_paused(&mut self, now: DateTime<Utc>) -> bool {
        if !self.paused {
            return false;
        }
        if let (Some(since), Some(hours)) = (self.paused_since, self.pause_hours_applied) {
            if (now - since).num_hours() >= hours {
                self.paused = false;
                self.paused_since = None;
                self.pause_hours_applied = None;
                return false;
            }
        }
        true
    }

    /// Suppression recovery: a pause older than `recovery_days` combined
    /// with fresh user activity resets backoff to a mild 2x rather than
    /// leaving it at the circuit-breaker's cap.
    pub fn check_suppression_recovery(&mut self, now: DateTime<Utc>, recovery_days: i64, user_active_since_pause: bool) {
        if let Some(since) = self.paused_since {
            if user_active_since_pause && (now - since).num_days() >= recovery_days {
                self.paused = false;
                self.paused_since = None;
                self.pause_hours_applied = None;
                self.backoff_multiplier = 2;
            }
        }
    }
}

fn classify_response(similarity: f32, word_count: usize, engaged_similarity: f32, dismissed_similarity: f32, min_engaged_words: usize) -> (Outcome, f32) {
    if similarity > engaged_similarity && word_count >= min_engaged_words {
        (Outcome::Engaged, 1.0)
    } else if similarity > engaged_similarity || word_count >= min_engaged_words {
        (Outcome::Acknowledged, 0.5)
    } else if similarity < dismissed_similarity {
        (Outcome::Dismissed, 0.0)
    } else {
        (Outcome::Acknowledged, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engaged_response_resets_backoff() {
        let mut tracker = EngagementTracker::default();
        tracker.backoff_multiplier = 8;
        let id = uuid::Uuid::new_v4();
        let pending_embedding = vec![1.0, 0.0, 0.0];
        tracker.store_pending(id, "want to talk about your trip?", Some(pending_embedding.clone()), None);
        let result = tracker.check_and_score("yes! tell me more about the itinerary please", Some(&pending_embedding), Utc::now()).unwrap();
        assert_eq!(result.outcome, Outcome::Engaged);
        assert_eq!(tracker.backoff_multiplier(), 1);
    }

    #[test]
    fn ignored_response_doubles_backoff_and_caps_at_sixteen() {
        let mut tracker = EngagementTracker::default();
        tracker.backoff_multiplier = 16;
        for _ in 0..3 {
            let id = uuid::Uuid::new_v4();
            tracker.store_pending(id, "ping", None, None);
            tracker.expire_pending_if_timed_out(Utc::now() + chrono::Duration::seconds(PENDING_TIMEOUT_SECS + 1));
        }
        assert_eq!(tracker.backoff_multiplier(), 16);
    }

    #[test]
    fn circuit_breaker_trips_after_two_of_three_failures() {
        let mut tracker = EngagementTracker::default();
        let now = Utc::now();
        for _ in 0..2 {
            let id = uuid::Uuid::new_v4();
            tracker.store_pending(id, "ping", None, None);
            tracker.check_and_score("k", None, now);
        }
        let tripped = tracker.check_circuit_breaker(now, 4, 8, 2);
        assert!(tripped);
        assert!(tracker.is_paused(now));
    }

    #[test]
    fn no_pending_means_no_score() {
        let mut tracker = EngagementTracker::default();
        assert!(tracker.check_and_score("hello", None, Utc::now()).is_none());
    }
}
