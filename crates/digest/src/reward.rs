//! Behaviour-reward heuristic (spec §4.4 Phase A): a cheap signal, cached
//! per topic with a short TTL, consumed later by the memory chunker to
//! feed identity reinforcement's `reward_signal` channel (spec §4.9).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use cortex_classify::classify_intent;

/// Cache TTL, matching the original digest worker's
/// `identity_reward:{topic}` key (`setex ... 1800`).
pub const REWARD_CACHE_TTL_SECS: i64 = 1800;

/// Heuristic reward in `[-1, 1]`: a cancelled turn is a strong negative
/// signal, a reply that holds or grows in length reads as sustained
/// engagement, and a sharply shorter reply reads as disengagement.
pub fn estimate_behaviour_reward(current_input: &str, previous_input: &str) -> f32 {
    let current = classify_intent(current_input);
    if current.is_cancel {
        return -1.0;
    }

    let previous_words = previous_input.split_whitespace().count();
    let current_words = current_input.split_whitespace().count();

    if previous_words == 0 {
        return 0.0;
    }

    let ratio = current_words as f32 / previous_words as f32;
    if ratio < 0.5 && previous_words > 5 {
        -0.3
    } else if ratio >= 1.0 {
        0.3
    } else {
        0.0
    }
}

struct CachedReward {
    value: f32,
    expires_at: DateTime<Utc>,
}

/// Topic-scoped, short-TTL cache for the behaviour-reward signal computed
/// in Phase A and read back by the memory chunker (C17) during
/// identity reinforcement.
#[derive(Default)]
pub struct BehaviourRewardCache {
    by_topic: HashMap<String, CachedReward>,
}

impl BehaviourRewardCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, topic: &str, value: f32, now: DateTime<Utc>) {
        self.by_topic.insert(
            topic.to_string(),
            CachedReward { value, expires_at: now + Duration::seconds(REWARD_CACHE_TTL_SECS) },
        );
    }

    /// Returns the cached reward if present and not yet expired, leaving
    /// it in place — the chunker reads it, it does not consume it.
    pub fn get_fresh(&self, topic: &str, now: DateTime<Utc>) -> Option<f32> {
        self.by_topic.get(topic).filter(|c| c.expires_at > now).map(|c| c.value)
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.by_topic.retain(|_, c| c.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_intent_is_strongly_negative() {
        assert_eq!(estimate_behaviour_reward("never mind, cancel that", "tell me more"), -1.0);
    }

    #[test]
    fn sharp_shortening_reads_as_disengagement() {
        let reward = estimate_behaviour_reward("ok", "tell me everything about the quarterly roadmap please");
        assert_eq!(reward, -0.3);
    }

    #[test]
    fn sustained_or_growing_reply_is_positive() {
        let reward = estimate_behaviour_reward("yes and also what about next steps", "what do you think");
        assert_eq!(reward, 0.3);
    }

    #[test]
    fn cache_expires_after_ttl() {
        let mut cache = BehaviourRewardCache::new();
        let now = Utc::now();
        cache.set("general", 0.3, now);
        assert_eq!(cache.get_fresh("general", now), Some(0.3));
        assert_eq!(cache.get_fresh("general", now + Duration::seconds(REWARD_CACHE_TTL_SECS + 1)), None);
    }
}
