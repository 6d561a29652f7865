//! COMMUNICATE — decides whether a drift thought is worth proactively
//! surfacing to the user. Highest-priority action (10); the winner still
//! runs through the mode router as the final judge once delivered. Grounded
//! on `autonomous_actions/communicate_action.py`.
//!
//! Four gates: quality (type bonus, activation threshold — bootstrap or
//! self-calibrating median, topic relevance, novelty), timing (idle window,
//! quiet hours), engagement (shared [`crate::engagement::EngagementTracker`]
//! state — one pending message at a time, circuit breaker, auto-pause), and
//! a small candidate queue so a thought that clears quality/timing but not
//! engagement isn't simply dropped.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_memory::{cosine_similarity, jaccard_similarity, Embedding};

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::quiet_hours::is_quiet_hour;
use crate::thought::{Thought, ThoughtType};

const BOOTSTRAP_THRESHOLD: f32 = 0.6;
const BOOTSTRAP_CYCLES: u32 = 20;
const RELEVANCE_THRESHOLD: f32 = 0.4;
const NOVELTY_THRESHOLD: f32 = 0.7;
const MIN_IDLE_SECS: i64 = 1_800;
const MAX_IDLE_SECS: i64 = 86_400;
const AUTO_PAUSE_THRESHOLD: f32 = 0.3;
const MAX_CANDIDATES: usize = 3;
const MAX_DEFERRED: usize = 3;
const DEFERRED_TTL: Duration = Duration::from_secs(172_800);
const CIRCUIT_BREAKER_WINDOW_HOURS: i64 = 4;
const CIRCUIT_BREAKER_THRESHOLD: usize = 2;
const CIRCUIT_BREAKER_PAUSE_HOURS: i64 = 8;

fn type_bonus(thought_type: ThoughtType) -> f32 {
    match thought_type {
        ThoughtType::Question => 1.3,
        ThoughtType::Hypothesis => 1.2,
        ThoughtType::Reflection => 0.8,
        ThoughtType::Event => 1.0,
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub thought_content: String,
    pub seed_topic: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// Everything COMMUNICATE's quality/timing gates need beyond `Thought`/
/// `DriftContext`: recent self-calibration history and recent working
/// memory for the novelty check.
pub struct CommunicateInputs<'a> {
    pub recent_activation_energies: &'a [f32],
    pub recent_user_message_embeddings: &'a [(DateTime<Utc>, Embedding)],
    pub recent_working_memory_turns: &'a [String],
}

pub struct CommunicateAction {
    drift_count: u32,
    candidates: VecDeque<Candidate>,
    deferred: VecDeque<Candidate>,
}

impl Default for CommunicateAction {
    fn default() -> Self {
        Self { drift_count: 0, candidates: VecDeque::new(), deferred: VecDeque::new() }
    }
}

impl CommunicateAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_activation_energy(&mut self) {
        self.drift_count += 1;
    }

    fn activation_threshold(&self, thought_type: ThoughtType, recent: &[f32]) -> f32 {
        let base = if self.drift_count < BOOTSTRAP_CYCLES || recent.len() < 5 {
            BOOTSTRAP_THRESHOLD
        } else {
            median(recent)
        };
        if thought_type == ThoughtType::Reflection { base * 1.25 } else { base * 1.1 }
    }

    fn topic_relevance(thought: &Thought, inputs: &CommunicateInputs<'_>, now: DateTime<Utc>) -> f32 {
        let Some(embedding) = thought.embedding.as_ref() else { return 0.0 };
        inputs
            .recent_user_message_embeddings
            .iter()
            .filter(|(at, _)| (now - *at).num_hours() <= 72)
            .map(|(_, emb)| cosine_similarity(embedding, emb))
            .fold(0.0f32, f32::max)
    }

    fn is_novel(thought: &Thought, inputs: &CommunicateInputs<'_>) -> bool {
        if inputs.recent_working_memory_turns.is_empty() {
            return true;
        }
        let max_sim = inputs.recent_working_memory_turns.iter().map(|turn| jaccard_similarity(&thought.content, turn)).fold(0.0f32, f32::max);
        max_sim < NOVELTY_THRESHOLD
    }

    fn quality_score(&self, thought: &Thought, inputs: &CommunicateInputs<'_>, now: DateTime<Utc>) -> Option<f32> {
        let threshold = self.activation_threshold(thought.thought_type, inputs.recent_activation_energies);
        if thought.activation_energy < threshold {
            return None;
        }
        let relevance = Self::topic_relevance(thought, inputs, now);
        if relevance < RELEVANCE_THRESHOLD {
            return None;
        }
        if !Self::is_novel(thought, inputs) {
            return None;
        }
        Some(thought.activation_energy * type_bonus(thought.thought_type) * relevance)
    }

    fn timing_passes(ctx: &DriftContext<'_>) -> bool {
        if is_quiet_hour(ctx.current_hour, ctx.quiet_hours_start, ctx.quiet_hours_end) {
            return false;
        }
        let Some(last_interaction) = ctx.last_interaction_at else { return false };
        let idle = (ctx.now - last_interaction).num_seconds();
        (MIN_IDLE_SECS..=MAX_IDLE_SECS).contains(&idle)
    }

    fn engagement_passes(ctx: &mut DriftContext<'_>) -> bool {
        if ctx.engagement.has_pending() {
            return false;
        }
        if ctx.engagement.is_paused(ctx.now) {
            return false;
        }
        if ctx.engagement.check_circuit_breaker(ctx.now, CIRCUIT_BREAKER_WINDOW_HOURS, CIRCUIT_BREAKER_PAUSE_HOURS, CIRCUIT_BREAKER_THRESHOLD) {
            return false;
        }
        if ctx.engagement.auto_pause_if_low_engagement(ctx.now, AUTO_PAUSE_THRESHOLD) {
            return false;
        }
        true
    }

    fn add_candidate(&mut self, thought: &Thought, score: f32, now: DateTime<Utc>) {
        self.candidates.push_back(Candidate { thought_content: thought.content.clone(), seed_topic: thought.seed_topic.clone(), score, created_at: now, ttl: Duration::from_secs(thought.drift_gist_ttl_secs.max(0) as u64) });
        while self.candidates.len() > MAX_CANDIDATES {
            // Keep the highest-scoring; drop the weakest.
            if let Some((idx, _)) = self.candidates.iter().enumerate().min_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap()) {
                self.candidates.remove(idx);
            }
        }
    }

    fn add_deferred(&mut self, thought: &Thought, score: f32, now: DateTime<Utc>) {
        self.deferred.push_back(Candidate { thought_content: thought.content.clone(), seed_topic: thought.seed_topic.clone(), score, created_at: now, ttl: DEFERRED_TTL });
        while self.deferred.len() > MAX_DEFERRED {
            if let Some((idx, _)) = self.deferred.iter().enumerate().min_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap()) {
                self.deferred.remove(idx);
            }
        }
    }

    /// Age-decayed best candidate: a candidate loses half its score once
    /// its TTL has fully elapsed, fading out rather than vanishing at a
    /// hard cutoff.
    pub fn best_candidate(&mut self, now: DateTime<Utc>) -> Option<Candidate> {
        self.candidates.retain(|c| now.signed_duration_since(c.created_at).to_std().map(|age| age <= c.ttl * 2).unwrap_or(false));
        let best_idx = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let age = now.signed_duration_since(c.created_at).to_std().unwrap_or_default();
                let decay = 1.0 - (age.as_secs_f32() / (c.ttl.as_secs_f32().max(1.0) * 2.0)).min(1.0) * 0.5;
                (i, c.score * decay)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(i, _)| i)?;
        self.candidates.remove(best_idx)
    }

    /// On quiet hours just ending, deliver the best deferred thought (the
    /// runner calls this once per quiet-hours cycle).
    pub fn pop_best_deferred(&mut self) -> Option<Candidate> {
        let best_idx = self.deferred.iter().enumerate().max_by(|a, b| a.1.score.partial_cmp(&b.1.score).unwrap()).map(|(i, _)| i)?;
        self.deferred.remove(best_idx)
    }
}

impl Action for CommunicateAction {
    fn name(&self) -> &'static str {
        "COMMUNICATE"
    }

    fn priority(&self) -> i8 {
        10
    }

    // COMMUNICATE's quality gate needs `CommunicateInputs` the registry
    // doesn't carry on `Thought`/`DriftContext` alone (self-calibration
    // history, recent message embeddings, working memory) — callers drive
    // it through `evaluate` and use this impl only for registry uniformity.
    fn should_execute(&mut self, _thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        (0.0, false)
    }

    fn execute(&mut self, thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        ActionResult::ok("COMMUNICATE", serde_json::json!({ "seed_topic": thought.seed_topic, "content": thought.content }))
    }
}

impl CommunicateAction {
    /// The full should_execute flow, including the candidate/deferred
    /// side effects the plain `Action` trait method can't express: quality
    /// failing is a hard reject, but quality-passing-while-timing-or-
    /// engagement-fails still queues the thought for later delivery.
    pub fn evaluate(&mut self, thought: &Thought, ctx: &mut DriftContext<'_>, inputs: &CommunicateInputs<'_>) -> (f32, bool) {
        let Some(score) = self.quality_score(thought, inputs, ctx.now) else { return (0.0, false) };

        if is_quiet_hour(ctx.current_hour, ctx.quiet_hours_start, ctx.quiet_hours_end) {
            self.add_deferred(thought, score, ctx.now);
            return (0.0, false);
        }
        if !Self::timing_passes(ctx) {
            self.add_candidate(thought, score, ctx.now);
            return (0.0, false);
        }
        if !Self::engagement_passes(ctx) {
            self.add_candidate(thought, score, ctx.now);
            return (0.0, false);
        }

        (score, true)
    }
}

fn median(values: &[f32]) -> f32 {
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted[sorted.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::EngagementTracker;

    fn reflection_thought(embedding: Vec<f32>) -> Thought {
        let mut t = Thought::new(ThoughtType::Reflection, "you mentioned wanting to travel more", 0.9, "travel", "travel");
        t.embedding = Some(embedding);
        t
    }

    #[test]
    fn below_bootstrap_threshold_is_ineligible() {
        let mut engagement = EngagementTracker::default();
        let mut action = CommunicateAction::new();
        let mut t = reflection_thought(vec![1.0, 0.0]);
        t.activation_energy = 0.1;
        let mut ctx = DriftContext::test_default(&mut engagement);
        let embeddings = vec![(ctx.now, vec![1.0, 0.0])];
        let inputs = CommunicateInputs { recent_activation_energies: &[], recent_user_message_embeddings: &embeddings, recent_working_memory_turns: &[] };
        let (_, eligible) = action.evaluate(&t, &mut ctx, &inputs);
        assert!(!eligible);
    }

    #[test]
    fn quiet_hours_defers_instead_of_dropping() {
        let mut engagement = EngagementTracker::default();
        let mut action = CommunicateAction::new();
        let thought = reflection_thought(vec![1.0, 0.0]);
        let mut ctx = DriftContext::test_default(&mut engagement);
        ctx.current_hour = 2; // inside default 23-8 quiet window
        let embeddings = vec![(ctx.now, vec![1.0, 0.0])];
        let inputs = CommunicateInputs { recent_activation_energies: &[], recent_user_message_embeddings: &embeddings, recent_working_memory_turns: &[] };
        let (_, eligible) = action.evaluate(&thought, &mut ctx, &inputs);
        assert!(!eligible);
        assert!(action.pop_best_deferred().is_some());
    }

    #[test]
    fn quality_and_timing_pass_engagement_blocks_on_pending() {
        let mut engagement = EngagementTracker::default();
        engagement.store_pending(uuid::Uuid::new_v4(), "earlier proactive message", None, None);
        let mut action = CommunicateAction::new();
        let thought = reflection_thought(vec![1.0, 0.0]);
        let mut ctx = DriftContext::test_default(&mut engagement);
        let embeddings = vec![(ctx.now, vec![1.0, 0.0])];
        let inputs = CommunicateInputs { recent_activation_energies: &[], recent_user_message_embeddings: &embeddings, recent_working_memory_turns: &[] };
        let (_, eligible) = action.evaluate(&thought, &mut ctx, &inputs);
        assert!(!eligible);
        assert!(action.best_candidate(ctx.now).is_some());
    }

    #[test]
    fn fully_eligible_thought_scores_positively() {
        let mut engagement = EngagementTracker::default();
        let mut action = CommunicateAction::new();
        let thought = reflection_thought(vec![1.0, 0.0]);
        let mut ctx = DriftContext::test_default(&mut engagement);
        ctx.last_interaction_at = Some(ctx.now - chrono::Duration::seconds(MIN_IDLE_SECS + 60));
        let embeddings = vec![(ctx.now, vec![1.0, 0.0])];
        let inputs = CommunicateInputs { recent_activation_energies: &[], recent_user_message_embeddings: &embeddings, recent_working_memory_turns: &[] };
        let (score, eligible) = action.evaluate(&thought, &mut ctx, &inputs);
        assert!(eligible);
        assert!(score > 0.0);
    }
}
