//! SUGGEST — proposes a skill/capability once the relationship has matured
//! (connected/graduated) and enough confident traits exist to ground a
//! relevant suggestion. Grounded on `autonomous_actions/suggest_action.py`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cortex_memory::{cosine_similarity, Embedding};

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::spark::SparkPhase;
use crate::thought::Thought;

const MIN_TRAIT_CONFIDENCE: f32 = 0.7;
const RELEVANCE_THRESHOLD: f32 = 0.4;
const MIN_TRAITS_FOR_SUGGESTION: usize = 3;
const DAILY_COOLDOWN: Duration = Duration::from_secs(86_400);
const TOPIC_COOLDOWN: Duration = Duration::from_secs(7 * 86_400);

const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    ("schedule", &["morning", "evening", "routine", "time", "remind", "deadline", "meeting", "appointment", "daily", "weekly", "gym", "workout", "medication", "habit"]),
    ("list", &["track", "organize", "items", "groceries", "todo", "shopping", "tasks", "goals", "project", "plan", "checklist"]),
    ("recall", &["remember", "forgot", "memory", "earlier", "mentioned", "last time", "history", "previous"]),
    ("memorize", &["important", "note", "save", "keep", "store", "reference", "document", "record"]),
];

#[derive(Debug, Clone)]
pub struct ConfidentTrait {
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub embedding: Option<Embedding>,
}

fn skill_match(trait_: &ConfidentTrait, thought: &Thought) -> Option<&'static str> {
    let combined = format!("{} {} {}", trait_.key, trait_.value, thought.content).to_lowercase();
    SKILL_KEYWORDS.iter().find(|(_, keywords)| keywords.iter().any(|kw| combined.contains(kw))).map(|(skill, _)| *skill)
}

pub struct SuggestAction {
    last_sent_at: Option<Instant>,
    topic_cooldowns: HashMap<String, Instant>,
}

impl Default for SuggestAction {
    fn default() -> Self {
        Self { last_sent_at: None, topic_cooldowns: HashMap::new() }
    }
}

impl SuggestAction {
    pub fn new() -> Self {
        Self::default()
    }

    fn rate_limit_passes(&self, topic: &str, now: Instant) -> bool {
        if self.last_sent_at.is_some_and(|last| now.duration_since(last) < DAILY_COOLDOWN) {
            return false;
        }
        if self.topic_cooldowns.get(topic).is_some_and(|last| now.duration_since(*last) < TOPIC_COOLDOWN) {
            return false;
        }
        true
    }

    fn best_relevant_trait<'a>(thought_embedding: &Embedding, traits: &'a [ConfidentTrait]) -> Option<(&'a ConfidentTrait, f32)> {
        let mut best: Option<(&ConfidentTrait, f32)> = None;
        for t in traits {
            let Some(trait_emb) = t.embedding.as_ref() else { continue };
            let sim = cosine_similarity(thought_embedding, trait_emb);
            let is_better = match best {
                Some((_, best_sim)) => sim > best_sim,
                None => true,
            };
            if is_better {
                best = Some((t, sim));
            }
        }
        best.filter(|(_, sim)| *sim >= RELEVANCE_THRESHOLD)
    }
}

/// Input the caller supplies alongside the drift context: the trait pool,
/// since the registry doesn't own the trait store directly.
pub struct SuggestInputs<'a> {
    pub traits: &'a [ConfidentTrait],
    pub engagement_score: f32,
}

impl SuggestAction {
    pub fn evaluate(&mut self, thought: &Thought, ctx: &DriftContext<'_>, inputs: &SuggestInputs<'_>) -> (f32, bool, Option<&'static str>) {
        if !matches!(ctx.spark_phase, SparkPhase::Connected | SparkPhase::Graduated) {
            return (0.0, false, None);
        }
        let high_conf: Vec<&ConfidentTrait> = inputs.traits.iter().filter(|t| t.confidence >= MIN_TRAIT_CONFIDENCE).collect();
        if high_conf.len() < MIN_TRAITS_FOR_SUGGESTION {
            return (0.0, false, None);
        }
        let Some(embedding) = thought.embedding.as_ref() else { return (0.0, false, None) };
        let owned: Vec<ConfidentTrait> = high_conf.into_iter().cloned().collect();
        let Some((best_trait, sim)) = Self::best_relevant_trait(embedding, &owned) else { return (0.0, false, None) };
        if inputs.engagement_score <= 0.5 {
            return (0.0, false, None);
        }
        if !self.rate_limit_passes(&thought.seed_topic, Instant::now()) {
            return (0.0, false, None);
        }
        let skill = skill_match(best_trait, thought);
        (sim, true, skill)
    }
}

impl Action for SuggestAction {
    fn name(&self) -> &'static str {
        "SUGGEST"
    }

    fn priority(&self) -> i8 {
        8
    }

    // SUGGEST needs the trait pool alongside `Thought`/`DriftContext`
    // (see `evaluate`); the registry drives it through `evaluate` directly
    // and this impl exists only so it can sit in the same `Vec<Box<dyn
    // Action>>` as the other six.
    fn should_execute(&mut self, _thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        (0.0, false)
    }

    fn execute(&mut self, thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        let now = Instant::now();
        self.last_sent_at = Some(now);
        self.topic_cooldowns.insert(thought.seed_topic.clone(), now);
        ActionResult::ok("SUGGEST", serde_json::json!({ "seed_topic": thought.seed_topic }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::EngagementTracker;
    use crate::thought::ThoughtType;

    fn confident_trait(key: &str, embedding: Vec<f32>) -> ConfidentTrait {
        ConfidentTrait { key: key.into(), value: "yes".into(), confidence: 0.9, embedding: Some(embedding) }
    }

    fn thought_with_embedding(embedding: Vec<f32>) -> Thought {
        let mut t = Thought::new(ThoughtType::Reflection, "remember to take meds at night", 0.5, "health", "health");
        t.embedding = Some(embedding);
        t
    }

    #[test]
    fn fewer_than_three_confident_traits_is_ineligible() {
        let mut engagement = EngagementTracker::default();
        let mut action = SuggestAction::new();
        let ctx = DriftContext::test_default(&mut engagement);
        let traits = vec![confident_trait("a", vec![1.0, 0.0])];
        let inputs = SuggestInputs { traits: &traits, engagement_score: 1.0 };
        let (_, eligible, _) = action.evaluate(&thought_with_embedding(vec![1.0, 0.0]), &ctx, &inputs);
        assert!(!eligible);
    }

    #[test]
    fn relevant_trait_match_yields_schedule_skill() {
        let mut engagement = EngagementTracker::default();
        let mut action = SuggestAction::new();
        let ctx = DriftContext::test_default(&mut engagement);
        let traits = vec![
            confident_trait("night_routine", vec![1.0, 0.0]),
            confident_trait("b", vec![0.0, 1.0]),
            confident_trait("c", vec![0.0, 1.0]),
        ];
        let inputs = SuggestInputs { traits: &traits, engagement_score: 1.0 };
        let (score, eligible, skill) = action.evaluate(&thought_with_embedding(vec![1.0, 0.0]), &ctx, &inputs);
        assert!(eligible);
        assert!(score >= RELEVANCE_THRESHOLD);
        assert_eq!(skill, Some("schedule"));
    }

    #[test]
    fn low_engagement_blocks_suggestion() {
        let mut engagement = EngagementTracker::default();
        let mut action = SuggestAction::new();
        let ctx = DriftContext::test_default(&mut engagement);
        let traits = vec![
            confident_trait("night_routine", vec![1.0, 0.0]),
            confident_trait("b", vec![1.0, 0.0]),
            confident_trait("c", vec![1.0, 0.0]),
        ];
        let inputs = SuggestInputs { traits: &traits, engagement_score: 0.2 };
        let (_, eligible, _) = action.evaluate(&thought_with_embedding(vec![1.0, 0.0]), &ctx, &inputs);
        assert!(!eligible);
    }
}
