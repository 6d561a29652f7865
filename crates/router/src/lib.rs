//! C13 — mode router: a pure function of a signal vector that selects one
//! of `{RESPOND, ACT, CLARIFY, ACKNOWLEDGE, IGNORE}` (spec §4.6).
//!
//! The exact numeric weights of the signal → score mapping are an Open
//! Question in spec §9; SPEC_FULL.md §9 resolves it by pinning an explicit,
//! named `RouterWeights` table here rather than inline magic numbers, so a
//! weight can be replayed/tuned from logged `RoutingDecision` rows without
//! touching call sites.

use cortex_classify::{Complexity, IntentClassification};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Respond,
    Act,
    Clarify,
    Acknowledge,
    Ignore,
}

impl Mode {
    /// Tie-break priority, highest first (spec §4.6).
    fn priority(self) -> u8 {
        match self {
            Mode::Act => 4,
            Mode::Respond => 3,
            Mode::Clarify => 2,
            Mode::Acknowledge => 1,
            Mode::Ignore => 0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Mode::Act => "act",
            Mode::Respond => "respond",
            Mode::Clarify => "clarify",
            Mode::Acknowledge => "acknowledge",
            Mode::Ignore => "ignore",
        }
    }

    pub const ALL: [Mode; 5] = [Mode::Act, Mode::Respond, Mode::Clarify, Mode::Acknowledge, Mode::Ignore];
}

/// Everything the router needs, collected by the digest pipeline (spec
/// §4.6): working memory, gist/fact counts, intent, tool relevance,
/// classifier confidence, and context warmth.
#[derive(Debug, Clone)]
pub struct SignalVector {
    pub working_memory_fill: f32,
    pub gist_count: usize,
    pub fact_count: usize,
    pub intent: IntentClassification,
    pub max_tool_relevance: f32,
    pub topic_confidence: f32,
    pub context_warmth: f32,
    pub declining_reply_length: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterWeights {
    pub respond_base: f32,
    pub respond_warmth: f32,
    pub respond_topic_confidence: f32,
    pub respond_tool_relevance_penalty: f32,
    pub act_tool_relevance: f32,
    pub act_needs_tools_bonus: f32,
    pub act_complex_bonus: f32,
    pub clarify_low_confidence: f32,
    pub clarify_low_warmth: f32,
    pub clarify_complex_bonus: f32,
    pub acknowledge_base: f32,
    pub acknowledge_declining_reply_bonus: f32,
    pub acknowledge_cold_start_bonus: f32,
    pub ignore_base: f32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            respond_base: 0.5,
            respond_warmth: 0.3,
            respond_topic_confidence: 0.2,
            respond_tool_relevance_penalty: 0.2,
            act_tool_relevance: 0.6,
            act_needs_tools_bonus: 0.3,
            act_complex_bonus: 0.1,
            clarify_low_confidence: 0.5,
            clarify_low_warmth: 0.3,
            clarify_complex_bonus: 0.15,
            acknowledge_base: 0.2,
            acknowledge_declining_reply_bonus: 0.4,
            acknowledge_cold_start_bonus: 0.5,
            ignore_base: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterDecision {
    pub mode: Mode,
    pub router_confidence: f32,
    pub tiebreaker_used: bool,
    pub rationale: String,
}

pub struct ModeRouter {
    weights: RouterWeights,
    tie_break_delta: f32,
}

impl ModeRouter {
    pub fn new(weights: RouterWeights, tie_break_delta: f32) -> Self {
        Self { weights, tie_break_delta }
    }

    /// Pure function of `(signals, text, previous_mode)` — same inputs
    /// always return the same decision (spec §8 invariant).
    pub fn route(&self, signals: &SignalVector, text: &str, previous_mode: Option<Mode>) -> RouterDecision {
        let w = &self.weights;
        let mut scores: Vec<(Mode, f32)> = Vec::with_capacity(5);

        let respond = (w.respond_base + w.respond_warmth * signals.context_warmth
            + w.respond_topic_confidence * signals.topic_confidence
            - w.respond_tool_relevance_penalty * signals.max_tool_relevance)
            .max(0.0);
        scores.push((Mode::Respond, respond));

        let act = w.act_tool_relevance * signals.max_tool_relevance
            + if signals.intent.needs_tools { w.act_needs_tools_bonus } else { 0.0 }
            + if signals.intent.complexity == Complexity::Complex { w.act_complex_bonus } else { 0.0 };
        scores.push((Mode::Act, act));

        let clarify = w.clarify_low_confidence * (1.0 - signals.topic_confidence)
            + w.clarify_low_warmth * (1.0 - signals.context_warmth)
            + if signals.intent.complexity == Complexity::Complex { w.clarify_complex_bonus } else { 0.0 };
        scores.push((Mode::Clarify, clarify));

        let cold_start = signals.gist_count == 0 && signals.fact_count == 0;
        let acknowledge = w.acknowledge_base
            + if signals.declining_reply_length { w.acknowledge_declining_reply_bonus } else { 0.0 }
            + if cold_start { w.acknowledge_cold_start_bonus } else { 0.0 };
        scores.push((Mode::Acknowledge, acknowledge));

        scores.push((Mode::Ignore, w.ignore_base));

        // Intent override: cancel/self-resolved forces a terminal mode,
        // never ACT (spec §4.6).
        let forced_terminal = signals.intent.is_cancel || signals.intent.is_self_resolved;
        // Anti-oscillation: ACT must not repeat without fresh tool need.
        let act_repeated_without_new_need = previous_mode == Some(Mode::Act) && !signals.intent.needs_tools;

        if forced_terminal || act_repeated_without_new_need {
            scores.retain(|(mode, _)| *mode != Mode::Act);
        }

        let max_score = scores.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let mut within_delta: Vec<(Mode, f32)> =
            scores.iter().filter(|(_, s)| (max_score - s).abs() <= self.tie_break_delta).cloned().collect();

        let tiebreaker_used = within_delta.len() > 1;
        within_delta.sort_by(|a, b| b.0.priority().cmp(&a.0.priority()).then_with(|| a.0.name().cmp(b.0.name())));
        let (mode, score) = within_delta.into_iter().next().unwrap_or((Mode::Ignore, w.ignore_base));

        let rationale = format!(
            "text_len={} mode={} score={score:.3} warmth={:.2} tool_rel={:.2} topic_conf={:.2} forced_terminal={forced_terminal} anti_osc={act_repeated_without_new_need}",
            text.len(),
            mode.name(),
            signals.context_warmth,
            signals.max_tool_relevance,
            signals.topic_confidence,
        );

        RouterDecision { mode, router_confidence: score.clamp(0.0, 1.0), tiebreaker_used, rationale }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_classify::classify_intent;

    fn base_signals(text: &str) -> SignalVector {
        SignalVector {
            working_memory_fill: 0.1,
            gist_count: 0,
            fact_count: 0,
            intent: classify_intent(text),
            max_tool_relevance: 0.0,
            topic_confidence: 0.3,
            context_warmth: 0.1,
            declining_reply_length: false,
        }
    }

    #[test]
    fn router_is_pure() {
        let router = ModeRouter::new(RouterWeights::default(), 0.05);
        let signals = base_signals("Hello");
        let a = router.route(&signals, "Hello", None);
        let b = router.route(&signals, "Hello", None);
        assert_eq!(a.mode, b.mode);
        assert!((a.router_confidence - b.router_confidence).abs() < 1e-6);
    }

    #[test]
    fn cold_start_hello_routes_to_acknowledge() {
        let router = ModeRouter::new(RouterWeights::default(), 0.05);
        let signals = base_signals("Hello");
        let decision = router.route(&signals, "Hello", None);
        assert_eq!(decision.mode, Mode::Acknowledge);
    }

    #[test]
    fn high_tool_relevance_routes_to_act() {
        let router = ModeRouter::new(RouterWeights::default(), 0.05);
        let mut signals = base_signals("please search the web for flights");
        signals.max_tool_relevance = 0.72;
        signals.context_warmth = 0.6;
        signals.gist_count = 3;
        let decision = router.route(&signals, "please search the web for flights", Some(Mode::Respond));
        assert_eq!(decision.mode, Mode::Act);
    }

    #[test]
    fn act_does_not_repeat_without_new_tool_need() {
        let router = ModeRouter::new(RouterWeights::default(), 0.05);
        let mut signals = base_signals("ok thanks");
        signals.max_tool_relevance = 0.8;
        signals.intent.needs_tools = false;
        let decision = router.route(&signals, "ok thanks", Some(Mode::Act));
        assert_ne!(decision.mode, Mode::Act);
    }

    #[test]
    fn cancel_intent_never_routes_to_act() {
        let router = ModeRouter::new(RouterWeights::default(), 0.05);
        let mut signals = base_signals("never mind, cancel that");
        signals.max_tool_relevance = 0.9;
        let decision = router.route(&signals, "never mind, cancel that", None);
        assert_ne!(decision.mode, Mode::Act);
    }
}
