//! Spark-phase relationship state machine (SPEC_FULL.md §11 supplement):
//! tracks first-contact rapport building through five phases, gating
//! NURTURE/SUGGEST eligibility on how far the relationship has progressed.
//! Grounded on `spark_state_service.py`'s `_PHASE_ORDER`/`_TRANSITIONS` table.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SparkPhase {
    FirstContact,
    Surface,
    Exploratory,
    Connected,
    Graduated,
}

impl SparkPhase {
    fn next(self) -> Option<Self> {
        match self {
            SparkPhase::FirstContact => Some(SparkPhase::Surface),
            SparkPhase::Surface => Some(SparkPhase::Exploratory),
            SparkPhase::Exploratory => Some(SparkPhase::Connected),
            SparkPhase::Connected => Some(SparkPhase::Graduated),
            SparkPhase::Graduated => None,
        }
    }
}

struct TransitionRule {
    requires_welcome: bool,
    min_exchanges: Option<u32>,
    effective_threshold: Option<f32>,
    hold_required: u32,
    min_traits: Option<u32>,
}

fn rule_for(from: SparkPhase) -> Option<TransitionRule> {
    match from {
        SparkPhase::FirstContact => Some(TransitionRule { requires_welcome: true, min_exchanges: Some(1), effective_threshold: None, hold_required: 0, min_traits: None }),
        SparkPhase::Surface => Some(TransitionRule { requires_welcome: false, min_exchanges: None, effective_threshold: Some(4.0), hold_required: 2, min_traits: None }),
        SparkPhase::Exploratory => Some(TransitionRule { requires_welcome: false, min_exchanges: None, effective_threshold: Some(12.0), hold_required: 3, min_traits: Some(3) }),
        SparkPhase::Connected => Some(TransitionRule { requires_welcome: false, min_exchanges: None, effective_threshold: Some(25.0), hold_required: 5, min_traits: Some(5) }),
        SparkPhase::Graduated => None,
    }
}

#[derive(Debug, Clone)]
pub struct SparkState {
    pub phase: SparkPhase,
    welcome_sent: bool,
    exchange_count: u32,
    effective_exchanges: f32,
    traits_learned: u32,
    phase_hold_count: u32,
    pub phase_entered_at: DateTime<Utc>,
}

impl Default for SparkState {
    fn default() -> Self {
        Self::new()
    }
}

impl SparkState {
    pub fn new() -> Self {
        Self {
            phase: SparkPhase::FirstContact,
            welcome_sent: false,
            exchange_count: 0,
            effective_exchanges: 0.0,
            traits_learned: 0,
            phase_hold_count: 0,
            phase_entered_at: Utc::now(),
        }
    }

    pub fn record_welcome(&mut self) {
        self.welcome_sent = true;
    }

    /// `weight` lets spammy back-to-back messages count for less than a
    /// single well-spaced exchange (the original's anti-spam rate limit).
    pub fn record_exchange(&mut self, weight: f32) {
        self.exchange_count += 1;
        self.effective_exchanges += weight;
    }

    pub fn record_trait_learned(&mut self) {
        self.traits_learned += 1;
    }

    pub fn is_graduated(&self) -> bool {
        self.phase == SparkPhase::Graduated
    }

    /// Evaluates the current phase's transition rule; on qualifying hold
    /// being met, advances the phase and returns `(old, new)`.
    pub fn check_transition(&mut self, now: DateTime<Utc>) -> Option<(SparkPhase, SparkPhase)> {
        if self.phase == SparkPhase::Graduated {
            return None;
        }
        let next = self.phase.next()?;
        let rule = rule_for(self.phase)?;

        let mut qualifies = true;
        if rule.requires_welcome && !self.welcome_sent {
            qualifies = false;
        }
        if let Some(min) = rule.min_exchanges {
            if self.exchange_count < min {
                qualifies = false;
            }
        }
        if let Some(threshold) = rule.effective_threshold {
            if self.effective_exchanges < threshold {
                qualifies = false;
            }
        }
        if let Some(min_traits) = rule.min_traits {
            if self.traits_learned < min_traits {
                qualifies = false;
            }
        }

        if !qualifies {
            self.phase_hold_count = 0;
            return None;
        }

        self.phase_hold_count += 1;
        if self.phase_hold_count >= rule.hold_required {
            let old = self.phase;
            self.phase = next;
            self.phase_entered_at = now;
            self.phase_hold_count = 0;
            Some((old, next))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_contact_requires_welcome_and_one_exchange() {
        let mut state = SparkState::new();
        assert!(state.check_transition(Utc::now()).is_none());
        state.record_exchange(1.0);
        assert!(state.check_transition(Utc::now()).is_none(), "welcome not sent yet");
        state.record_welcome();
        let transition = state.check_transition(Utc::now());
        assert_eq!(transition, Some((SparkPhase::FirstContact, SparkPhase::Surface)));
    }

    #[test]
    fn surface_to_exploratory_needs_hysteresis_hold() {
        let mut state = SparkState::new();
        state.phase = SparkPhase::Surface;
        state.record_exchange(5.0);
        assert!(state.check_transition(Utc::now()).is_none(), "first qualifying tick only increments hold");
        let transition = state.check_transition(Utc::now());
        assert_eq!(transition, Some((SparkPhase::Surface, SparkPhase::Exploratory)));
    }

    #[test]
    fn exploratory_to_connected_requires_min_traits() {
        let mut state = SparkState::new();
        state.phase = SparkPhase::Exploratory;
        state.record_exchange(13.0);
        state.check_transition(Utc::now());
        state.check_transition(Utc::now());
        assert!(state.check_transition(Utc::now()).is_none(), "not enough traits learned yet");
        state.record_trait_learned();
        state.record_trait_learned();
        state.record_trait_learned();
        state.check_transition(Utc::now());
        state.check_transition(Utc::now());
        assert!(state.check_transition(Utc::now()).is_some());
    }

    #[test]
    fn graduated_phase_never_transitions_further() {
        let mut state = SparkState::new();
        state.phase = SparkPhase::Graduated;
        assert!(state.check_transition(Utc::now()).is_none());
    }
}
