//! C9 — identity vectors: six personality dimensions with baseline,
//! activation, inertia, and stability-gated drift (spec §3 "Identity
//! vector", §4.9, §11 voice mapper supplement).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SIGNAL_HISTORY_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityDimension {
    Curiosity,
    Assertiveness,
    Warmth,
    Playfulness,
    Skepticism,
    EmotionalIntensity,
}

impl IdentityDimension {
    pub const ALL: [IdentityDimension; 6] = [
        IdentityDimension::Curiosity,
        IdentityDimension::Assertiveness,
        IdentityDimension::Warmth,
        IdentityDimension::Playfulness,
        IdentityDimension::Skepticism,
        IdentityDimension::EmotionalIntensity,
    ];

    fn voice_high(self) -> &'static str {
        match self {
            IdentityDimension::Curiosity => "I'm genuinely curious where this goes.",
            IdentityDimension::Assertiveness => "I'll say plainly what I think here.",
            IdentityDimension::Warmth => "I care about how this lands for you.",
            IdentityDimension::Playfulness => "I'm in a playful mood about this.",
            IdentityDimension::Skepticism => "I want to push on this a bit before we settle.",
            IdentityDimension::EmotionalIntensity => "This one actually moves something in me.",
        }
    }

    fn voice_low(self) -> &'static str {
        match self {
            IdentityDimension::Curiosity => "I'll keep this practical rather than go exploring.",
            IdentityDimension::Assertiveness => "I'll lay out the options instead of pushing one.",
            IdentityDimension::Warmth => "I'll keep this businesslike.",
            IdentityDimension::Playfulness => "I'll keep this straightforward, no jokes.",
            IdentityDimension::Skepticism => "I'll take this mostly at face value.",
            IdentityDimension::EmotionalIntensity => "I'll stay even about this.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityVector {
    pub baseline: f32,
    pub activation: f32,
    pub plasticity_rate: f32,
    pub inertia_rate: f32,
    pub min_cap: f32,
    pub max_cap: f32,
    pub signal_history: VecDeque<f32>,
    pub reinforcement_count: u32,
    pub drift_today: f32,
    pub drift_window_start: DateTime<Utc>,
}

impl IdentityVector {
    pub fn new(baseline: f32, plasticity_rate: f32, inertia_rate: f32, min_cap: f32, max_cap: f32) -> Self {
        Self {
            baseline,
            activation: baseline,
            plasticity_rate,
            inertia_rate,
            min_cap,
            max_cap,
            signal_history: VecDeque::with_capacity(SIGNAL_HISTORY_SIZE),
            reinforcement_count: 0,
            drift_today: 0.0,
            drift_window_start: Utc::now(),
        }
    }

    /// Dual-channel reinforcement: `total = 0.6*emotion + 0.4*reward`,
    /// clamps activation, appends to the bounded signal history.
    pub fn reinforce(&mut self, emotion_signal: f32, reward_signal: f32) {
        let total = 0.6 * emotion_signal + 0.4 * reward_signal;
        let delta = total * self.plasticity_rate;
        self.activation = (self.activation + delta).clamp(self.min_cap, self.max_cap);
        if self.signal_history.len() >= SIGNAL_HISTORY_SIZE {
            self.signal_history.pop_front();
        }
        self.signal_history.push_back(total);
        self.reinforcement_count += 1;
    }

    /// Pulls activation toward baseline every decay cycle.
    pub fn apply_inertia(&mut self) {
        let delta = (self.baseline - self.activation) * self.inertia_rate;
        self.activation = (self.activation + delta).clamp(self.min_cap, self.max_cap);
    }

    /// Stability-gated baseline drift (spec §4.9). All four gates must
    /// pass; on success the signal history and reinforcement count reset
    /// and `drift_today` accumulates.
    pub fn maybe_drift(&mut self, now: DateTime<Utc>, drift_rate: f32, reinforcement_threshold: u32, direction_consistency_min: f32, variance_max: f32, max_drift_per_day: f32) -> bool {
        if now - self.drift_window_start > chrono::Duration::hours(24) {
            self.drift_today = 0.0;
            self.drift_window_start = now;
        }

        if self.reinforcement_count < reinforcement_threshold || self.signal_history.len() < SIGNAL_HISTORY_SIZE as usize {
            return false;
        }

        let positive = self.signal_history.iter().filter(|&&s| s > 0.0).count();
        let negative = self.signal_history.iter().filter(|&&s| s < 0.0).count();
        let dominant = positive.max(negative) as f32 / self.signal_history.len() as f32;
        if dominant <= direction_consistency_min {
            return false;
        }

        let mean = self.signal_history.iter().sum::<f32>() / self.signal_history.len() as f32;
        let variance = self.signal_history.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / self.signal_history.len() as f32;
        if variance >= variance_max {
            return false;
        }

        if self.drift_today >= max_drift_per_day {
            return false;
        }

        let direction = if positive >= negative { 1.0 } else { -1.0 };
        let mut step = drift_rate;
        if self.drift_today + step > max_drift_per_day {
            step = max_drift_per_day - self.drift_today;
        }
        self.baseline = (self.baseline + direction * step).clamp(self.min_cap, self.max_cap);
        self.drift_today += step;
        self.signal_history.clear();
        self.reinforcement_count = 0;
        true
    }
}

/// All six personality dimensions plus the relational coherence checks and
/// voice mapper (spec §4.9, §11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityVectors {
    pub curiosity: IdentityVector,
    pub assertiveness: IdentityVector,
    pub warmth: IdentityVector,
    pub playfulness: IdentityVector,
    pub skepticism: IdentityVector,
    pub emotional_intensity: IdentityVector,
}

impl Default for IdentityVectors {
    fn default() -> Self {
        let make = || IdentityVector::new(0.5, 0.05, 0.1, 0.0, 1.0);
        Self {
            curiosity: make(),
            assertiveness: make(),
            warmth: make(),
            playfulness: make(),
            skepticism: make(),
            emotional_intensity: make(),
        }
    }
}

impl IdentityVectors {
    pub fn get(&self, dim: IdentityDimension) -> &IdentityVector {
        match dim {
            IdentityDimension::Curiosity => &self.curiosity,
            IdentityDimension::Assertiveness => &self.assertiveness,
            IdentityDimension::Warmth => &self.warmth,
            IdentityDimension::Playfulness => &self.playfulness,
            IdentityDimension::Skepticism => &self.skepticism,
            IdentityDimension::EmotionalIntensity => &self.emotional_intensity,
        }
    }

    pub fn get_mut(&mut self, dim: IdentityDimension) -> &mut IdentityVector {
        match dim {
            IdentityDimension::Curiosity => &mut self.curiosity,
            IdentityDimension::Assertiveness => &mut self.assertiveness,
            IdentityDimension::Warmth => &mut self.warmth,
            IdentityDimension::Playfulness => &mut self.playfulness,
            IdentityDimension::Skepticism => &mut self.skepticism,
            IdentityDimension::EmotionalIntensity => &mut self.emotional_intensity,
        }
    }

    pub fn apply_inertia_all(&mut self) {
        for dim in IdentityDimension::ALL {
            self.get_mut(dim).apply_inertia();
        }
    }

    /// Two-level coherence check (spec §4.9). Level 1 is already enforced
    /// by every mutator's clamp; level 2 applies the pinned relational
    /// constraints. Coherence adjustments never touch signal history,
    /// reinforcement count, or drift, by construction (direct field writes).
    pub fn apply_coherence(&mut self) {
        for dim in IdentityDimension::ALL {
            let v = self.get_mut(dim);
            v.activation = v.activation.clamp(v.min_cap, v.max_cap);
        }

        if self.assertiveness.activation > 0.75 && self.warmth.activation < 0.35 {
            self.warmth.activation = (self.warmth.activation + 0.05).min(self.warmth.max_cap);
        }
        if self.skepticism.activation > 0.75 && self.warmth.activation < 0.35 {
            self.warmth.activation = (self.warmth.activation + 0.05).min(self.warmth.max_cap);
        }
        if self.assertiveness.activation > 0.75 && self.skepticism.activation > 0.75 {
            self.assertiveness.activation += (0.7 - self.assertiveness.activation) * 0.5;
            self.skepticism.activation += (0.7 - self.skepticism.activation) * 0.5;
        }
    }

    /// Up to three most-salient dimensions (by `|activation - 0.5|`)
    /// exceeding `high_threshold` or below `low_threshold`, one templated
    /// sentence each, for the next LLM prompt's identity block.
    pub fn voice_lines(&self, high_threshold: f32, low_threshold: f32) -> Vec<String> {
        let mut scored: Vec<(IdentityDimension, f32, bool)> = IdentityDimension::ALL
            .into_iter()
            .filter_map(|dim| {
                let activation = self.get(dim).activation;
                if activation >= high_threshold {
                    Some((dim, (activation - 0.5).abs(), true))
                } else if activation <= low_threshold {
                    Some((dim, (activation - 0.5).abs(), false))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(3)
            .map(|(dim, _, high)| if high { dim.voice_high().to_string() } else { dim.voice_low().to_string() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_stays_within_caps() {
        let mut v = IdentityVector::new(0.5, 1.0, 0.1, 0.0, 1.0);
        for _ in 0..100 {
            v.reinforce(1.0, 1.0);
        }
        assert!(v.activation <= 1.0 && v.activation >= 0.0);
    }

    #[test]
    fn coherence_does_not_touch_reinforcement_bookkeeping() {
        let mut id = IdentityVectors::default();
        id.assertiveness.activation = 0.9;
        id.warmth.activation = 0.2;
        id.warmth.reinforcement_count = 3;
        let history_before = id.warmth.signal_history.clone();
        id.apply_coherence();
        assert!(id.warmth.activation > 0.2);
        assert_eq!(id.warmth.reinforcement_count, 3);
        assert_eq!(id.warmth.signal_history, history_before);
    }

    #[test]
    fn voice_lines_selects_at_most_three() {
        let mut id = IdentityVectors::default();
        id.curiosity.activation = 0.95;
        id.assertiveness.activation = 0.9;
        id.warmth.activation = 0.05;
        id.playfulness.activation = 0.92;
        id.skepticism.activation = 0.5;
        id.emotional_intensity.activation = 0.5;
        let lines = id.voice_lines(0.8, 0.2);
        assert!(lines.len() <= 3);
    }

    #[test]
    fn drift_requires_all_four_gates() {
        let mut v = IdentityVector::new(0.5, 0.05, 0.1, 0.0, 1.0);
        // Not enough reinforcement yet.
        assert!(!v.maybe_drift(Utc::now(), 0.005, 10, 0.7, 0.15, 0.02));
        for _ in 0..20 {
            v.reinforce(0.5, 0.5);
        }
        assert!(v.maybe_drift(Utc::now(), 0.005, 10, 0.7, 0.15, 0.02));
        assert_eq!(v.reinforcement_count, 0, "drift resets reinforcement bookkeeping");
    }
}
