//! The context every registered action's gates read from, beyond the
//! `Thought` itself — the ambient state the Python services reached into
//! Redis/the spark-state service/the DB for. Collecting it in one struct
//! keeps the `Action` trait uniform across all seven actions.

use chrono::{DateTime, Utc};

use crate::engagement::EngagementTracker;
use crate::spark::SparkPhase;

pub struct DriftContext<'a> {
    pub now: DateTime<Utc>,
    pub current_hour: u8,
    pub spark_phase: SparkPhase,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub episode_count: usize,
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
    pub engagement: &'a mut EngagementTracker,
}

#[cfg(test)]
impl<'a> DriftContext<'a> {
    /// A neutral context for gate tests that don't exercise timing/phase
    /// logic directly — permissive defaults (mid-afternoon, connected
    /// phase, recent interaction, one episode on record).
    pub fn test_default(engagement: &'a mut EngagementTracker) -> Self {
        Self {
            now: Utc::now(),
            current_hour: 14,
            spark_phase: SparkPhase::Connected,
            last_interaction_at: Some(Utc::now()),
            episode_count: 1,
            quiet_hours_start: 23,
            quiet_hours_end: 8,
            engagement,
        }
    }
}
