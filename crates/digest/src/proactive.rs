//! Phase A proactive-delivery correlation seam (spec §4.4, §4.11): when a
//! user message arrives while a COMMUNICATE candidate is pending reply,
//! something needs to score the engagement and clear the pending marker.
//! That bookkeeping belongs to the autonomous drift engine's engagement
//! tracker; this trait is the seam the runtime wires a real
//! implementation into. [`NullProactiveFeedback`] is the no-drift default.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProactiveCorrelationOutcome {
    NoPendingMessage,
    Engaged,
    Acknowledged,
    Dismissed,
}

pub trait ProactiveFeedback: Send + Sync {
    /// Called once per inbound user message, before classification, so a
    /// pending COMMUNICATE delivery is scored against the reply that
    /// actually arrived (spec §4.11 "Engagement feedback").
    fn correlate(&self, topic: &str, user_text: &str) -> ProactiveCorrelationOutcome;
}

pub struct NullProactiveFeedback;

impl ProactiveFeedback for NullProactiveFeedback {
    fn correlate(&self, _topic: &str, _user_text: &str) -> ProactiveCorrelationOutcome {
        ProactiveCorrelationOutcome::NoPendingMessage
    }
}
