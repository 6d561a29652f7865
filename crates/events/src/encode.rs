use cortex_core::{ExchangeId, ThreadId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The memory write trigger (spec §4.2): emitted twice per exchange, once
/// with an empty `response_message` (user half) and once with an empty
/// `prompt_message` (assistant half) — see `cortex-digest`'s phase A/D.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeEvent {
    pub topic: String,
    pub exchange_id: ExchangeId,
    pub thread_id: ThreadId,
    pub prompt_message: String,
    pub response_message: String,
    pub metadata: serde_json::Value,
}

impl EncodeEvent {
    pub fn user_half(
        topic: impl Into<String>,
        exchange_id: Uuid,
        thread_id: Uuid,
        prompt_message: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            exchange_id,
            thread_id,
            prompt_message: prompt_message.into(),
            response_message: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn assistant_half(
        topic: impl Into<String>,
        exchange_id: Uuid,
        thread_id: Uuid,
        response_message: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            exchange_id,
            thread_id,
            prompt_message: String::new(),
            response_message: response_message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Which half this event carries — the chunker writes one
    /// `memory_chunk` row and drops the second half if it would overwrite.
    pub fn is_user_half(&self) -> bool {
        !self.prompt_message.is_empty()
    }
}
