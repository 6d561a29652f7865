use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Text,
    Voice,
}

impl Default for MessageSource {
    fn default() -> Self {
        Self::Text
    }
}

/// Inbound message contract from the transport layer (spec §6). The core
/// never parses HTTP itself — this struct is the one boundary type an
/// HTTP/SSE adapter is expected to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(default)]
    pub source: MessageSource,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    pub request_id: Uuid,
}

impl ChatRequest {
    /// Validates the one hard rule the contract states: non-empty after trim.
    pub fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("text must be non-empty after trim".to_string());
        }
        Ok(())
    }
}
