use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A frame on the drift-stream background channel (spec §6: "Outbound
/// contract to background channels"), consumed by the catch-up buffer and
/// any subscribed delivery surface (notification-tool dispatch, web push).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundFrameType {
    Drift,
    ToolFollowup,
    Reminder,
    Task,
    Card,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: OutboundFrameType,
    pub output_id: uuid::Uuid,
    pub topic: String,
    pub content: String,
    pub mode: Option<String>,
    pub confidence: Option<f32>,
    pub generated_at: DateTime<Utc>,
}

impl OutboundFrame {
    pub fn new(frame_type: OutboundFrameType, topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            frame_type,
            output_id: uuid::Uuid::new_v4(),
            topic: topic.into(),
            content: content.into(),
            mode: None,
            confidence: None,
            generated_at: Utc::now(),
        }
    }
}
