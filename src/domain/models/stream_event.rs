use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ServerMessage;

/// A decoded frame from the message stream, discriminated by its `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    UserMessage {
        message: ServerMessage,
    },
    StreamStart {
        #[serde(default)]
        model: Option<String>,
    },
    StreamChunk {
        text: String,
    },
    StreamEnd {
        #[serde(default)]
        message_id: Option<u64>,
        full_text: String,
    },
    Error {
        error: String,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::UserMessage { .. } => return "user_message",
            StreamEvent::StreamStart { .. } => return "stream_start",
            StreamEvent::StreamChunk { .. } => return "stream_chunk",
            StreamEvent::StreamEnd { .. } => return "stream_end",
            StreamEvent::Error { .. } => return "error",
            StreamEvent::Unknown => return "unknown",
        }
    }
}
