#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use chrono::DateTime;
use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::MessageId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

/// A message as the server reports it. The server does not carry the model
/// routing string, so it is merged back in from what the client knows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub id: u64,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: &str, model_id: &str) -> Message {
        return Message {
            id,
            role,
            content: content.to_string(),
            model_id: model_id.to_string(),
            created_at: Utc::now(),
            streaming: false,
        };
    }

    pub fn from_server(server: ServerMessage, model_id: &str) -> Message {
        return Message {
            id: MessageId::Durable(server.id),
            role: server.role,
            content: server.content,
            model_id: model_id.to_string(),
            created_at: server.created_at.unwrap_or_else(Utc::now),
            streaming: false,
        };
    }

    pub fn append(&mut self, text: &str) {
        self.content += text;
    }
}
