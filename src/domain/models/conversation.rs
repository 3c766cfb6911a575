use chrono::DateTime;
use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ConversationId;

pub const PROVISIONAL_TITLE: &str = "New conversation";
const TITLE_MAX_CHARS: usize = 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn provisional() -> Conversation {
        return Conversation {
            id: ConversationId::Provisional,
            title: PROVISIONAL_TITLE.to_string(),
            created_at: Utc::now(),
        };
    }

    /// Derives a conversation title from the first user message, cutting it at
    /// 20 characters with a trailing ellipsis.
    pub fn title_from(content: &str) -> String {
        let trimmed = content.trim();
        if trimmed.chars().count() <= TITLE_MAX_CHARS {
            return trimmed.to_string();
        }

        let head = trimmed.chars().take(TITLE_MAX_CHARS).collect::<String>();
        return format!("{head}...");
    }
}
