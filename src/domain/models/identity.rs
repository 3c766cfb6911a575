#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;

use std::fmt;

use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Identity of a conversation. Exactly one conversation may be provisional at
/// a time: the one that has not been persisted by the server yet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationId {
    Provisional,
    Durable(u64),
}

impl ConversationId {
    pub fn is_provisional(&self) -> bool {
        return matches!(self, ConversationId::Provisional);
    }

    pub fn durable(&self) -> Option<u64> {
        match self {
            ConversationId::Durable(id) => return Some(*id),
            ConversationId::Provisional => return None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Provisional => return write!(f, "provisional"),
            ConversationId::Durable(id) => return write!(f, "{id}"),
        }
    }
}

/// Identity of a message. Provisional identities are handed out by the ledger
/// and can never collide with a server identity since they live in their own
/// variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Provisional(u64),
    Durable(u64),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        return matches!(self, MessageId::Provisional(_));
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Provisional(id) => return write!(f, "provisional-{id}"),
            MessageId::Durable(id) => return write!(f, "{id}"),
        }
    }
}
