#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;

use std::collections::HashSet;

use crate::domain::models::Message;
use crate::domain::models::MessageId;
use crate::domain::models::Role;

/// Owns the active conversation's message sequence along with the provisional
/// identities handed out for optimistic messages.
///
/// Resolution swaps a provisional message for its confirmed counterpart at the
/// same index. Once resolved, a provisional identity can no longer be
/// discarded, even if the confirmed message kept that identity.
#[derive(Default)]
pub struct Ledger {
    messages: Vec<Message>,
    next_provisional: u64,
    resolved: HashSet<MessageId>,
}

impl Ledger {
    pub fn messages(&self) -> &[Message] {
        return &self.messages;
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        return self.messages.iter().find(|msg| return msg.id == id);
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        return self.messages.iter().position(|msg| return msg.id == id);
    }

    /// Builds a message under a fresh provisional identity. Assistant messages
    /// start out streaming. The message is not appended.
    pub fn create_provisional(&mut self, role: Role, content: &str, model_id: &str) -> Message {
        self.next_provisional += 1;

        let mut message = Message::new(
            MessageId::Provisional(self.next_provisional),
            role,
            content,
            model_id,
        );
        message.streaming = role == Role::Assistant;

        return message;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn resolve(&mut self, provisional_id: MessageId, final_message: Message) -> bool {
        if !provisional_id.is_provisional() || self.resolved.contains(&provisional_id) {
            tracing::warn!(id = %provisional_id, "Refusing to resolve a non provisional message");
            return false;
        }

        let Some(idx) = self.position(provisional_id) else {
            tracing::warn!(id = %provisional_id, "Provisional message not found, skipping resolve");
            return false;
        };

        tracing::debug!(from = %provisional_id, to = %final_message.id, "Resolved message");
        self.messages[idx] = final_message;
        self.resolved.insert(provisional_id);

        return true;
    }

    /// Removes a message that is still provisional. Durable and already
    /// resolved identities are left untouched.
    pub fn discard(&mut self, id: MessageId) -> bool {
        if !id.is_provisional() || self.resolved.contains(&id) {
            return false;
        }

        let Some(idx) = self.position(id) else {
            return false;
        };

        self.messages.remove(idx);
        tracing::debug!(id = %id, "Discarded provisional message");

        return true;
    }

    pub fn append_content(&mut self, id: MessageId, text: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };

        let mut updated = self.messages[idx].clone();
        updated.append(text);
        self.messages[idx] = updated;

        return true;
    }

    pub fn snapshot(&self) -> Vec<Message> {
        return self.messages.clone();
    }

    pub fn restore(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Swaps the sequence for messages loaded from the server. Provisional
    /// bookkeeping from earlier conversations is dropped along with them.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.resolved.clear();
    }

    pub fn clear(&mut self) {
        self.replace_all(vec![]);
    }
}
