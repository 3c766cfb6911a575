use super::Message;

/// Notifications the conversation store pushes out to whoever renders it.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// One increment of assistant content, already applied to the message.
    AssistantChunk(String),
    /// The assistant message reached its final, non-streaming form.
    AssistantCompleted(Message),
    /// A failed high-level operation. Emitted once per failure.
    Notification(String),
}
