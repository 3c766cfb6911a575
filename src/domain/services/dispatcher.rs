#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;

use super::Ledger;
use crate::domain::models::Message;
use crate::domain::models::MessageId;
use crate::domain::models::StreamEvent;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sent,
    Streaming,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        return matches!(self, SessionState::Completed | SessionState::Failed);
    }
}

/// Correlation context for one outstanding send.
pub struct StreamSession {
    pub conversation_id: u64,
    pub model_id: String,
    pub accumulated_text: String,
    pub state: SessionState,
    user_message: Message,
    provisional_user_id: MessageId,
    provisional_assistant_id: MessageId,
}

impl StreamSession {
    pub fn new(conversation_id: u64, user_message: &Message, assistant_message: &Message) -> StreamSession {
        return StreamSession {
            conversation_id,
            model_id: user_message.model_id.to_string(),
            accumulated_text: "".to_string(),
            state: SessionState::Idle,
            user_message: user_message.clone(),
            provisional_user_id: user_message.id,
            provisional_assistant_id: assistant_message.id,
        };
    }

    pub fn user_message_id(&self) -> MessageId {
        return self.user_message.id;
    }

    pub fn assistant_message_id(&self) -> MessageId {
        return self.provisional_assistant_id;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub user_message: Message,
    pub bot_message: Message,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Continue,
    Appended(String),
    Completed(Exchange),
    Failed(String),
}

/// Applies decoded stream events to the ledger on behalf of a single session.
pub struct EventDispatcher {
    session: StreamSession,
}

impl EventDispatcher {
    pub fn new(session: StreamSession) -> EventDispatcher {
        return EventDispatcher { session };
    }

    pub fn session(&self) -> &StreamSession {
        return &self.session;
    }

    /// Called once the optimistic messages are in place and the request is
    /// about to go out.
    pub fn mark_sent(&mut self) {
        if self.session.state == SessionState::Idle {
            self.session.state = SessionState::Sent;
        }
    }

    pub fn dispatch(&mut self, event: StreamEvent, ledger: &mut Ledger) -> Transition {
        if self.session.state.is_terminal() {
            tracing::debug!(
                event = event.name(),
                conversation_id = self.session.conversation_id,
                "Dropping event for finished stream"
            );
            return Transition::Continue;
        }

        match event {
            StreamEvent::UserMessage { message } => {
                let confirmed = Message::from_server(message, &self.session.model_id);
                if ledger.resolve(self.session.provisional_user_id, confirmed.clone()) {
                    self.session.user_message = confirmed;
                } else {
                    tracing::warn!(
                        id = %self.session.provisional_user_id,
                        "Optimistic user message is gone, ignoring confirmation"
                    );
                }

                return Transition::Continue;
            }
            StreamEvent::StreamStart { model } => {
                tracing::debug!(model = ?model, "Assistant stream started");
                self.session.state = SessionState::Streaming;
                return Transition::Continue;
            }
            StreamEvent::StreamChunk { text } => {
                if text.is_empty() {
                    return Transition::Continue;
                }
                self.session.state = SessionState::Streaming;

                if !ledger.append_content(self.session.provisional_assistant_id, &text) {
                    tracing::warn!(
                        id = %self.session.provisional_assistant_id,
                        "Chunk references an unknown assistant message, dropping"
                    );
                    return Transition::Continue;
                }

                self.session.accumulated_text += &text;
                return Transition::Appended(text);
            }
            StreamEvent::StreamEnd {
                message_id,
                full_text,
            } => {
                return self.complete(message_id, full_text, ledger);
            }
            StreamEvent::Error { error } => {
                tracing::error!(error = %error, "Stream reported an error");
                return self.fail(&error, ledger);
            }
            StreamEvent::Unknown => {
                tracing::debug!("Ignoring unknown stream event");
                return Transition::Continue;
            }
        }
    }

    fn complete(&mut self, message_id: Option<u64>, full_text: String, ledger: &mut Ledger) -> Transition {
        let assistant_id = self.session.provisional_assistant_id;
        let Some(current) = ledger.get(assistant_id) else {
            tracing::warn!(id = %assistant_id, "Stream ended for an assistant message that is gone");
            return self.fail("assistant message is no longer available", ledger);
        };

        if full_text != self.session.accumulated_text {
            tracing::debug!(
                accumulated = self.session.accumulated_text.len(),
                full = full_text.len(),
                "Replacing accumulated text with final text"
            );
        }

        let mut bot_message = current.clone();
        bot_message.content = full_text;
        bot_message.streaming = false;
        match message_id {
            Some(id) => bot_message.id = MessageId::Durable(id),
            None => {
                tracing::warn!(id = %assistant_id, "Stream ended without a message id, keeping provisional id");
            }
        }

        ledger.resolve(assistant_id, bot_message.clone());
        self.session.state = SessionState::Completed;

        return Transition::Completed(Exchange {
            user_message: self.session.user_message.clone(),
            bot_message,
        });
    }

    /// Terminal failure. Rolls back whichever of the session's messages are
    /// still provisional.
    pub fn fail(&mut self, reason: &str, ledger: &mut Ledger) -> Transition {
        if self.session.state.is_terminal() {
            return Transition::Continue;
        }

        ledger.discard(self.session.provisional_user_id);
        ledger.discard(self.session.provisional_assistant_id);
        self.session.state = SessionState::Failed;

        return Transition::Failed(reason.to_string());
    }
}
