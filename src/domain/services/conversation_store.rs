#[cfg(test)]
#[path = "conversation_store_test.rs"]
mod tests;

use anyhow::Error;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frame_parser;
use super::EventDispatcher;
use super::Exchange;
use super::FrameBuffer;
use super::Ledger;
use super::StreamSession;
use super::Transition;
use crate::domain::models::ByteStream;
use crate::domain::models::Conversation;
use crate::domain::models::ConversationApiBox;
use crate::domain::models::ConversationId;
use crate::domain::models::Event;
use crate::domain::models::Message;
use crate::domain::models::MessageRequest;
use crate::domain::models::Role;
use crate::domain::models::StreamTransportBox;

const ABORTED: &str = "stream aborted";
const CLOSED_EARLY: &str = "stream closed before completion";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create conversation: {0}")]
    ConversationCreate(String),
    #[error("{0}")]
    Stream(String),
    #[error("{0}")]
    Request(String),
}

/// The conversation list, the active conversation and its messages. One store
/// is built per signed in session and dropped on logout.
///
/// Only one send may be in flight per conversation. `is_sending` is the
/// signal callers check before sending again; the store does not lock.
pub struct ConversationStore {
    api: ConversationApiBox,
    transport: StreamTransportBox,
    tx: mpsc::UnboundedSender<Event>,
    conversations: Vec<Conversation>,
    provisional: Option<Conversation>,
    active: Option<ConversationId>,
    ledger: Ledger,
    loading_list: bool,
    sending_message: bool,
}

impl ConversationStore {
    pub fn new(
        api: ConversationApiBox,
        transport: StreamTransportBox,
        tx: mpsc::UnboundedSender<Event>,
    ) -> ConversationStore {
        return ConversationStore {
            api,
            transport,
            tx,
            conversations: vec![],
            provisional: None,
            active: None,
            ledger: Ledger::default(),
            loading_list: false,
            sending_message: false,
        };
    }

    pub fn conversations(&self) -> &[Conversation] {
        return &self.conversations;
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        return self.active;
    }

    pub fn messages(&self) -> &[Message] {
        return self.ledger.messages();
    }

    /// True while any request/response call is in flight.
    pub fn is_loading(&self) -> bool {
        return self.loading_list;
    }

    pub fn is_sending(&self) -> bool {
        return self.sending_message;
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        return match self.active {
            Some(ConversationId::Provisional) => self.provisional.as_ref(),
            Some(id) => self.conversations.iter().find(|conversation| {
                return conversation.id == id;
            }),
            None => None,
        };
    }

    /// Starts a local only conversation that is persisted on first send.
    pub fn start_conversation(&mut self) -> Conversation {
        let conversation = Conversation::provisional();
        self.provisional = Some(conversation.clone());
        self.active = Some(ConversationId::Provisional);
        self.ledger.clear();

        return conversation;
    }

    pub async fn send_message(
        &mut self,
        content: &str,
        model_id: &str,
    ) -> Result<Option<Exchange>, StoreError> {
        return self
            .send_message_with_abort(content, model_id, CancellationToken::new())
            .await;
    }

    /// Sends a user message and streams the assistant reply into the active
    /// conversation. Blank content is ignored. Cancelling `abort` rolls the
    /// send back the same way a stream error does.
    pub async fn send_message_with_abort(
        &mut self,
        content: &str,
        model_id: &str,
        abort: CancellationToken,
    ) -> Result<Option<Exchange>, StoreError> {
        if content.trim().is_empty() {
            tracing::debug!("Ignoring blank message");
            return Ok(None);
        }

        self.sending_message = true;
        let res = self.run_send(content, model_id, abort).await;
        self.sending_message = false;

        if let Err(err) = &res {
            self.emit(Event::Notification(err.to_string()));
        }

        return res.map(Some);
    }

    async fn run_send(
        &mut self,
        content: &str,
        model_id: &str,
        abort: CancellationToken,
    ) -> Result<Exchange, StoreError> {
        let started = self.active.is_none();
        if started {
            self.start_conversation();
        }

        let user = self.ledger.create_provisional(Role::User, content, model_id);
        let assistant = self
            .ledger
            .create_provisional(Role::Assistant, "", model_id);
        self.ledger.push(user.clone());
        self.ledger.push(assistant.clone());

        let conversation_id = match self.active.and_then(|id| return id.durable()) {
            Some(id) => id,
            None => match self.promote_provisional(content).await {
                Ok(id) => id,
                Err(err) => {
                    self.ledger.discard(user.id);
                    self.ledger.discard(assistant.id);
                    if started {
                        self.provisional = None;
                        self.active = None;
                    }
                    return Err(err);
                }
            },
        };

        let mut dispatcher =
            EventDispatcher::new(StreamSession::new(conversation_id, &user, &assistant));
        dispatcher.mark_sent();

        let request = MessageRequest {
            content: content.to_string(),
            model_id: model_id.to_string(),
        };
        let stream = match self.transport.open_stream(conversation_id, request).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = ?err, conversation_id, "Failed to open message stream");
                return Err(self.rollback(&mut dispatcher, err));
            }
        };

        return self.consume(stream, &mut dispatcher, abort).await;
    }

    /// Persists the provisional conversation, then restores the optimistic
    /// messages that were appended to it.
    async fn promote_provisional(&mut self, content: &str) -> Result<u64, StoreError> {
        let snapshot = self.ledger.snapshot();
        let title = Conversation::title_from(content);

        let res = self.api.create(&title).await;
        let conversation = match res {
            Ok(conversation) => conversation,
            Err(err) => {
                tracing::error!(error = ?err, title = %title, "Failed to create conversation");
                return Err(StoreError::ConversationCreate(err.to_string()));
            }
        };

        let Some(id) = conversation.id.durable() else {
            return Err(StoreError::ConversationCreate(
                "server returned a conversation without an id".to_string(),
            ));
        };

        self.adopt(conversation);
        self.ledger.restore(snapshot);

        return Ok(id);
    }

    async fn consume(
        &mut self,
        mut stream: ByteStream,
        dispatcher: &mut EventDispatcher,
        abort: CancellationToken,
    ) -> Result<Exchange, StoreError> {
        let mut buffer = FrameBuffer::default();

        loop {
            let next = tokio::select! {
                _ = abort.cancelled() => {
                    tracing::warn!(conversation_id = dispatcher.session().conversation_id, "Message stream aborted");
                    return Err(self.rollback(dispatcher, Error::msg(ABORTED)));
                }
                next = stream.next() => next,
            };

            let lines = match next {
                Some(Ok(chunk)) => buffer.feed(chunk),
                Some(Err(err)) => {
                    tracing::error!(error = ?err, "Failed to read message stream");
                    return Err(self.rollback(dispatcher, err));
                }
                None => break,
            };

            for line in lines {
                if let Some(res) = self.apply_line(dispatcher, &line) {
                    return res;
                }
            }
        }

        if let Some(line) = buffer.flush() {
            if let Some(res) = self.apply_line(dispatcher, &line) {
                return res;
            }
        }

        tracing::error!(
            conversation_id = dispatcher.session().conversation_id,
            "Message stream closed without a terminal event"
        );
        return Err(self.rollback(dispatcher, Error::msg(CLOSED_EARLY)));
    }

    fn apply_line(
        &mut self,
        dispatcher: &mut EventDispatcher,
        line: &str,
    ) -> Option<Result<Exchange, StoreError>> {
        let event = frame_parser::parse_event(line)?;
        tracing::debug!(event = event.name(), "Stream event");

        match dispatcher.dispatch(event, &mut self.ledger) {
            Transition::Continue => return None,
            Transition::Appended(text) => {
                self.emit(Event::AssistantChunk(text));
                return None;
            }
            Transition::Completed(exchange) => {
                self.emit(Event::AssistantCompleted(exchange.bot_message.clone()));
                return Some(Ok(exchange));
            }
            Transition::Failed(reason) => return Some(Err(StoreError::Stream(reason))),
        }
    }

    fn rollback(&mut self, dispatcher: &mut EventDispatcher, err: Error) -> StoreError {
        let reason = err.to_string();
        dispatcher.fail(&reason, &mut self.ledger);

        return StoreError::Stream(reason);
    }

    /// Switches the active conversation. A provisional conversation being
    /// switched away from is dropped, it was never persisted.
    pub async fn select_conversation(&mut self, id: ConversationId) -> Result<(), StoreError> {
        if self.active == Some(id) {
            return Ok(());
        }

        if self.active == Some(ConversationId::Provisional) {
            self.provisional = None;
        }

        self.active = Some(id);
        self.ledger.clear();

        match id {
            ConversationId::Provisional => {
                if self.provisional.is_none() {
                    self.provisional = Some(Conversation::provisional());
                }
            }
            ConversationId::Durable(durable) => {
                self.fetch_messages(durable).await?;
            }
        }

        return Ok(());
    }

    pub async fn fetch_messages(&mut self, id: u64) -> Result<(), StoreError> {
        self.loading_list = true;
        let res = self.api.list_messages(id).await;
        self.loading_list = false;

        let messages = match res {
            Ok(messages) => messages,
            Err(err) => return Err(self.request_failed("Failed to fetch messages", err)),
        };

        if self.active != Some(ConversationId::Durable(id)) {
            tracing::debug!(conversation_id = id, "Discarding messages for inactive conversation");
            return Ok(());
        }

        self.ledger.replace_all(
            messages
                .into_iter()
                .map(|message| return Message::from_server(message, ""))
                .collect(),
        );

        return Ok(());
    }

    pub async fn list_conversations(&mut self) -> Result<(), StoreError> {
        self.loading_list = true;
        let res = self.api.list().await;
        self.loading_list = false;

        let conversations = match res {
            Ok(conversations) => conversations,
            Err(err) => return Err(self.request_failed("Failed to list conversations", err)),
        };

        self.conversations = conversations;
        self.active = None;
        self.provisional = None;
        self.ledger.clear();

        return Ok(());
    }

    pub async fn create_conversation(&mut self, title: &str) -> Result<Conversation, StoreError> {
        self.loading_list = true;
        let res = self.api.create(title).await;
        self.loading_list = false;

        let conversation = match res {
            Ok(conversation) => conversation,
            Err(err) => {
                tracing::error!(error = ?err, "Failed to create conversation");
                let error = StoreError::ConversationCreate(err.to_string());
                self.emit(Event::Notification(error.to_string()));
                return Err(error);
            }
        };

        self.adopt(conversation.clone());
        return Ok(conversation);
    }

    pub async fn rename_conversation(&mut self, id: u64, title: &str) -> Result<bool, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }

        self.loading_list = true;
        let res = self.api.rename(id, title).await;
        self.loading_list = false;

        if let Err(err) = res {
            return Err(self.request_failed("Failed to rename conversation", err));
        }

        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|conversation| return conversation.id == ConversationId::Durable(id))
        {
            conversation.title = title.to_string();
        }

        return Ok(true);
    }

    pub async fn delete_conversation(&mut self, id: u64) -> Result<(), StoreError> {
        self.loading_list = true;
        let res = self.api.remove(id).await;
        self.loading_list = false;

        if let Err(err) = res {
            return Err(self.request_failed("Failed to delete conversation", err));
        }

        let id = ConversationId::Durable(id);
        self.conversations
            .retain(|conversation| return conversation.id != id);

        if self.active == Some(id) {
            self.active = None;
            self.ledger.clear();
        }

        return Ok(());
    }

    fn adopt(&mut self, conversation: Conversation) {
        self.active = Some(conversation.id);
        self.provisional = None;
        self.conversations.insert(0, conversation);
        self.ledger.clear();
    }

    fn request_failed(&self, context: &str, err: Error) -> StoreError {
        tracing::error!(error = ?err, "{context}");
        let error = StoreError::Request(format!("{context}: {err}"));
        self.emit(Event::Notification(error.to_string()));

        return error;
    }

    fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No listener for store events");
        }
    }
}
