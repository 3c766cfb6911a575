use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_derive::Serialize;

use super::Conversation;
use super::ServerMessage;

pub type ByteStream = BoxStream<'static, Result<Bytes>>;
pub type ConversationApiBox = Arc<dyn ConversationApi + Send + Sync>;
pub type StreamTransportBox = Arc<dyn StreamTransport + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageRequest {
    pub content: String,
    pub model_id: String,
}

/// Plain request/response operations on conversations.
#[async_trait]
pub trait ConversationApi {
    async fn create(&self, title: &str) -> Result<Conversation>;

    /// Conversations ordered most recent first.
    async fn list(&self) -> Result<Vec<Conversation>>;

    async fn rename(&self, id: u64, title: &str) -> Result<()>;

    async fn remove(&self, id: u64) -> Result<()>;

    async fn list_messages(&self, id: u64) -> Result<Vec<ServerMessage>>;
}

/// Opens the long lived event stream for a single send.
#[async_trait]
pub trait StreamTransport {
    /// Issues the send request and hands back the raw response body. A
    /// connection failure or non-success status is returned as an error before
    /// any bytes are read.
    async fn open_stream(&self, conversation_id: u64, request: MessageRequest)
        -> Result<ByteStream>;
}
