#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use futures::stream::TryStreamExt;
use futures::StreamExt;
use reqwest::Method;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ByteStream;
use crate::domain::models::Conversation;
use crate::domain::models::ConversationApi;
use crate::domain::models::ConversationId;
use crate::domain::models::MessageRequest;
use crate::domain::models::ServerMessage;
use crate::domain::models::StreamTransport;

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
    data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatResponse {
    id: u64,
    title: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatListResponse {
    chats: Vec<ChatResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MessageListResponse {
    messages: Vec<ServerMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TitleRequest {
    title: String,
}

impl From<ChatResponse> for Conversation {
    fn from(chat: ChatResponse) -> Conversation {
        return Conversation {
            id: ConversationId::Durable(chat.id),
            title: chat.title,
            created_at: chat.created_at.unwrap_or_else(Utc::now),
        };
    }
}

/// Talks to the chat server over HTTP. Plain calls expect the server's
/// `{code, message, data}` envelope; sends return the raw event stream.
pub struct HttpApi {
    url: String,
    token: String,
    timeout: String,
}

impl Default for HttpApi {
    fn default() -> HttpApi {
        return HttpApi {
            url: Config::get(ConfigKey::ApiURL),
            token: Config::get(ConfigKey::ApiToken),
            timeout: Config::get(ConfigKey::RequestTimeout),
        };
    }
}

impl HttpApi {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = reqwest::Client::new().request(
            method,
            format!("{url}{path}", url = self.url.trim_end_matches('/')),
        );
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }

        return req;
    }

    fn timeout(&self) -> Result<Duration> {
        return Ok(Duration::from_millis(self.timeout.parse::<u64>()?));
    }

    #[allow(clippy::implicit_return)]
    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>> {
        let res = req.timeout(self.timeout()?).send().await?;
        let status = res.status();
        let body = res.text().await?;

        let envelope = serde_json::from_str::<Envelope<T>>(&body);
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %body, "Request to chat server failed");
            if let Ok(envelope) = envelope {
                bail!(envelope_error(&envelope));
            }
            bail!(format!("Request failed with status {}", status.as_u16()));
        }

        let envelope = envelope?;
        if envelope.code != 0 {
            tracing::error!(code = envelope.code, "Chat server rejected request");
            bail!(envelope_error(&envelope));
        }

        return Ok(envelope.data);
    }

    async fn call_data<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        if let Some(data) = self.call::<T>(req).await? {
            return Ok(data);
        }

        bail!("Chat server response is missing data");
    }
}

fn envelope_error<T>(envelope: &Envelope<T>) -> String {
    if !envelope.message.is_empty() {
        return envelope.message.to_string();
    }
    if !envelope.error.is_empty() {
        return envelope.error.to_string();
    }

    return "Request failed".to_string();
}

fn convert_err(err: reqwest::Error) -> anyhow::Error {
    return anyhow::Error::new(err).context("Failed to read message stream");
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn create(&self, title: &str) -> Result<Conversation> {
        let req = self.request(Method::POST, "/chat").json(&TitleRequest {
            title: title.to_string(),
        });
        let chat = self.call_data::<ChatResponse>(req).await?;

        return Ok(chat.into());
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        let res = self
            .call_data::<ChatListResponse>(self.request(Method::GET, "/chat"))
            .await?;

        return Ok(res
            .chats
            .into_iter()
            .map(|chat| return chat.into())
            .collect());
    }

    async fn rename(&self, id: u64, title: &str) -> Result<()> {
        let req = self
            .request(Method::PATCH, &format!("/chat/{id}"))
            .json(&TitleRequest {
                title: title.to_string(),
            });
        self.call::<serde_json::Value>(req).await?;

        return Ok(());
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.call::<serde_json::Value>(self.request(Method::DELETE, &format!("/chat/{id}")))
            .await?;

        return Ok(());
    }

    async fn list_messages(&self, id: u64) -> Result<Vec<ServerMessage>> {
        let res = self
            .call_data::<MessageListResponse>(
                self.request(Method::GET, &format!("/chat/{id}/message")),
            )
            .await?;

        return Ok(res.messages);
    }
}

#[async_trait]
impl StreamTransport for HttpApi {
    #[allow(clippy::implicit_return)]
    async fn open_stream(
        &self,
        conversation_id: u64,
        request: MessageRequest,
    ) -> Result<ByteStream> {
        let res = self
            .request(Method::POST, &format!("/chat/{conversation_id}/message"))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            tracing::error!(status = status, body = %body, "Failed to open message stream");

            if let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
                bail!(envelope_error(&envelope));
            }
            bail!(format!("Message stream failed with status {status}"));
        }

        // Failures detected before streaming starts arrive as a plain JSON
        // envelope with a success status.
        if is_json(&res) {
            let body = res.text().await?;
            let envelope = serde_json::from_str::<Envelope<serde_json::Value>>(&body)?;
            tracing::error!(code = envelope.code, body = %body, "Chat server rejected message");
            bail!(envelope_error(&envelope));
        }

        return Ok(res.bytes_stream().map_err(convert_err).boxed());
    }
}

fn is_json(res: &reqwest::Response) -> bool {
    return res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| return value.to_str().ok())
        .map(|value| return value.starts_with("application/json"))
        .unwrap_or(false);
}
