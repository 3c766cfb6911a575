use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use test_utils::scenario_stream_error;
use test_utils::scenario_stream_success;
use test_utils::split_bytes;
use test_utils::sse_frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ConversationStore;
use super::StoreError;
use crate::domain::models::ByteStream;
use crate::domain::models::Conversation;
use crate::domain::models::ConversationApi;
use crate::domain::models::ConversationId;
use crate::domain::models::Event;
use crate::domain::models::MessageId;
use crate::domain::models::MessageRequest;
use crate::domain::models::Role;
use crate::domain::models::ServerMessage;
use crate::domain::models::StreamTransport;

#[derive(Default)]
struct FakeApi {
    fail_requests: bool,
    fail_open: bool,
    hang: bool,
    chunks: Vec<Result<Vec<u8>, String>>,
    created: Mutex<Vec<String>>,
    sent: Mutex<Vec<(u64, MessageRequest)>>,
    fetched: Mutex<Vec<u64>>,
}

impl FakeApi {
    fn streaming(body: &str) -> FakeApi {
        return FakeApi {
            chunks: vec![Ok(body.as_bytes().to_vec())],
            ..FakeApi::default()
        };
    }

    fn failing() -> FakeApi {
        return FakeApi {
            fail_requests: true,
            ..FakeApi::default()
        };
    }
}

fn conversation(id: u64, title: &str) -> Conversation {
    return Conversation {
        id: ConversationId::Durable(id),
        title: title.to_string(),
        created_at: Utc::now(),
    };
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn create(&self, title: &str) -> Result<Conversation> {
        if self.fail_requests {
            bail!("server unavailable");
        }
        self.created.lock().unwrap().push(title.to_string());

        return Ok(conversation(42, title));
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        if self.fail_requests {
            bail!("server unavailable");
        }

        return Ok(vec![conversation(8, "Second"), conversation(7, "First")]);
    }

    async fn rename(&self, _id: u64, _title: &str) -> Result<()> {
        if self.fail_requests {
            bail!("server unavailable");
        }

        return Ok(());
    }

    async fn remove(&self, _id: u64) -> Result<()> {
        if self.fail_requests {
            bail!("server unavailable");
        }

        return Ok(());
    }

    async fn list_messages(&self, id: u64) -> Result<Vec<ServerMessage>> {
        self.fetched.lock().unwrap().push(id);
        if self.fail_requests {
            bail!("server unavailable");
        }

        return Ok(vec![
            ServerMessage {
                id: 1,
                role: Role::User,
                content: "Earlier question".to_string(),
                created_at: None,
            },
            ServerMessage {
                id: 2,
                role: Role::Assistant,
                content: "Earlier answer".to_string(),
                created_at: None,
            },
        ]);
    }
}

#[async_trait]
impl StreamTransport for FakeApi {
    async fn open_stream(
        &self,
        conversation_id: u64,
        request: MessageRequest,
    ) -> Result<ByteStream> {
        if self.fail_open {
            bail!("connection refused");
        }
        self.sent.lock().unwrap().push((conversation_id, request));

        let items = self
            .chunks
            .iter()
            .map(|chunk| match chunk {
                Ok(bytes) => return Ok(Bytes::from(bytes.clone())),
                Err(err) => return Err(anyhow!(err.clone())),
            })
            .collect::<Vec<Result<Bytes>>>();

        if self.hang {
            return Ok(stream::iter(items).chain(stream::pending()).boxed());
        }

        return Ok(stream::iter(items).boxed());
    }
}

fn build_store(api: FakeApi) -> (ConversationStore, mpsc::UnboundedReceiver<Event>, Arc<FakeApi>) {
    let api = Arc::new(api);
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let store = ConversationStore::new(api.clone(), api.clone(), tx);

    return (store, rx, api);
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    return events;
}

fn notifications(events: &[Event]) -> Vec<String> {
    return events
        .iter()
        .filter_map(|event| match event {
            Event::Notification(text) => return Some(text.to_string()),
            _ => return None,
        })
        .collect();
}

mod send_message {
    use super::*;

    #[tokio::test]
    async fn it_streams_a_reply_into_a_new_conversation() -> Result<()> {
        let (mut store, mut rx, api) = build_store(FakeApi::streaming(&scenario_stream_success()));

        let exchange = store.send_message("Hello", "deepseek").await?.unwrap();

        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.conversations()[0].id, ConversationId::Durable(42));
        assert_eq!(store.conversations()[0].title, "Hello");
        assert_eq!(store.active_id(), Some(ConversationId::Durable(42)));
        assert!(!store.is_sending());

        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId::Durable(100));
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[0].model_id, "deepseek");
        assert_eq!(messages[1].id, MessageId::Durable(101));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert!(!messages[1].streaming);

        assert_eq!(exchange.user_message, messages[0]);
        assert_eq!(exchange.bot_message, messages[1]);

        assert_eq!(*api.created.lock().unwrap(), vec!["Hello".to_string()]);
        assert_eq!(
            *api.sent.lock().unwrap(),
            vec![(
                42,
                MessageRequest {
                    content: "Hello".to_string(),
                    model_id: "deepseek".to_string(),
                }
            )]
        );

        let events = drain(&mut rx);
        assert_eq!(
            events[..2],
            [
                Event::AssistantChunk("Hi".to_string()),
                Event::AssistantChunk(" there".to_string()),
            ]
        );
        assert_eq!(events[2], Event::AssistantCompleted(messages[1].clone()));
        assert_eq!(events.len(), 3);

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_the_stream_errors() -> Result<()> {
        let (mut store, mut rx, _api) = build_store(FakeApi::streaming(&scenario_stream_error()));

        let res = store.send_message("Hello", "deepseek").await;

        assert_eq!(res, Err(StoreError::Stream("rate limited".to_string())));
        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.conversations()[0].id, ConversationId::Durable(42));
        assert!(store.messages().is_empty());
        assert!(!store.is_sending());
        assert_eq!(notifications(&drain(&mut rx)), vec!["rate limited".to_string()]);

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_conversation_creation_fails() -> Result<()> {
        let (mut store, mut rx, api) = build_store(FakeApi::failing());

        let res = store.send_message("Hello", "deepseek").await;

        assert_eq!(
            res,
            Err(StoreError::ConversationCreate("server unavailable".to_string()))
        );
        assert!(store.conversations().is_empty());
        assert!(store.messages().is_empty());
        assert_eq!(store.active_id(), None);
        assert!(store.current_conversation().is_none());
        assert!(api.sent.lock().unwrap().is_empty());

        insta::assert_snapshot!(
            notifications(&drain(&mut rx)).join("\n"),
            @"Failed to create conversation: server unavailable"
        );

        return Ok(());
    }

    #[tokio::test]
    async fn it_keeps_an_explicitly_started_conversation_when_creation_fails() -> Result<()> {
        let (mut store, _rx, _api) = build_store(FakeApi::failing());
        store.start_conversation();

        assert!(store.send_message("Hello", "deepseek").await.is_err());
        assert_eq!(store.active_id(), Some(ConversationId::Provisional));
        assert!(store.messages().is_empty());

        return Ok(());
    }

    #[tokio::test]
    async fn it_ignores_blank_messages() -> Result<()> {
        let (mut store, mut rx, api) = build_store(FakeApi::streaming(&scenario_stream_success()));

        assert_eq!(store.send_message("  \n\t", "deepseek").await?, None);

        assert_eq!(store.active_id(), None);
        assert!(store.messages().is_empty());
        assert!(api.created.lock().unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());

        return Ok(());
    }

    #[tokio::test]
    async fn it_appends_to_an_existing_conversation() -> Result<()> {
        let (mut store, _rx, api) = build_store(FakeApi::streaming(&scenario_stream_success()));
        store.select_conversation(ConversationId::Durable(7)).await?;

        store.send_message("Hello", "deepseek").await?;

        assert!(api.created.lock().unwrap().is_empty());
        assert_eq!(api.sent.lock().unwrap()[0].0, 7);

        let ids = store
            .messages()
            .iter()
            .map(|msg| return msg.id)
            .collect::<Vec<MessageId>>();
        assert_eq!(
            ids,
            vec![
                MessageId::Durable(1),
                MessageId::Durable(2),
                MessageId::Durable(100),
                MessageId::Durable(101),
            ]
        );

        return Ok(());
    }

    #[tokio::test]
    async fn it_reassembles_frames_split_across_reads() -> Result<()> {
        let api = FakeApi {
            chunks: split_bytes(&scenario_stream_success(), 3)
                .into_iter()
                .map(Ok)
                .collect(),
            ..FakeApi::default()
        };
        let (mut store, _rx, _api) = build_store(api);

        let exchange = store.send_message("Hello", "deepseek").await?.unwrap();

        assert_eq!(exchange.bot_message.content, "Hi there");
        assert_eq!(store.messages().len(), 2);

        return Ok(());
    }

    #[tokio::test]
    async fn it_prefers_the_final_text_over_accumulated_chunks() -> Result<()> {
        let body = [
            sse_frame(r#"{"type":"stream_chunk","text":"Hi"}"#),
            sse_frame(r#"{"type":"stream_chunk","text":" thre"}"#),
            sse_frame(r#"{"type":"stream_end","message_id":101,"full_text":"Hi there"}"#),
        ]
        .concat();
        let (mut store, _rx, _api) = build_store(FakeApi::streaming(&body));

        let exchange = store.send_message("Hello", "deepseek").await?.unwrap();

        assert_eq!(exchange.bot_message.content, "Hi there");
        // Never confirmed by the stream, so the user message stays provisional.
        assert!(exchange.user_message.id.is_provisional());

        return Ok(());
    }

    #[tokio::test]
    async fn it_stops_reading_after_stream_end() -> Result<()> {
        let body = [
            sse_frame(r#"{"type":"stream_end","message_id":101,"full_text":"Hi there"}"#),
            sse_frame(r#"{"type":"stream_chunk","text":"late"}"#),
        ]
        .concat();
        let (mut store, mut rx, _api) = build_store(FakeApi::streaming(&body));

        store.send_message("Hello", "deepseek").await?;

        assert_eq!(store.messages()[1].content, "Hi there");
        let events = drain(&mut rx);
        assert!(!events.contains(&Event::AssistantChunk("late".to_string())));

        return Ok(());
    }

    #[tokio::test]
    async fn it_survives_malformed_payloads() -> Result<()> {
        let body = [
            "data: {not json\n\n".to_string(),
            "garbage line\n".to_string(),
            scenario_stream_success(),
        ]
        .concat();
        let (mut store, _rx, _api) = build_store(FakeApi::streaming(&body));

        let exchange = store.send_message("Hello", "deepseek").await?.unwrap();
        assert_eq!(exchange.bot_message.content, "Hi there");

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_the_stream_cannot_open() -> Result<()> {
        let api = FakeApi {
            fail_open: true,
            ..FakeApi::default()
        };
        let (mut store, mut rx, _api) = build_store(api);

        let res = store.send_message("Hello", "deepseek").await;

        assert_eq!(res, Err(StoreError::Stream("connection refused".to_string())));
        assert_eq!(store.active_id(), Some(ConversationId::Durable(42)));
        assert!(store.messages().is_empty());
        assert_eq!(notifications(&drain(&mut rx)).len(), 1);

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_a_read_fails() -> Result<()> {
        let api = FakeApi {
            chunks: vec![
                Ok(scenario_stream_success().as_bytes()[..200].to_vec()),
                Err("connection reset".to_string()),
            ],
            ..FakeApi::default()
        };
        let (mut store, _rx, _api) = build_store(api);

        let res = store.send_message("Hello", "deepseek").await;

        assert_eq!(res, Err(StoreError::Stream("connection reset".to_string())));
        assert!(store
            .messages()
            .iter()
            .all(|msg| return !msg.id.is_provisional()));

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_the_stream_closes_early() -> Result<()> {
        let body = sse_frame(r#"{"type":"stream_chunk","text":"Hi"}"#);
        let (mut store, _rx, _api) = build_store(FakeApi::streaming(&body));

        let res = store.send_message("Hello", "deepseek").await;

        assert_eq!(
            res,
            Err(StoreError::Stream("stream closed before completion".to_string()))
        );
        assert!(store.messages().is_empty());

        return Ok(());
    }

    #[tokio::test]
    async fn it_rolls_back_when_aborted() -> Result<()> {
        let api = FakeApi {
            hang: true,
            ..FakeApi::default()
        };
        let (mut store, _rx, _api) = build_store(api);
        let abort = CancellationToken::new();
        abort.cancel();

        let res = store
            .send_message_with_abort("Hello", "deepseek", abort)
            .await;

        assert_eq!(res, Err(StoreError::Stream("stream aborted".to_string())));
        assert!(store.messages().is_empty());
        assert!(!store.is_sending());

        return Ok(());
    }
}

mod select_conversation {
    use super::*;

    #[tokio::test]
    async fn it_loads_messages_for_the_selected_conversation() -> Result<()> {
        let (mut store, _rx, api) = build_store(FakeApi::default());

        store.select_conversation(ConversationId::Durable(7)).await?;
        store.select_conversation(ConversationId::Durable(7)).await?;

        assert_eq!(*api.fetched.lock().unwrap(), vec![7]);
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[0].content, "Earlier question");
        assert!(!store.is_loading());

        return Ok(());
    }

    #[tokio::test]
    async fn it_drops_the_provisional_conversation_when_switching_away() -> Result<()> {
        let (mut store, _rx, api) = build_store(FakeApi::default());
        store.start_conversation();
        assert_eq!(store.current_conversation().unwrap().title, "New conversation");

        store.select_conversation(ConversationId::Durable(7)).await?;
        assert_eq!(store.active_id(), Some(ConversationId::Durable(7)));

        store.select_conversation(ConversationId::Provisional).await?;
        assert!(store.messages().is_empty());
        assert_eq!(*api.fetched.lock().unwrap(), vec![7]);
        assert_eq!(
            store.current_conversation().unwrap().id,
            ConversationId::Provisional
        );

        return Ok(());
    }

    #[tokio::test]
    async fn it_notifies_when_messages_fail_to_load() -> Result<()> {
        let (mut store, mut rx, _api) = build_store(FakeApi::failing());

        let res = store.select_conversation(ConversationId::Durable(7)).await;

        assert!(res.is_err());
        assert!(store.messages().is_empty());
        insta::assert_snapshot!(
            notifications(&drain(&mut rx)).join("\n"),
            @"Failed to fetch messages: server unavailable"
        );

        return Ok(());
    }
}

mod crud {
    use super::*;

    #[tokio::test]
    async fn it_lists_conversations() -> Result<()> {
        let (mut store, _rx, _api) = build_store(FakeApi::default());
        store.start_conversation();

        store.list_conversations().await?;

        let titles = store
            .conversations()
            .iter()
            .map(|conversation| return conversation.title.to_string())
            .collect::<Vec<String>>();
        assert_eq!(titles, vec!["Second", "First"]);
        assert_eq!(store.active_id(), None);
        assert!(store.current_conversation().is_none());

        return Ok(());
    }

    #[tokio::test]
    async fn it_creates_conversations() -> Result<()> {
        let (mut store, _rx, _api) = build_store(FakeApi::default());
        store.list_conversations().await?;

        let created = store.create_conversation("Fresh").await?;

        assert_eq!(created.id, ConversationId::Durable(42));
        assert_eq!(store.conversations()[0].title, "Fresh");
        assert_eq!(store.active_id(), Some(ConversationId::Durable(42)));
        assert!(store.messages().is_empty());

        return Ok(());
    }

    #[tokio::test]
    async fn it_renames_conversations() -> Result<()> {
        let (mut store, _rx, _api) = build_store(FakeApi::default());
        store.list_conversations().await?;

        assert!(store.rename_conversation(7, "  Renamed ").await?);
        assert!(!store.rename_conversation(7, "   ").await?);

        assert_eq!(store.conversations()[1].title, "Renamed");

        return Ok(());
    }

    #[tokio::test]
    async fn it_deletes_the_active_conversation() -> Result<()> {
        let (mut store, _rx, _api) = build_store(FakeApi::default());
        store.list_conversations().await?;
        store.select_conversation(ConversationId::Durable(7)).await?;

        store.delete_conversation(7).await?;

        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.active_id(), None);
        assert!(store.messages().is_empty());

        return Ok(());
    }

    #[tokio::test]
    async fn it_leaves_state_unchanged_on_failure() -> Result<()> {
        let (mut store, mut rx, _api) = build_store(FakeApi::failing());

        assert!(store.list_conversations().await.is_err());
        assert!(store.rename_conversation(7, "Renamed").await.is_err());
        assert!(store.delete_conversation(7).await.is_err());
        assert!(store.create_conversation("Fresh").await.is_err());

        assert!(store.conversations().is_empty());
        assert_eq!(store.active_id(), None);
        assert!(!store.is_loading());

        insta::assert_snapshot!(notifications(&drain(&mut rx)).join("\n"), @r###"
        Failed to list conversations: server unavailable
        Failed to rename conversation: server unavailable
        Failed to delete conversation: server unavailable
        Failed to create conversation: server unavailable
        "###);

        return Ok(());
    }
}
