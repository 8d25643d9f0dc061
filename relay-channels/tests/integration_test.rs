//! Integration tests for the relay.
//!
//! Drives the dispatcher end to end with a recording gateway and a scripted
//! provider, and checks the health routes.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use relay_agent::{GeneratedImage, Provider, ProviderError};
use relay_channels::{
    build_router, ChannelMessage, ChannelResult, ChannelType, CommandDispatcher, CommandEvent,
    DispatcherSettings, Gateway, InboundEvent, OutgoingContent, OutgoingMessage,
};
use relay_common::error::GENERIC_APOLOGY;
use relay_history::{ConversationStore, MemoryPersistence, Role, StoreOptions, Turn};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const SYSTEM_PROMPT: &str = "You are terse.";

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingGateway {
    next_id: AtomicUsize,
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    edits: Mutex<Vec<(String, OutgoingContent)>>,
}

impl RecordingGateway {
    fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, m)| m.content.as_text().map(String::from))
            .collect()
    }

    fn edits(&self) -> Vec<(String, OutgoingContent)> {
        self.edits.lock().unwrap().clone()
    }

    fn last_sent_id(&self) -> String {
        self.sent().last().map(|(id, _)| id.clone()).unwrap()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn max_message_length(&self) -> usize {
        2000
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent.lock().unwrap().push((id.clone(), message));
        Ok(id)
    }

    async fn edit(&self, _channel_id: &str, message_id: &str, content: OutgoingContent) -> ChannelResult<()> {
        self.edits.lock().unwrap().push((message_id.to_string(), content));
        Ok(())
    }

    async fn delete(&self, _channel_id: &str, _message_id: &str) -> ChannelResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    fn respond(&self, response: Result<String, ProviderError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(turns.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Vec<GeneratedImage>, ProviderError> {
        Ok(vec![GeneratedImage {
            mime_type: "image/png".into(),
            data: vec![0x89, b'P', b'N', b'G'],
        }])
    }
}

struct Harness {
    dispatcher: CommandDispatcher,
    gateway: Arc<RecordingGateway>,
    provider: Arc<ScriptedProvider>,
    persistence: Arc<MemoryPersistence>,
}

async fn harness_with(allowed_users: &[&str]) -> Harness {
    let gateway = Arc::new(RecordingGateway::default());
    let provider = Arc::new(ScriptedProvider::default());
    let persistence = Arc::new(MemoryPersistence::new());
    let store = ConversationStore::open(persistence.clone(), StoreOptions::default())
        .await
        .unwrap();

    let settings = DispatcherSettings {
        allowed_users: allowed_users.iter().map(|u| u.to_string()).collect(),
        system_prompt: SYSTEM_PROMPT.into(),
        ack_text: "Thinking...".into(),
        denied_text: "Not allowed.".into(),
    };
    let dispatcher = CommandDispatcher::new(Arc::new(store), provider.clone(), gateway.clone(), settings);

    Harness {
        dispatcher,
        gateway,
        provider,
        persistence,
    }
}

async fn harness() -> Harness {
    harness_with(&["*"]).await
}

fn command(user: &str, name: &str, options: &[(&str, &str)]) -> InboundEvent {
    InboundEvent::Command(CommandEvent {
        id: format!("cmd-{name}"),
        channel_type: ChannelType::Discord,
        channel_id: "general".into(),
        user_id: user.into(),
        command: name.into(),
        options: options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        timestamp: 0,
    })
}

fn reply(user: &str, to: &str, text: &str) -> InboundEvent {
    InboundEvent::Message(ChannelMessage {
        id: format!("in-{to}"),
        channel_type: ChannelType::Discord,
        channel_id: "general".into(),
        user_id: user.into(),
        is_bot: false,
        text: text.into(),
        reply_to: Some(to.into()),
        timestamp: 0,
    })
}

fn roles(turns: &[Turn]) -> Vec<Role> {
    turns.iter().map(|t| t.role).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation flow
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_long_response_edits_ack_and_sends_follow_up() {
    let h = harness().await;
    let long = "a ".repeat(1500);
    h.provider.respond(Ok(long.clone()));

    h.dispatcher
        .handle(command("alice", "e", &[("question", "talk a lot")]))
        .await;

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2, "ack plus one follow-up");
    assert_eq!(sent[0].1.content.as_text(), Some("Thinking..."));
    assert_eq!(sent[0].1.reply_to.as_deref(), Some("cmd-e"));

    let edits = h.gateway.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "m1");

    let first = edits[0].1.as_text().unwrap();
    let second = sent[1].1.content.as_text().unwrap();
    assert!(first.chars().count() <= 2000);
    assert!(second.chars().count() <= 2000);
    let rejoined = format!("{first} {second}");
    assert_eq!(
        rejoined.split_whitespace().collect::<Vec<_>>(),
        long.split_whitespace().collect::<Vec<_>>()
    );

    // Both segments lead back to the same conversation.
    let store = h.dispatcher.store();
    let head = store.resolve_context("m1").await.unwrap();
    let tail = store.resolve_context("m2").await.unwrap();
    assert_eq!(head, tail);
    assert_eq!(roles(head.turns()), vec![Role::System, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_reply_continues_without_second_system_turn() {
    let h = harness().await;
    h.provider.respond(Ok("Rust is a language.".into()));
    h.provider.respond(Ok("It is memory safe.".into()));

    h.dispatcher
        .handle(command("alice", "e", &[("question", "What is Rust?")]))
        .await;
    h.dispatcher.handle(reply("alice", "m1", "Tell me more")).await;

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(roles(&calls[0]), vec![Role::System, Role::User]);
    assert_eq!(calls[0][0].content, SYSTEM_PROMPT);
    assert_eq!(
        roles(&calls[1]),
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(calls[1][3].content, "Tell me more");

    let continued = h.dispatcher.store().resolve_context("m2").await.unwrap();
    assert_eq!(continued.len(), 5);
}

#[tokio::test]
async fn test_reply_to_unknown_message_is_ignored() {
    let h = harness().await;
    h.dispatcher.handle(reply("alice", "nowhere", "hello?")).await;

    assert!(h.gateway.sent().is_empty());
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_edits_ack_with_apology() {
    let h = harness().await;
    h.provider
        .respond(Err(ProviderError::new("scripted", "quota exceeded").with_status(429)));

    h.dispatcher
        .handle(command("alice", "e", &[("question", "hi")]))
        .await;

    assert_eq!(h.gateway.sent().len(), 1, "only the ack is sent");
    let edits = h.gateway.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "m1");
    assert_eq!(edits[0].1.as_text(), Some(GENERIC_APOLOGY));
    assert_eq!(h.dispatcher.store().anchor_count().await, 0);
}

#[tokio::test]
async fn test_missing_question_is_user_error() {
    let h = harness().await;
    h.dispatcher.handle(command("alice", "e", &[("question", "  ")])).await;

    let texts = h.gateway.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("provide a question"));
    assert!(h.provider.calls().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Allow-list
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_user_outside_allow_list_is_denied() {
    let h = harness_with(&["alice"]).await;
    h.dispatcher
        .handle(command("mallory", "e", &[("question", "hi")]))
        .await;

    assert_eq!(h.gateway.sent_texts(), vec!["Not allowed.".to_string()]);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_help_skips_allow_list() {
    let h = harness_with(&[]).await;
    h.dispatcher.handle(command("anyone", "help", &[])).await;

    let texts = h.gateway.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("/e <question>"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Named histories
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_extends_named_history_and_persists() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "project")]))
        .await;

    let seeded = h.persistence.get("project").await.unwrap();
    assert_eq!(seeded.owner.as_deref(), Some("alice"));
    assert_eq!(roles(&seeded.turns), vec![Role::System]);

    h.provider.respond(Ok("Noted.".into()));
    h.dispatcher
        .handle(command("alice", "chat", &[("message", "We use Rust.")]))
        .await;

    let calls = h.provider.calls();
    assert_eq!(roles(&calls[0]), vec![Role::System, Role::User]);

    let stored = h.persistence.get("project").await.unwrap();
    assert_eq!(roles(&stored.turns), vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(stored.turns[2].content, "Noted.");

    let active = h.dispatcher.store().active_named_history("alice").await.unwrap();
    assert_eq!(active.name, "project");
}

#[tokio::test]
async fn test_reply_to_older_anchor_builds_on_latest_history() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "project")]))
        .await;

    h.provider.respond(Ok("First answer.".into()));
    h.dispatcher
        .handle(command("alice", "chat", &[("message", "first")]))
        .await;
    let older = h.gateway.last_sent_id();

    h.provider.respond(Ok("Second answer.".into()));
    h.dispatcher
        .handle(command("alice", "chat", &[("message", "second")]))
        .await;

    h.provider.respond(Ok("Third answer.".into()));
    h.dispatcher.handle(reply("alice", &older, "third")).await;

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 3);
    let contents: Vec<&str> = calls[2].iter().map(|t| t.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![SYSTEM_PROMPT, "first", "First answer.", "second", "Second answer.", "third"]
    );

    let stored = h.persistence.get("project").await.unwrap();
    assert_eq!(stored.turns.len(), 7);
    assert_eq!(stored.turns[6].content, "Third answer.");
}

#[tokio::test]
async fn test_duplicate_history_name_is_rejected() {
    let h = harness().await;
    let start = command("alice", "history", &[("action", "start"), ("name", "project")]);
    h.dispatcher.handle(start.clone()).await;
    h.dispatcher.handle(start).await;

    let texts = h.gateway.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].contains("already exists"));
}

#[tokio::test]
async fn test_loading_someone_elses_history_is_forbidden() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "secret")]))
        .await;
    h.dispatcher
        .handle(command("bob", "history", &[("action", "load"), ("name", "secret")]))
        .await;

    let texts = h.gateway.sent_texts();
    assert!(texts.last().unwrap().contains("belongs to another user"));
    assert!(h.dispatcher.store().active_named_history("bob").await.is_none());
}

#[tokio::test]
async fn test_reply_to_foreign_named_history_is_forbidden() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "secret")]))
        .await;
    let notice = h.gateway.last_sent_id();

    h.dispatcher.handle(reply("bob", &notice, "let me in")).await;

    assert!(h.provider.calls().is_empty());
    assert!(h.gateway.sent_texts().last().unwrap().contains("belongs to another user"));
}

#[tokio::test]
async fn test_clear_keeps_saved_histories() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "project")]))
        .await;
    h.dispatcher
        .handle(command("alice", "e", &[("question", "hi")]))
        .await;
    assert!(h.dispatcher.store().anchor_count().await > 0);

    h.dispatcher
        .handle(command("alice", "history", &[("action", "clear")]))
        .await;
    assert_eq!(h.dispatcher.store().anchor_count().await, 0);

    h.dispatcher
        .handle(command("alice", "history", &[("action", "list")]))
        .await;
    let listing = h.gateway.sent_texts().last().cloned().unwrap();
    assert!(listing.contains("`project` (1 turns"), "{listing}");
}

#[tokio::test]
async fn test_deleted_history_stops_being_active() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "start"), ("name", "tmp")]))
        .await;
    h.dispatcher
        .handle(command("alice", "history", &[("action", "delete"), ("name", "tmp")]))
        .await;

    assert!(h.persistence.get("tmp").await.is_none());
    assert!(h.dispatcher.store().active_named_history("alice").await.is_none());

    // Falls back to an untracked conversation.
    h.dispatcher
        .handle(command("alice", "chat", &[("message", "still there?")]))
        .await;
    assert_eq!(roles(&h.provider.calls()[0]), vec![Role::System, Role::User]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Images
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_imagine_sends_attachment() {
    let h = harness().await;
    h.dispatcher
        .handle(command("alice", "imagine", &[("prompt", "a red fox")]))
        .await;

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    match &sent[1].1.content {
        OutgoingContent::Image {
            filename, mime_type, ..
        } => {
            assert_eq!(filename, "image-1.png");
            assert_eq!(mime_type, "image/png");
        }
        other => panic!("expected image, got {other:?}"),
    }
    assert!(h.gateway.edits()[0].1.as_text().unwrap().contains("a red fox"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Check Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let response = build_router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "relay");
}
