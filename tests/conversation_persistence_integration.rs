//! Integration tests for conversation and analytics persistence
//!
//! Conversations are written to a sled database in a temp directory and
//! read back by a fresh context, as a second CLI invocation would.

mod common;

use common::{assistant_config, completion_json, sse_text};
use helpdesk::chat::{Feedback, EMPTY_STREAM_FALLBACK};
use helpdesk::config::Config;
use helpdesk::context::AppContext;
use helpdesk::providers::{AiClient, Role};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(dir: &TempDir, proxy: &MockServer) -> Config {
    let mut config = Config::default();
    config.storage.path = Some(dir.path().join("state.db"));
    config.assistant = assistant_config(
        &format!("{}/api/openrouter", proxy.uri()),
        Some("sk-test"),
        None,
    );
    config
}

fn client(config: &Config) -> Arc<AiClient> {
    Arc::new(AiClient::new(&config.assistant).unwrap())
}

#[tokio::test]
async fn test_conversation_survives_restart() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_json(
            "Try forgetting and rejoining the network.",
        )))
        .mount(&proxy)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &proxy);

    let conversation_id = {
        let ctx = AppContext::new(config.clone());
        let mut store = ctx.conversation_store(client(&config));
        let answer = store
            .send_message("My wifi keeps disconnecting every few minutes")
            .await
            .unwrap();
        assert_eq!(answer.content, "Try forgetting and rejoining the network.");
        store.active_conversation().unwrap().id.clone()
    };

    let ctx = AppContext::new(config.clone());
    let store = ctx.offline_store();
    let conversation = store.active_conversation().expect("active conversation restored");
    assert_eq!(conversation.id, conversation_id);
    assert_eq!(conversation.title, "My wifi keeps disconnecting...");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[1].role, Role::Assistant);

    let snapshot = ctx.analytics_snapshot().unwrap();
    assert_eq!(snapshot.conversation_count, 1);
    assert_eq!(snapshot.message_count, 2);
    assert_eq!(
        snapshot.top_queries,
        vec!["My wifi keeps disconnecting every few minutes".to_string()]
    );
}

#[tokio::test]
async fn test_feedback_survives_restart() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_json("Update the driver.")))
        .mount(&proxy)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &proxy);

    {
        let ctx = AppContext::new(config.clone());
        let mut store = ctx.conversation_store(client(&config));
        let answer = store.send_message("Sound stopped working").await.unwrap();
        store
            .update_message_feedback(&answer.id, Feedback::Unhelpful)
            .expect("message found");
    }

    let ctx = AppContext::new(config);
    let store = ctx.offline_store();
    let answer = store
        .active_conversation()
        .and_then(|c| c.last_assistant_message())
        .unwrap();
    assert_eq!(answer.feedback, Some(Feedback::Unhelpful));

    let snapshot = ctx.analytics_snapshot().unwrap();
    assert_eq!(snapshot.unhelpful_count, 1);
    assert_eq!(snapshot.helpful_count, 0);
    assert_eq!(snapshot.total_feedback, 1);
}

#[tokio::test]
async fn test_streamed_answer_is_persisted() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_text(&["Run ", "a disk check."])),
        )
        .mount(&proxy)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &proxy);

    {
        let ctx = AppContext::new(config.clone());
        let mut store = ctx.conversation_store(client(&config));
        let mut seen = Vec::new();
        let answer = store
            .stream_message("Computer is slow", |fragment, _| seen.push(fragment.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["Run ", "a disk check."]);
        assert_eq!(answer.content, "Run a disk check.");
    }

    let ctx = AppContext::new(config);
    let store = ctx.offline_store();
    let answer = store
        .active_conversation()
        .and_then(|c| c.last_assistant_message())
        .unwrap();
    assert_eq!(answer.content, "Run a disk check.");
}

#[tokio::test]
async fn test_empty_stream_is_replaced_by_fallback() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_text(&[])),
        )
        .mount(&proxy)
        .await;

    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &proxy);
    let ctx = AppContext::new(config.clone());
    let mut store = ctx.conversation_store(client(&config));

    let answer = store.stream_message("?", |_, _| {}).await.unwrap();
    assert_eq!(answer.content, EMPTY_STREAM_FALLBACK);
}

#[tokio::test]
async fn test_deleted_conversation_stays_deleted() {
    let proxy = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, &proxy);

    let (kept, removed) = {
        let ctx = AppContext::new(config.clone());
        let mut store = ctx.offline_store();
        let kept = store.create_conversation().id;
        let removed = store.create_conversation().id;
        assert!(store.delete_conversation(&removed));
        (kept, removed)
    };

    let ctx = AppContext::new(config);
    let store = ctx.offline_store();
    assert!(store.conversation(&kept).is_some());
    assert!(store.conversation(&removed).is_none());
    // the deleted conversation was active, so nothing is
    assert!(store.active_conversation().is_none());
    assert_eq!(ctx.analytics_snapshot().unwrap().conversation_count, 1);
}
