//! End-to-end turn flow against the SQLite history store.

use async_trait::async_trait;
use docchat_gateway::{
    AuthError, ConversationService, EstimateCounter, PathFailure, Principal, TokenVerifier,
};
use docchat_memory::{HistoryStore, Message, SqliteHistoryStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

struct StaticVerifier;

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        match token {
            "alice-token" => Ok(Principal {
                email: "alice@example.com".into(),
                display_name: Some("Alice".into()),
                picture_url: None,
                subject_id: "alice".into(),
            }),
            _ => Err(AuthError {
                access_token: PathFailure::Rejected { status: 400 },
                identity_token: PathFailure::Malformed("not a jwt".into()),
            }),
        }
    }
}

fn service_over(store: Arc<SqliteHistoryStore>) -> ConversationService {
    ConversationService::new(
        Arc::new(StaticVerifier),
        store,
        Arc::new(EstimateCounter),
        Duration::from_secs(3600),
        2000,
        None,
    )
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn two_turns_are_visible_then_durable() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteHistoryStore::open(&tmp.path().join("history.db")).unwrap());
    let service = service_over(store.clone());

    let alice = service.authenticate("alice-token").await.unwrap();
    let handle = service.get_session(&alice).await.unwrap();

    assert_ok!(
        service
            .record_turn(
                &handle,
                Message::user("Hi"),
                Message::assistant("Hello, how can I help?"),
            )
            .await
    );
    assert_ok!(
        service
            .record_turn(
                &handle,
                Message::user("What's the weather?"),
                Message::assistant("I can't check weather."),
            )
            .await
    );

    let expected = vec![
        "Hi",
        "Hello, how can I help?",
        "What's the weather?",
        "I can't check weather.",
    ];

    let entry = service.cache().get_or_load(&handle).await.unwrap();
    assert_eq!(contents(&entry.messages), expected);
    assert!(entry.dirty);
    assert!(store.load_messages(&handle).await.unwrap().is_empty());

    let report = service.cache().flush_all().await;
    assert_eq!(report.flushed, 1);

    let stored = store.load_messages(&handle).await.unwrap();
    assert_eq!(stored, entry.messages);
    assert_eq!(contents(&stored), expected);
}

#[tokio::test]
async fn history_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("history.db");

    let handle = {
        let service = service_over(Arc::new(SqliteHistoryStore::open(&db).unwrap()));
        let alice = service.authenticate("alice-token").await.unwrap();
        let handle = service.get_session(&alice).await.unwrap();
        service
            .record_turn(&handle, Message::user("Hi"), Message::assistant("Hello!"))
            .await
            .unwrap();
        service.stop().await;
        handle
    };

    let service = service_over(Arc::new(SqliteHistoryStore::open(&db).unwrap()));
    let alice = service.authenticate("alice-token").await.unwrap();
    assert_eq!(service.get_session(&alice).await.unwrap(), handle);

    let window = service.get_context_window(&handle, 2000).await.unwrap();
    assert_eq!(contents(&window), vec!["Hi", "Hello!"]);
}

#[tokio::test]
async fn context_window_keeps_newest_turns() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteHistoryStore::open(&tmp.path().join("history.db")).unwrap());
    let service = service_over(store);
    let alice = service.authenticate("alice-token").await.unwrap();
    let handle = service.get_session(&alice).await.unwrap();

    // Each message is 8 characters, so 2 estimated tokens.
    for i in 0..5 {
        service
            .record_turn(
                &handle,
                Message::user(format!("ask-{i:04}")),
                Message::assistant(format!("ans-{i:04}")),
            )
            .await
            .unwrap();
    }

    let window = service.get_context_window(&handle, 8).await.unwrap();
    assert_eq!(
        contents(&window),
        vec!["ask-0003", "ans-0003", "ask-0004", "ans-0004"]
    );
    assert!(service.get_context_window(&handle, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_token_never_reaches_session_store() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteHistoryStore::open(&tmp.path().join("history.db")).unwrap());
    let service = service_over(store.clone());

    let err = assert_err!(service.authenticate("mallory-token").await);
    assert_eq!(err.to_string(), "invalid token");
    assert!(store
        .get_session_handle("mallory@example.com")
        .await
        .unwrap()
        .is_none());
}
