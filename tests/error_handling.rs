//! Error handling and edge case tests.

mod common;

use collection_sync::query::{and, eq, func, in_list, not, or, Value};
use collection_sync::{
    compile_filter, CompileError, LocalCollection, MemoryCollection, RecordEvent, Selector,
    SubscriptionConfig, SubscriptionKey, SubscriptionManager, SyncError, WriteBatch,
};
use common::{init_tracing, record, MockRemote};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// --- Subscription Errors ---

#[tokio::test(start_paused = true)]
async fn test_timeout_names_key_and_budget() {
    let remote = MockRemote::with_delay(Duration::from_secs(60));
    let manager = SubscriptionManager::with_config(
        remote.clone(),
        SubscriptionConfig::default().with_wait_timeout(Duration::from_millis(250)),
    );
    manager
        .add_subscriber("books", Arc::new(MemoryCollection::new()))
        .unwrap();

    let err = manager
        .wait_for_subscription("books", &Selector::All)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Timed out after 250ms waiting for subscription books/*"
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_names_key() {
    let remote = MockRemote::new();
    remote.fail_next(1);
    let manager = SubscriptionManager::new(remote.clone());

    let err = manager
        .subscribe(
            "books",
            Arc::new(MemoryCollection::new()),
            Selector::Record("r1".into()),
        )
        .await
        .unwrap_err();

    match err {
        SyncError::Connection { key, .. } => {
            assert_eq!(key, SubscriptionKey::new("books", Selector::Record("r1".into())));
        }
        other => panic!("Expected Connection, got {:?}", other),
    }
    manager.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_removes_state_silently() {
    init_tracing();
    let remote = MockRemote::new();
    let manager = SubscriptionManager::with_config(
        remote.clone(),
        SubscriptionConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_attempts(3),
    );
    remote.fail_always(true);

    let result = manager
        .subscribe("books", Arc::new(MemoryCollection::new()), Selector::All)
        .await;
    assert!(result.is_err());
    assert!(manager.is_subscribed("books", &Selector::All));

    // 100 + 200 + 400
    sleep(Duration::from_millis(699)).await;
    assert!(manager.is_subscribed("books", &Selector::All));
    sleep(Duration::from_millis(2)).await;
    assert!(!manager.is_subscribed("books", &Selector::All));
    assert_eq!(remote.subscribe_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_unknown_key_is_noop() {
    let manager = SubscriptionManager::new(MockRemote::new());
    manager.unsubscribe("books", &Selector::All);
    manager.unsubscribe_all("books");
    assert!(manager.active_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_entity_rejected_without_remote_call() {
    let remote = MockRemote::new();
    let manager = SubscriptionManager::new(remote.clone());

    let result = manager
        .subscribe("", Arc::new(MemoryCollection::new()), Selector::All)
        .await;
    assert!(matches!(result, Err(SyncError::InvalidEntity(_))));
    assert_eq!(remote.subscribe_count(), 0);
}

// --- Event Errors ---

#[tokio::test(start_paused = true)]
async fn test_rejected_batch_does_not_stop_stream() {
    init_tracing();
    let remote = MockRemote::new();
    let manager = SubscriptionManager::new(remote.clone());
    let books = Arc::new(MemoryCollection::new());
    manager
        .subscribe("books", books.clone(), Selector::All)
        .await
        .unwrap();
    let sink = remote.latest_sink("books");

    sink.send_event(RecordEvent::create(record(json!({"id": "r1", "v": 1}))));
    // The duplicate create makes the store refuse the batch as a whole.
    sink.send(vec![
        RecordEvent::create(record(json!({"id": "r2"}))),
        RecordEvent::create(record(json!({"id": "r1", "v": 2}))),
    ]);
    sink.send_event(RecordEvent::create(record(json!({"id": "r3"}))));
    sleep(Duration::from_millis(1)).await;

    assert_eq!(
        books.ids(),
        vec!["r1".to_string(), "r2".to_string(), "r3".to_string()]
    );
    assert_eq!(books.get("r1").unwrap().get("v"), Some(&json!(2)));
    assert!(manager.is_subscribed("books", &Selector::All));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payloads_are_dropped() {
    init_tracing();
    let remote = MockRemote::new();
    let manager = SubscriptionManager::new(remote.clone());
    let books = Arc::new(MemoryCollection::new());
    manager
        .subscribe("books", books.clone(), Selector::All)
        .await
        .unwrap();
    let sink = remote.latest_sink("books");

    assert!(sink.deliver_json("not json"));
    assert!(sink.deliver_json(r#"{"action":"explode","record":{"id":"r1"}}"#));
    assert!(sink.deliver_json(r#"{"action":"create","record":"r1"}"#));
    assert!(sink.deliver_json(r#"[{"action":"create","record":{"id":"ok"}}]"#));
    sleep(Duration::from_millis(1)).await;

    assert_eq!(books.ids(), vec!["ok".to_string()]);
}

#[test]
fn test_store_errors() {
    let store = MemoryCollection::new();

    let mut batch = WriteBatch::new();
    batch.delete("ghost");
    assert!(matches!(
        store.commit(batch),
        Err(SyncError::RecordNotFound(id)) if id == "ghost"
    ));

    let mut batch = WriteBatch::new();
    batch.insert("a", record(json!({"id": "a"})));
    batch.insert("a", record(json!({"id": "a"})));
    assert!(matches!(
        store.commit(batch),
        Err(SyncError::DuplicateRecord(id)) if id == "a"
    ));
    assert!(store.is_empty());
}

// --- Compile Errors ---

#[test]
fn test_unsupported_operator_lists_supported() {
    let err = compile_filter(Some(&func("regex", vec![]))).unwrap_err();
    match &err {
        CompileError::UnsupportedOperator { name, supported } => {
            assert_eq!(name, "regex");
            assert!(supported.contains("isNull"));
            assert!(supported.contains("in"));
        }
        other => panic!("Expected UnsupportedOperator, got {:?}", other),
    }
    assert!(err.to_string().contains("regex"));
}

#[test]
fn test_unsupported_operator_deep_in_tree() {
    let filter = and(vec![
        eq(["genre"], "Fantasy"),
        or(vec![
            eq(["author"], "Tolkien"),
            not(func("startsWith", vec![])),
        ]),
    ]);
    assert!(matches!(
        compile_filter(Some(&filter)),
        Err(CompileError::UnsupportedOperator { name, .. }) if name == "startsWith"
    ));
}

#[test]
fn test_empty_in_list_rejected() {
    let filter = in_list(["genre"], Vec::<Value>::new());
    assert_eq!(
        compile_filter(Some(&filter)),
        Err(CompileError::EmptyIn {
            field: "genre".to_string()
        })
    );
}

#[test]
fn test_wrong_arity_rejected() {
    let filter = func("eq", vec![collection_sync::query::field(["genre"])]);
    assert!(matches!(
        compile_filter(Some(&filter)),
        Err(CompileError::InvalidArguments { .. })
    ));
}
