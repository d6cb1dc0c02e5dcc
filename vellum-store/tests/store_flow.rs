//! End-to-end tests for the document store.
//!
//! Exercises the store's observable contract against the in-memory channel:
//! - Default resolution for missing artifacts
//! - Read-through caching and durable reads
//! - Write coalescing (one durable write per window, last value wins)
//! - Per-key ordering and cross-key independence
//! - Retry behavior for transient vs permanent failures
//! - Rollback to the last confirmed value on a failed flush
//! - Subscription visibility of optimistic updates

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use vellum_core::{code, ChannelFailure, CoalesceConfig, ErrorKind, StoreConfig};
use vellum_store::{ChannelMethod, DocumentStore, MemoryChannel};

const WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Settings {
    theme: String,
}

fn dark() -> Settings {
    Settings {
        theme: "dark".to_string(),
    }
}

fn light() -> Settings {
    Settings {
        theme: "light".to_string(),
    }
}

fn library_store() -> DocumentStore<MemoryChannel> {
    DocumentStore::new(MemoryChannel::new(), StoreConfig::new("library"))
}

fn network_failure() -> ChannelFailure {
    ChannelFailure::new(code::NETWORK_ERROR, "host unreachable")
}

// ============================================================================
// READ PATH
// ============================================================================

#[tokio::test]
async fn missing_artifact_binds_default() {
    let store = library_store();
    let bound: Settings = store.bind("settings", dark()).await.unwrap();
    assert_eq!(bound, dark());
}

#[tokio::test]
async fn existing_artifact_wins_over_default() {
    let store = library_store();
    store
        .channel()
        .seed("library/settings.json", br#"{"theme":"dark"}"#.to_vec());

    let bound: Settings = store.bind("settings", light()).await.unwrap();
    assert_eq!(bound, dark());
}

#[tokio::test]
async fn permission_denied_read_is_not_retried() {
    let store = library_store();
    store.channel().fail_next(
        ChannelMethod::Read,
        ChannelFailure::new(code::PERMISSION_DENIED, "read-only volume"),
    );

    let err = store.bind::<Settings>("settings", dark()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(store.channel().call_count(ChannelMethod::Read), 1);
}

#[tokio::test(start_paused = true)]
async fn network_error_read_retries_to_ceiling() {
    let store = library_store();
    store
        .channel()
        .fail_times(ChannelMethod::Read, network_failure(), 3);

    let err = store.bind::<Settings>("settings", dark()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert_eq!(store.channel().call_count(ChannelMethod::Read), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_read_failure_recovers_within_budget() {
    let store = library_store();
    store
        .channel()
        .seed("library/settings.json", br#"{"theme":"dark"}"#.to_vec());
    store
        .channel()
        .fail_times(ChannelMethod::Read, network_failure(), 2);

    let bound: Settings = store.bind("settings", light()).await.unwrap();
    assert_eq!(bound, dark());
    assert_eq!(store.channel().call_count(ChannelMethod::Read), 3);
}

// ============================================================================
// WRITE COALESCING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn writes_within_window_coalesce_to_last_value() {
    let store = library_store();
    store.set("settings", &json!({"rev": 1})).unwrap();
    sleep(Duration::from_millis(100)).await;
    store.set("settings", &json!({"rev": 2})).unwrap();

    sleep(WINDOW + Duration::from_millis(10)).await;

    assert_eq!(store.channel().call_count(ChannelMethod::Write), 1);
    let written: Value =
        serde_json::from_slice(&store.channel().contents("library/settings.json").unwrap())
            .unwrap();
    assert_eq!(written, json!({"rev": 2}));
}

#[tokio::test(start_paused = true)]
async fn sequential_windows_write_in_order() {
    let store = library_store();

    store.set("settings", &json!({"rev": 1})).unwrap();
    sleep(WINDOW + Duration::from_millis(10)).await;
    assert_eq!(store.channel().call_count(ChannelMethod::Write), 1);
    let first: Value =
        serde_json::from_slice(&store.channel().contents("library/settings.json").unwrap())
            .unwrap();
    assert_eq!(first, json!({"rev": 1}));

    store.set("settings", &json!({"rev": 2})).unwrap();
    sleep(WINDOW + Duration::from_millis(10)).await;
    assert_eq!(store.channel().call_count(ChannelMethod::Write), 2);
    let second: Value =
        serde_json::from_slice(&store.channel().contents("library/settings.json").unwrap())
            .unwrap();
    assert_eq!(second, json!({"rev": 2}));
}

#[tokio::test(start_paused = true)]
async fn five_rapid_mutations_produce_one_write_with_the_fifth_value() {
    let store = library_store();
    for rev in 1..=5 {
        store.set("draft", &json!({"rev": rev})).unwrap();
        sleep(Duration::from_millis(20)).await;
    }

    sleep(WINDOW).await;

    assert_eq!(store.channel().call_count(ChannelMethod::Write), 1);
    let written: Value =
        serde_json::from_slice(&store.channel().contents("library/draft.json").unwrap()).unwrap();
    assert_eq!(written, json!({"rev": 5}));
}

#[tokio::test(start_paused = true)]
async fn settings_scenario_persists_the_new_theme() {
    let store = library_store();

    let bound: Settings = store.bind("settings", dark()).await.unwrap();
    assert_eq!(bound, dark());

    store.set("settings", &light()).unwrap();
    sleep(WINDOW + Duration::from_millis(10)).await;

    let written: Value =
        serde_json::from_slice(&store.channel().contents("library/settings.json").unwrap())
            .unwrap();
    assert_eq!(written, json!({"theme": "light"}));
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_commit_without_waiting_on_each_other() {
    let store = DocumentStore::new(
        MemoryChannel::new(),
        StoreConfig::new("library")
            .with_coalesce(CoalesceConfig::new().with_window(Duration::from_millis(100))),
    );
    store
        .channel()
        .set_latency(ChannelMethod::Write, Duration::from_millis(100));

    store.set("alpha", &json!(1)).unwrap();
    store.set("beta", &json!(2)).unwrap();

    // Windows fire at 100ms; each write takes 100ms. Were the two keys
    // serialized against each other the second would land at 300ms.
    sleep(Duration::from_millis(220)).await;

    assert_eq!(store.channel().call_count(ChannelMethod::Write), 2);
    assert!(store.channel().contents("library/alpha.json").is_some());
    assert!(store.channel().contents("library/beta.json").is_some());
}

// ============================================================================
// REMOVE / CLEAR
// ============================================================================

#[tokio::test(start_paused = true)]
async fn remove_deletes_artifact_and_binds_default_afterwards() {
    let store = library_store();
    store
        .channel()
        .seed("library/recent.json", br#"["book-1"]"#.to_vec());

    let bound: Vec<String> = store.bind("recent", Vec::new()).await.unwrap();
    assert_eq!(bound, vec!["book-1".to_string()]);

    store.remove("recent").await.unwrap();
    assert!(store.channel().contents("library/recent.json").is_none());

    let rebound: Vec<String> = store.bind("recent", Vec::new()).await.unwrap();
    assert!(rebound.is_empty());
    // The removed entry resolves without another channel read.
    assert_eq!(store.channel().call_count(ChannelMethod::Read), 1);
}

#[tokio::test(start_paused = true)]
async fn remove_cancels_a_pending_coalesced_write() {
    let store = library_store();
    store.set("scratch", &json!("doomed")).unwrap();
    store.remove("scratch").await.unwrap();

    sleep(WINDOW * 2).await;

    assert_eq!(store.channel().call_count(ChannelMethod::Write), 0);
    assert!(store.channel().contents("library/scratch.json").is_none());
}

#[tokio::test(start_paused = true)]
async fn clear_all_wipes_namespace_pending_writes_and_cache() {
    let store = library_store();
    store.set("a", &json!(1)).unwrap();
    store.flush_all().await.unwrap();
    store.set("b", &json!(2)).unwrap();
    assert_eq!(store.pending_writes(), vec!["b".to_string()]);

    store.clear_all().await.unwrap();

    assert!(store.pending_writes().is_empty());
    assert_eq!(store.stats().entry_count, 0);
    assert!(store.channel().paths().is_empty());

    // The cancelled write never lands.
    sleep(WINDOW * 2).await;
    assert!(store.channel().contents("library/b.json").is_none());
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn failed_flush_rolls_back_to_last_confirmed_value() {
    let store = library_store();
    store
        .channel()
        .seed("library/settings.json", br#"{"theme":"dark"}"#.to_vec());

    let bound: Settings = store.bind("settings", light()).await.unwrap();
    assert_eq!(bound, dark());

    let mut rx = store.subscribe("settings");
    rx.borrow_and_update();

    store.channel().fail_times(ChannelMethod::Write, network_failure(), 3);
    store.set("settings", &light()).unwrap();

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(json!({"theme": "light"})));

    // Window plus two linear backoffs, then the rollback.
    sleep(WINDOW + Duration::from_millis(700)).await;

    assert_eq!(store.channel().call_count(ChannelMethod::Write), 3);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(json!({"theme": "dark"})));

    let after: Settings = store.bind("settings", light()).await.unwrap();
    assert_eq!(after, dark());

    // The durable artifact was never touched.
    let on_disk: Value =
        serde_json::from_slice(&store.channel().contents("library/settings.json").unwrap())
            .unwrap();
    assert_eq!(on_disk, json!({"theme": "dark"}));
}

#[tokio::test(start_paused = true)]
async fn failed_flush_without_baseline_forgets_the_key() {
    let store = library_store();
    store.channel().fail_times(ChannelMethod::Write, network_failure(), 3);

    store.set("scratch", &json!("never-durable")).unwrap();
    sleep(WINDOW + Duration::from_millis(700)).await;

    // Nothing confirmed to roll back to; the next bind starts from scratch.
    let bound: Value = store.bind("scratch", json!("fresh")).await.unwrap();
    assert_eq!(bound, json!("fresh"));
}

#[tokio::test]
async fn direct_flush_failure_propagates_to_the_caller() {
    let store = library_store();
    store.channel().fail_times(
        ChannelMethod::Write,
        ChannelFailure::new(code::PERMISSION_DENIED, "read-only volume"),
        1,
    );

    store.set("settings", &light()).unwrap();
    let err = store.flush("settings").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

// ============================================================================
// VISIBILITY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn subscription_sees_optimistic_value_before_durability() {
    let store = library_store();
    let mut rx = store.subscribe("settings");

    store.set("settings", &light()).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(json!({"theme": "light"})));

    // Visible immediately; not yet durable.
    assert_eq!(store.channel().call_count(ChannelMethod::Write), 0);

    store.flush("settings").await.unwrap();
    assert_eq!(store.channel().call_count(ChannelMethod::Write), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_all_commits_every_pending_key() {
    let store = library_store();
    store.set("a", &json!(1)).unwrap();
    store.set("b", &json!(2)).unwrap();

    store.flush_all().await.unwrap();

    assert_eq!(
        store.channel().paths(),
        vec!["library/a.json".to_string(), "library/b.json".to_string()]
    );
    assert!(store.pending_writes().is_empty());
}
