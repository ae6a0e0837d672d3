use polyledger::datasource::{MockGraphSource, SourceError};
use polyledger::db::{Store, SyncCursor};
use polyledger::entities::SPLIT;
use polyledger::stats::StatsRegistry;
use polyledger::sync::EntityExecutor;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct TestHarness {
    store: Arc<Store>,
    stats: Arc<StatsRegistry>,
    _temp: TempDir,
}

fn setup() -> TestHarness {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.duckdb").to_string_lossy().to_string();
    let store = Arc::new(Store::open(&db_path).unwrap());
    store.init_infra().unwrap();
    store.init_entity(&SPLIT).unwrap();
    let stats = Arc::new(StatsRegistry::new(store.clone()));
    stats.init("Activity", SPLIT.name, 0, SPLIT.row_size_estimate());
    TestHarness {
        store,
        stats,
        _temp: temp,
    }
}

fn executor(harness: &TestHarness, source: Arc<MockGraphSource>) -> EntityExecutor {
    EntityExecutor::new(
        "Activity".to_string(),
        "/api/subgraphs/id/test".to_string(),
        &SPLIT,
        harness.store.clone(),
        harness.stats.clone(),
        source,
    )
}

fn split_item(id: &str, timestamp: i64) -> Value {
    json!({
        "id": id,
        "timestamp": timestamp.to_string(),
        "stakeholder": "0xuser",
        "condition": "0xcond",
        "amount": "1000000"
    })
}

fn page(items: &[Value]) -> String {
    json!({ "data": { "splits": items } }).to_string()
}

#[tokio::test]
async fn short_page_writes_rows_and_cursor_atomically() {
    let harness = setup();
    let items = vec![
        split_item("s1", 100),
        split_item("s2", 100),
        split_item("s3", 200),
    ];
    let source = Arc::new(MockGraphSource::new().with_response(page(&items)));

    executor(&harness, source).run().await;

    assert_eq!(harness.store.get_table_count("split"), 3);
    let cursor = harness.store.get_cursor("Activity", "Split").unwrap();
    assert_eq!(
        cursor,
        SyncCursor {
            value: "200".to_string(),
            skip: 1
        }
    );
}

#[tokio::test]
async fn empty_first_page_finishes_without_writes() {
    let harness = setup();
    let source = Arc::new(MockGraphSource::new().with_response(page(&[])));

    executor(&harness, source).run().await;

    assert_eq!(harness.store.get_table_count("split"), 0);
    assert_eq!(
        harness.store.get_cursor("Activity", "Split").unwrap(),
        SyncCursor::default()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn full_page_paginates_with_skip() {
    let harness = setup();
    let full_page: Vec<Value> = (0..1000)
        .map(|i| split_item(&format!("s{}", i), 100))
        .collect();
    let short_page: Vec<Value> = (0..5)
        .map(|i| split_item(&format!("t{}", i), 200))
        .collect();
    let source = Arc::new(
        MockGraphSource::new()
            .with_response(page(&full_page))
            .with_response(page(&short_page)),
    );

    executor(&harness, source.clone()).run().await;

    assert_eq!(harness.store.get_table_count("split"), 1005);
    let cursor = harness.store.get_cursor("Activity", "Split").unwrap();
    assert_eq!(
        cursor,
        SyncCursor {
            value: "200".to_string(),
            skip: 5
        }
    );

    // The second request continues from the first page's cursor.
    let requests = source.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].1.contains("timestamp_gte:100"));
    assert!(requests[1].1.contains("skip:1000"));
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_failures_back_off_then_recover() {
    let harness = setup();
    let source = Arc::new(
        MockGraphSource::new()
            .with_error(SourceError::Network("connection reset".to_string()))
            .with_response("this is not json".to_string())
            .with_response(page(&[split_item("s1", 100)])),
    );

    executor(&harness, source).run().await;

    assert_eq!(harness.store.get_table_count("split"), 1);
    let dump: Value = serde_json::from_str(&harness.stats.dump()).unwrap();
    let stat = &dump["Activity/Split"];
    assert_eq!(stat["fail_network"], json!(1));
    assert_eq!(stat["fail_json"], json!(1));
    assert_eq!(stat["total_requests"], json!(3));
    assert_eq!(stat["success_requests"], json!(1));
    assert_eq!(stat["sync_done"], json!(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn graphql_errors_attribute_bad_indexers() {
    let harness = setup();
    let error_body = json!({
        "errors": [{
            "message": "query failed, bad indexers: {0xAAA: BadResponse(missing block), 0xBBB: Unavailable, 0xCCC: BadResponse(timeout)}"
        }]
    })
    .to_string();
    let source = Arc::new(
        MockGraphSource::new()
            .with_response(error_body)
            .with_response(page(&[])),
    );

    executor(&harness, source).run().await;

    assert_eq!(
        harness.stats.indexer_fail_count("Activity", "Split", "0xAAA"),
        1
    );
    assert_eq!(
        harness.stats.indexer_fail_count("Activity", "Split", "0xCCC"),
        1
    );
    assert_eq!(
        harness.stats.indexer_fail_count("Activity", "Split", "0xBBB"),
        0
    );

    let dump: Value = serde_json::from_str(&harness.stats.dump()).unwrap();
    assert_eq!(dump["Activity/Split"]["fail_graphql"], json!(1));
}

#[tokio::test]
async fn missing_data_field_is_a_format_failure() {
    let harness = setup();
    let source = Arc::new(
        MockGraphSource::new()
            .with_response(json!({ "data": {} }).to_string())
            .with_response(page(&[])),
    );

    executor(&harness, source).run().await;

    let dump: Value = serde_json::from_str(&harness.stats.dump()).unwrap();
    assert_eq!(dump["Activity/Split"]["fail_format"], json!(1));
}
