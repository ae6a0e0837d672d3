use axum::http::StatusCode;
use polyledger::api::{self, AppState};
use polyledger::config::{Config, EntityBinding, SourceConfig};
use polyledger::datasource::{GraphSource, MockGraphSource};
use polyledger::db::Store;
use polyledger::entities::{CONDITION, ENRICHED_ORDER_FILLED, MERGE, REDEMPTION, SPLIT};
use polyledger::rebuild::RebuildEngine;
use polyledger::stats::StatsRegistry;
use polyledger::sync::TokenFiller;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    _temp: TempDir,
}

fn test_config() -> Config {
    Config {
        api_key: "test-key".to_string(),
        db_path: ":memory:".to_string(),
        sync_interval_seconds: 60,
        port: 0,
        graph_host: "http://example.invalid".to_string(),
        sources: vec![SourceConfig {
            name: "PolymarketPnl".to_string(),
            subgraph_id: "pnl-sub".to_string(),
            entities: vec![EntityBinding {
                entity: "Condition".to_string(),
                table: "pnl_condition".to_string(),
            }],
        }],
    }
}

fn setup_app() -> TestApp {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.duckdb").to_string_lossy().to_string();
    let store = Arc::new(Store::open(&db_path).unwrap());
    store.init_infra().unwrap();
    for entity in [
        &CONDITION,
        &ENRICHED_ORDER_FILLED,
        &SPLIT,
        &MERGE,
        &REDEMPTION,
    ] {
        store.init_entity(entity).unwrap();
    }

    // A dust-sized and a displayable position for the same user.
    store
        .execute(
            "INSERT INTO condition VALUES \
             ('0xc1', '0xq1', '0xo', 2, NULL, NULL, NULL, '[\"0xt1\",\"0xt2\"]'), \
             ('0xc2', '0xq2', '0xo', 2, NULL, NULL, NULL, '[\"0xt3\",\"0xt4\"]')",
        )
        .unwrap();
    store
        .execute(
            "INSERT INTO enriched_order_filled VALUES \
             ('f1', 100, '0xm', '0xa', '0xt1', 'Buy', '1000000', 0.4), \
             ('f2', 200, '0xm', '0xa', '0xt1', 'Sell', '1000000', 0.6), \
             ('f3', 300, '0xm', '0xa', '0xt3', 'Buy', '60000000', 0.5)",
        )
        .unwrap();

    let engine = Arc::new(RebuildEngine::new(
        store.clone(),
        temp.path().join("pnl"),
    ));
    engine.rebuild_all();

    let stats = Arc::new(StatsRegistry::new(store.clone()));
    let client: Arc<dyn GraphSource> = Arc::new(MockGraphSource::new());
    let filler = Arc::new(TokenFiller::new(store.clone(), client, &test_config()));

    let app = api::create_router(AppState {
        store,
        stats,
        engine,
        filler,
    });
    TestApp { app, _temp: temp }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_timeline_reports_events_and_pnl() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/replay?user=0xa").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "0xa");
    assert_eq!(body["total_events"], 3);
    assert_eq!(body["first_ts"], 100);
    assert_eq!(body["last_ts"], 300);
    let timeline = body["timeline"].as_array().unwrap();
    // The sell at 0.60 against a 0.40 cost basis realizes $0.20.
    assert_eq!(timeline[1]["rpnl"], 200_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_unknown_user_is_404() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/replay?user=0xnobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_missing_user_is_400() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/replay").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn positions_at_filters_dust() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/replay-positions?user=0xa&ts=1000").await;
    assert_eq!(status, StatusCode::OK);
    // Only the 60-token position on c2 survives the $50 dust filter; the
    // closed c1 position does not.
    assert_eq!(body["count"], 1);
    assert_eq!(body["positions"][0]["id"], "0xc2");
    assert_eq!(body["positions"][0]["pos"][0], 60_000_000);
    assert_eq!(body["dust_threshold"], 50_000_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_trades_returns_window() {
    let test_app = setup_app();
    let (status, body) = get(
        test_app.app,
        "/api/replay-trades?user=0xa&ts=200&radius=1",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1]["ts"], 200);
    assert_eq!(body["center"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_users_ranks_by_activity() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/replay-users?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    // Both users have three events; either may rank first.
    assert!(list[0]["event_count"] == 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuild_status_reflects_completed_rebuild() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/rebuild-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["phase"], 7);
    assert_eq!(body["total_conditions"], 2);
    assert_eq!(body["total_users"], 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn check_persist_reports_absence() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/rebuild-check-persist").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["file_size"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuild_load_without_persist_is_400() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/rebuild-load").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn sql_endpoint_allows_selects_only() {
    let test_app = setup_app();

    let (status, body) = get(
        test_app.app.clone(),
        "/api/sql?q=SELECT%20id%20FROM%20condition%20ORDER%20BY%20id",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "0xc1");

    let (status, body) = get(test_app.app, "/api/sql?q=DROP%20TABLE%20condition").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_lists_every_entity_table() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    for table in [
        "condition",
        "enriched_order_filled",
        "split",
        "merge",
        "redemption",
        "pnl_condition",
    ] {
        assert!(body.get(table).is_some(), "missing table {}", table);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_progress_includes_filler_state() {
    let test_app = setup_app();
    let (status, body) = get(test_app.app, "/api/sync-progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filler_running"], false);
    assert_eq!(body["eof_min_ts"], 100);
    assert!(body["now_ts"].as_i64().unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn indexer_fails_requires_params() {
    let test_app = setup_app();
    let (status, _) = get(test_app.app.clone(), "/api/indexer-fails").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(
        test_app.app,
        "/api/indexer-fails?source=Polymarket&entity=Split",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_allow_any_origin() {
    let test_app = setup_app();
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/stats")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = test_app.app.oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}
