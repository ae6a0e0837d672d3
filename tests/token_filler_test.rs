use polyledger::config::{Config, EntityBinding, SourceConfig};
use polyledger::datasource::{GraphSource, MockGraphSource};
use polyledger::db::Store;
use polyledger::entities::{CONDITION, PNL_CONDITION};
use polyledger::sync::TokenFiller;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn pnl_config() -> Config {
    Config {
        api_key: "k".to_string(),
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

fn setup_store(temp: &TempDir) -> Arc<Store> {
    let db_path = temp.path().join("test.duckdb").to_string_lossy().to_string();
    let store = Arc::new(Store::open(&db_path).unwrap());
    store.init_entity(&CONDITION).unwrap();
    store.init_entity(&PNL_CONDITION).unwrap();
    store
        .execute(
            "INSERT INTO condition VALUES \
             ('0xc1', 'q', 'o', 2, 100, NULL, NULL, NULL), \
             ('0xc2', 'q', 'o', 2, 200, NULL, NULL, NULL), \
             ('0xc3', 'q', 'o', 2, 300, NULL, NULL, NULL)",
        )
        .unwrap();
    // The PnL mapping table already knows c1.
    store
        .execute("INSERT INTO pnl_condition VALUES ('0xc1', '[\"0xt1\",\"0xt2\"]')")
        .unwrap();
    store
}

async fn wait_for_completion(filler: &TokenFiller) {
    for _ in 0..500 {
        if !filler.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("filler did not finish");
}

#[tokio::test(flavor = "multi_thread")]
async fn filler_merges_fetches_and_tombstones() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp);

    // Phase 2 asks about c2 and c3; the subgraph only knows c2.
    let response = json!({
        "data": { "conditions": [
            { "id": "0xc2", "positionIds": ["0xt3", "0xt4"] }
        ]}
    })
    .to_string();
    let client: Arc<dyn GraphSource> = Arc::new(MockGraphSource::new().with_response(response));

    let filler = Arc::new(TokenFiller::new(store.clone(), client, &pnl_config()));
    assert_eq!(filler.start(), "started");
    wait_for_completion(&filler).await;

    let rows = store
        .query_rows("SELECT id, positionIds FROM condition ORDER BY id")
        .unwrap();
    assert_eq!(rows[0]["positionIds"], json!("[\"0xt1\",\"0xt2\"]"));
    assert_eq!(rows[1]["positionIds"], json!("[\"0xt3\",\"0xt4\"]"));
    assert_eq!(rows[2]["positionIds"], json!("[]"));

    let progress = filler.progress();
    assert!(!progress.running);
    assert_eq!(progress.phase, 0);
    assert_eq!(progress.total_null, 3);
    assert_eq!(progress.merged, 1);
    assert_eq!(progress.processed, 1);
    assert_eq!(progress.not_found, 1);
    assert_eq!(progress.errors, 0);
    assert!(progress.start_ts > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn filler_retries_after_transient_failures() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp);

    let response = json!({
        "data": { "conditions": [
            { "id": "0xc2", "positionIds": ["0xt3", "0xt4"] },
            { "id": "0xc3", "positionIds": ["0xt5", "0xt6"] }
        ]}
    })
    .to_string();
    let client: Arc<dyn GraphSource> = Arc::new(
        MockGraphSource::new()
            .with_response("garbage".to_string())
            .with_response(response),
    );

    let filler = Arc::new(TokenFiller::new(store.clone(), client, &pnl_config()));
    filler.start();
    wait_for_completion(&filler).await;

    let progress = filler.progress();
    assert_eq!(progress.errors, 1);
    assert_eq!(progress.processed, 2);
    assert_eq!(progress.not_found, 0);

    let remaining =
        store.query_single_int("SELECT COUNT(*) FROM condition WHERE positionIds IS NULL");
    assert_eq!(remaining, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_while_running_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp);

    // No scripted responses: the filler keeps retrying phase 2, so it stays
    // running long enough to observe the guard.
    let client: Arc<dyn GraphSource> = Arc::new(MockGraphSource::new());
    let filler = Arc::new(TokenFiller::new(store, client, &pnl_config()));

    assert_eq!(filler.start(), "started");
    assert_eq!(filler.start(), "already_running");
}
