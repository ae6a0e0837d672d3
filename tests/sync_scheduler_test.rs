use async_trait::async_trait;
use polyledger::config::{EntityBinding, SourceConfig};
use polyledger::datasource::{GraphSource, SourceError};
use polyledger::db::Store;
use polyledger::stats::StatsRegistry;
use polyledger::sync::SourceScheduler;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Routes responses by the plural name inside the query body, since the
/// scheduler's executors share one transport and race for it.
#[derive(Default)]
struct RoutingSource {
    splits: Mutex<VecDeque<String>>,
    merges: Mutex<VecDeque<String>>,
}

#[async_trait]
impl GraphSource for RoutingSource {
    async fn post(&self, _target: &str, body: String) -> Result<String, SourceError> {
        let queue = if body.contains("splits(") {
            &self.splits
        } else {
            &self.merges
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SourceError::Network("no scripted response".to_string()))
    }
}

fn item(id: &str, timestamp: i64) -> Value {
    json!({
        "id": id,
        "timestamp": timestamp.to_string(),
        "stakeholder": "0xuser",
        "condition": "0xcond",
        "amount": "1000000"
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_runs_every_entity_of_a_source() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.duckdb").to_string_lossy().to_string();
    let store = Arc::new(Store::open(&db_path).unwrap());
    store.init_infra().unwrap();
    let stats = Arc::new(StatsRegistry::new(store.clone()));

    let source = RoutingSource::default();
    source.splits.lock().unwrap().push_back(
        json!({ "data": { "splits": [item("s1", 100), item("s2", 200)] } }).to_string(),
    );
    source.merges.lock().unwrap().push_back(
        json!({ "data": { "merges": [item("m1", 150)] } }).to_string(),
    );
    let client: Arc<dyn GraphSource> = Arc::new(source);

    let config = SourceConfig {
        name: "Activity".to_string(),
        subgraph_id: "activity-sub".to_string(),
        entities: vec![
            EntityBinding {
                entity: "Split".to_string(),
                table: "split".to_string(),
            },
            EntityBinding {
                entity: "Merge".to_string(),
                table: "merge".to_string(),
            },
        ],
    };

    let global_slots = Arc::new(Semaphore::new(16));
    let scheduler = SourceScheduler::new(
        config,
        store.clone(),
        stats.clone(),
        client,
        global_slots,
    );
    scheduler.run().await;

    assert_eq!(store.get_table_count("split"), 2);
    assert_eq!(store.get_table_count("merge"), 1);
    assert_eq!(
        store.get_cursor("Activity", "Split").unwrap().value,
        "200"
    );
    assert_eq!(
        store.get_cursor("Activity", "Merge").unwrap().value,
        "150"
    );

    let dump: Value = serde_json::from_str(&stats.dump()).unwrap();
    assert_eq!(dump["Activity/Split"]["sync_done"], json!(true));
    assert_eq!(dump["Activity/Merge"]["sync_done"], json!(true));
    assert_eq!(dump["Activity/Split"]["total_rows_synced"], json!(2));
}
