//! Token-id filler: completes `condition.positionIds` from the PnL source.
//!
//! Phase 1 is a set-based merge from the already-ingested mapping table.
//! Phase 2 walks the remaining NULL rows in resolution order, querying the
//! PnL subgraph in batches; ids the subgraph does not know are tombstoned
//! with `[]` so they are never reselected.

use crate::config::Config;
use crate::datasource::{build_target, GraphSource};
use crate::db::Store;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FILL_BATCH_SIZE: usize = 100;
const RETRY_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, serde::Serialize)]
pub struct FillerProgress {
    pub running: bool,
    pub phase: i64,
    pub total_null: i64,
    pub merged: i64,
    pub processed: i64,
    pub not_found: i64,
    pub errors: i64,
    pub start_ts: i64,
}

pub struct TokenFiller {
    store: Arc<Store>,
    client: Arc<dyn GraphSource>,
    pnl_target: String,

    running: AtomicBool,
    phase: AtomicI64,
    total_null: AtomicI64,
    merged: AtomicI64,
    processed: AtomicI64,
    not_found: AtomicI64,
    errors: AtomicI64,
    start_ts: AtomicI64,
}

impl TokenFiller {
    /// Resolve the PnL source target from the config; its absence is a
    /// deployment error.
    pub fn new(store: Arc<Store>, client: Arc<dyn GraphSource>, config: &Config) -> Self {
        let pnl_target = config
            .sources
            .iter()
            .find(|source| source.entities.iter().any(|b| b.table == "pnl_condition"))
            .map(|source| build_target(&source.subgraph_id))
            .expect("PnL source not found in config");
        Self {
            store,
            client,
            pnl_target,
            running: AtomicBool::new(false),
            phase: AtomicI64::new(0),
            total_null: AtomicI64::new(0),
            merged: AtomicI64::new(0),
            processed: AtomicI64::new(0),
            not_found: AtomicI64::new(0),
            errors: AtomicI64::new(0),
            start_ts: AtomicI64::new(0),
        }
    }

    /// Start the job in the background. Only one instance may run.
    pub fn start(self: &Arc<Self>) -> &'static str {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return "already_running";
        }
        self.phase.store(0, Ordering::Relaxed);
        self.total_null.store(0, Ordering::Relaxed);
        self.merged.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.not_found.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.start_ts.store(0, Ordering::Relaxed);

        let filler = self.clone();
        tokio::spawn(async move { filler.run().await });
        "started"
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> FillerProgress {
        FillerProgress {
            running: self.running.load(Ordering::Relaxed),
            phase: self.phase.load(Ordering::Relaxed),
            total_null: self.total_null.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            start_ts: self.start_ts.load(Ordering::Relaxed),
        }
    }

    async fn run(&self) {
        self.start_ts
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        let total_null = self
            .store
            .query_single_int("SELECT COUNT(*) FROM condition WHERE positionIds IS NULL");
        self.total_null.store(total_null, Ordering::Relaxed);
        info!("[filler] start, {} NULL rows", total_null);

        // Phase 1: bulk merge from the PnL mapping table.
        self.phase.store(1, Ordering::Relaxed);
        self.store
            .merge_pnl_into_condition()
            .expect("store write failed");
        let remaining = self
            .store
            .query_single_int("SELECT COUNT(*) FROM condition WHERE positionIds IS NULL");
        self.merged.store(total_null - remaining, Ordering::Relaxed);
        info!(
            "[filler] phase 1 done: merged {}, remaining {}",
            total_null - remaining,
            remaining
        );

        // Phase 2: batch-fill the stragglers.
        self.phase.store(2, Ordering::Relaxed);
        loop {
            let ids = self
                .store
                .null_position_id_conditions(FILL_BATCH_SIZE)
                .expect("store read failed");
            if ids.is_empty() {
                break;
            }

            let Some(items) = self.fetch_batch(&ids).await else {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(RETRY_SLEEP).await;
                continue;
            };

            let mut found: HashSet<String> = HashSet::new();
            for item in &items {
                let Some(id) = item.get("id").and_then(Value::as_str) else {
                    continue;
                };
                found.insert(id.to_string());
                if let Some(position_ids) = item.get("positionIds") {
                    if !position_ids.is_null() {
                        self.store
                            .update_condition_position_ids(id, &position_ids.to_string())
                            .expect("store write failed");
                        self.processed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            // Ids the PnL subgraph does not know either: tombstone them.
            for id in &ids {
                if !found.contains(id) {
                    self.store
                        .update_condition_position_ids(id, "[]")
                        .expect("store write failed");
                    self.not_found.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        info!(
            "[filler] done: filled {}, merged {}, not found {}, errors {}",
            self.processed.load(Ordering::Relaxed),
            self.merged.load(Ordering::Relaxed),
            self.not_found.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        );
        self.phase.store(0, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
    }

    /// One `id_in` query; None on any retryable failure.
    async fn fetch_batch(&self, ids: &[String]) -> Option<Vec<Value>> {
        let id_list = ids
            .iter()
            .map(|id| format!("\"{}\"", id))
            .collect::<Vec<_>>()
            .join(",");
        let query = format!(
            "{{conditions(first:{},where:{{id_in:[{}]}}){{id positionIds}}}}",
            FILL_BATCH_SIZE, id_list
        );
        let body = json!({ "query": query }).to_string();

        let text = match self.client.post(&self.pnl_target, body).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[filler] request failed, retrying: {}", e);
                return None;
            }
        };
        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                warn!("[filler] JSON parse failed, retrying");
                return None;
            }
        };
        if parsed.get("errors").is_some() {
            warn!("[filler] GraphQL error, retrying");
            return None;
        }
        parsed
            .get("data")
            .and_then(|d| d.get("conditions"))
            .and_then(Value::as_array)
            .cloned()
    }
}
