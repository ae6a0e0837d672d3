//! Per-(source, entity) sync telemetry.
//!
//! One registry instance is created at startup and shared by `Arc`. Counters
//! live behind a single mutex; persistence to the meta tables is throttled
//! so a burst of requests costs at most one write every few seconds, and the
//! JSON dump consumed by the API is cached with a short TTL.

use crate::db::Store;
use crate::entities::escape_sql;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiState {
    Idle,
    Calling,
    Processing,
}

impl ApiState {
    fn as_str(self) -> &'static str {
        match self {
            ApiState::Idle => "idle",
            ApiState::Calling => "calling",
            ApiState::Processing => "processing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Json,
    GraphQl,
    Format,
}

const RECENT_LATENCY_WINDOW: usize = 20;
const PERSIST_INTERVAL: Duration = Duration::from_secs(5);
const DUMP_CACHE_TTL: Duration = Duration::from_millis(200);

#[derive(Debug)]
struct EntityStat {
    source: String,
    entity: String,

    // Row count, seeded from the table and incremented per page.
    count: i64,
    row_size_bytes: i64,

    // Historical accumulators (persisted).
    total_rows_synced: i64,
    total_api_time_ms: i64,
    total_requests: i64,
    success_requests: i64,
    fail_network: i64,
    fail_json: i64,
    fail_graphql: i64,
    fail_format: i64,
    success_rate: f64,

    // Last 20 request latencies (not persisted).
    recent_latencies: VecDeque<i64>,

    is_syncing: bool,
    sync_done: bool,
    api_state: ApiState,
    last_persist: Instant,
}

impl EntityStat {
    fn new(source: &str, entity: &str) -> Self {
        Self {
            source: source.to_string(),
            entity: entity.to_string(),
            count: 0,
            row_size_bytes: 0,
            total_rows_synced: 0,
            total_api_time_ms: 0,
            total_requests: 0,
            success_requests: 0,
            fail_network: 0,
            fail_json: 0,
            fail_graphql: 0,
            fail_format: 0,
            success_rate: 100.0,
            recent_latencies: VecDeque::new(),
            is_syncing: false,
            sync_done: false,
            api_state: ApiState::Idle,
            last_persist: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct IndexerFailStat {
    source: String,
    entity: String,
    indexer: String,
    fail_requests: i64,
    loaded: bool,
    last_persist: Instant,
}

#[derive(Default)]
struct Inner {
    stats: HashMap<String, EntityStat>,
    indexer_fails: HashMap<String, IndexerFailStat>,
    cached_dump: String,
    cached_at: Option<Instant>,
}

pub struct StatsRegistry {
    store: Arc<Store>,
    inner: Mutex<Inner>,
}

impl StatsRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register an entity: seed its row count and size estimate, and load
    /// persisted history from the meta table.
    pub fn init(&self, source: &str, entity: &str, count: i64, row_size_bytes: i64) {
        let mut inner = self.inner.lock().unwrap();
        let stat = inner
            .stats
            .entry(key(source, entity))
            .or_insert_with(|| EntityStat::new(source, entity));
        stat.count = count;
        stat.row_size_bytes = row_size_bytes;
        stat.last_persist = Instant::now();
        self.load_entity_stat(stat);
    }

    pub fn start_sync(&self, source: &str, entity: &str) {
        let mut inner = self.inner.lock().unwrap();
        let stat = inner
            .stats
            .entry(key(source, entity))
            .or_insert_with(|| EntityStat::new(source, entity));
        stat.is_syncing = true;
        stat.sync_done = false;
        stat.api_state = ApiState::Idle;
    }

    /// Mark an entity's round complete and force its stats to disk.
    pub fn end_sync(&self, source: &str, entity: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stat) = inner.stats.get_mut(&key(source, entity)) {
            stat.is_syncing = false;
            stat.sync_done = true;
            stat.api_state = ApiState::Idle;
            self.save_entity_stat(stat);
            stat.last_persist = Instant::now();
        }
    }

    pub fn set_api_state(&self, source: &str, entity: &str, state: ApiState) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stat) = inner.stats.get_mut(&key(source, entity)) {
            stat.api_state = state;
        }
    }

    /// Record a successful request; `latency_ms` covers the API round trip
    /// only, not local processing.
    pub fn record_success(&self, source: &str, entity: &str, records: i64, latency_ms: i64) {
        let mut inner = self.inner.lock().unwrap();
        let stat = inner
            .stats
            .entry(key(source, entity))
            .or_insert_with(|| EntityStat::new(source, entity));
        stat.count += records;
        stat.success_requests += 1;
        stat.total_rows_synced += records;
        self.update_after_request(stat, latency_ms);
    }

    pub fn record_failure(&self, source: &str, entity: &str, kind: FailureKind, latency_ms: i64) {
        let mut inner = self.inner.lock().unwrap();
        let stat = inner
            .stats
            .entry(key(source, entity))
            .or_insert_with(|| EntityStat::new(source, entity));
        match kind {
            FailureKind::Network => stat.fail_network += 1,
            FailureKind::Json => stat.fail_json += 1,
            FailureKind::GraphQl => stat.fail_graphql += 1,
            FailureKind::Format => stat.fail_format += 1,
        }
        self.update_after_request(stat, latency_ms);
    }

    /// Per-indexer failure attribution. Only failures can be attributed.
    pub fn record_indexer_fail(&self, source: &str, entity: &str, indexer: &str) {
        assert!(!indexer.is_empty());
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .indexer_fails
            .entry(format!("{}/{}/{}", source, entity, indexer))
            .or_insert_with(|| IndexerFailStat {
                source: source.to_string(),
                entity: entity.to_string(),
                indexer: indexer.to_string(),
                fail_requests: 0,
                loaded: false,
                last_persist: Instant::now(),
            });
        if !entry.loaded {
            entry.fail_requests = self.store.query_single_int(&format!(
                "SELECT fail_requests FROM indexer_fail_meta WHERE source = {} AND entity = {} AND indexer = {}",
                escape_sql(source),
                escape_sql(entity),
                escape_sql(indexer)
            ));
            entry.loaded = true;
        }
        entry.fail_requests += 1;

        if entry.last_persist.elapsed() >= PERSIST_INTERVAL {
            save_indexer_fail(&self.store, entry);
            entry.last_persist = Instant::now();
        }
    }

    /// Current in-memory fail count for one indexer (0 if never seen).
    pub fn indexer_fail_count(&self, source: &str, entity: &str, indexer: &str) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner
            .indexer_fails
            .get(&format!("{}/{}/{}", source, entity, indexer))
            .map(|s| s.fail_requests)
            .unwrap_or(0)
    }

    /// Row count for an entity name summed across sources.
    pub fn total_count_for_entity(&self, entity: &str) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner
            .stats
            .values()
            .filter(|s| s.entity == entity)
            .map(|s| s.count)
            .sum()
    }

    /// JSON dump of every entity's stats, rebuilt at most every 200 ms.
    pub fn dump(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner
            .cached_at
            .map(|at| at.elapsed() < DUMP_CACHE_TTL)
            .unwrap_or(false);
        if !fresh || inner.cached_dump.is_empty() {
            let mut result = Map::new();
            for (k, stat) in &inner.stats {
                result.insert(k.clone(), dump_entity(stat));
            }
            inner.cached_dump = Value::Object(result).to_string();
            inner.cached_at = Some(Instant::now());
        }
        inner.cached_dump.clone()
    }

    fn update_after_request(&self, stat: &mut EntityStat, latency_ms: i64) {
        stat.total_requests += 1;
        stat.total_api_time_ms += latency_ms;

        stat.recent_latencies.push_back(latency_ms);
        if stat.recent_latencies.len() > RECENT_LATENCY_WINDOW {
            stat.recent_latencies.pop_front();
        }

        stat.success_rate = stat.success_requests as f64 / stat.total_requests as f64 * 100.0;

        if stat.last_persist.elapsed() >= PERSIST_INTERVAL {
            self.save_entity_stat(stat);
            stat.last_persist = Instant::now();
        }
    }

    fn load_entity_stat(&self, stat: &mut EntityStat) {
        let sql = format!(
            "SELECT total_requests, success_requests, fail_network, fail_json, fail_graphql, \
             fail_format, total_rows_synced, total_api_time_ms, success_rate \
             FROM entity_stats_meta WHERE source = {} AND entity = {}",
            escape_sql(&stat.source),
            escape_sql(&stat.entity)
        );
        let rows = match self.store.query_rows(&sql) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("failed to load stats for {}/{}: {}", stat.source, stat.entity, e);
                return;
            }
        };
        if let Some(row) = rows.first() {
            stat.total_requests = int_field(row, "total_requests");
            stat.success_requests = int_field(row, "success_requests");
            stat.fail_network = int_field(row, "fail_network");
            stat.fail_json = int_field(row, "fail_json");
            stat.fail_graphql = int_field(row, "fail_graphql");
            stat.fail_format = int_field(row, "fail_format");
            stat.total_rows_synced = int_field(row, "total_rows_synced");
            stat.total_api_time_ms = int_field(row, "total_api_time_ms");
            stat.success_rate = row
                .get("success_rate")
                .and_then(Value::as_f64)
                .unwrap_or(100.0);
        }
    }

    fn save_entity_stat(&self, stat: &EntityStat) {
        let sql = format!(
            "INSERT OR REPLACE INTO entity_stats_meta \
             (source, entity, total_requests, success_requests, fail_network, fail_json, \
              fail_graphql, fail_format, total_rows_synced, total_api_time_ms, success_rate, updated_at) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, CURRENT_TIMESTAMP)",
            escape_sql(&stat.source),
            escape_sql(&stat.entity),
            stat.total_requests,
            stat.success_requests,
            stat.fail_network,
            stat.fail_json,
            stat.fail_graphql,
            stat.fail_format,
            stat.total_rows_synced,
            stat.total_api_time_ms,
            stat.success_rate,
        );
        if let Err(e) = self.store.execute(&sql) {
            warn!("failed to persist stats for {}/{}: {}", stat.source, stat.entity, e);
        }
    }
}

fn key(source: &str, entity: &str) -> String {
    format!("{}/{}", source, entity)
}

fn int_field(row: &Map<String, Value>, name: &str) -> i64 {
    row.get(name).and_then(Value::as_i64).unwrap_or(0)
}

fn save_indexer_fail(store: &Store, stat: &IndexerFailStat) {
    let sql = format!(
        "INSERT OR REPLACE INTO indexer_fail_meta (source, entity, indexer, fail_requests, updated_at) \
         VALUES ({}, {}, {}, {}, CURRENT_TIMESTAMP)",
        escape_sql(&stat.source),
        escape_sql(&stat.entity),
        escape_sql(&stat.indexer),
        stat.fail_requests,
    );
    if let Err(e) = store.execute(&sql) {
        warn!("failed to persist indexer fails for {}: {}", stat.indexer, e);
    }
}

fn dump_entity(stat: &EntityStat) -> Value {
    // speed: historical rows per second of pure API time.
    let speed = if stat.total_rows_synced > 0 && stat.total_api_time_ms > 0 {
        stat.total_rows_synced as f64 / (stat.total_api_time_ms as f64 / 1000.0)
    } else {
        0.0
    };

    // Mean of the recent window; shown as 0 once the entity is done.
    let avg_latency = if !stat.sync_done && !stat.recent_latencies.is_empty() {
        stat.recent_latencies.iter().sum::<i64>() as f64 / stat.recent_latencies.len() as f64
    } else {
        0.0
    };

    let db_size_mb = if stat.row_size_bytes > 0 {
        stat.row_size_bytes as f64 * stat.count as f64 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    json!({
        "source": stat.source,
        "entity": stat.entity,
        "count": stat.count,
        "row_size_bytes": stat.row_size_bytes,
        "db_size_mb": db_size_mb,
        "speed": (speed * 10.0).round() / 10.0,
        "avg_latency_ms": avg_latency.round(),
        "success_rate": (stat.success_rate * 10.0).round() / 10.0,
        "success_requests": stat.success_requests,
        "total_requests": stat.total_requests,
        "fail_network": stat.fail_network,
        "fail_json": stat.fail_json,
        "fail_graphql": stat.fail_graphql,
        "fail_format": stat.fail_format,
        "is_syncing": stat.is_syncing,
        "sync_done": stat.sync_done,
        "total_rows_synced": stat.total_rows_synced,
        "api_state": stat.api_state.as_str(),
    })
}
