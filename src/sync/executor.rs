//! Per-entity puller: drives one entity from its persisted cursor to
//! exhaustion, writing rows and cursor atomically.

use crate::datasource::{GraphSource, SourceError};
use crate::db::{Store, SyncCursor};
use crate::entities::{EntityDescriptor, SyncMode};
use crate::stats::{ApiState, FailureKind, StatsRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const GRAPHQL_BATCH_SIZE: usize = 1000;
const RETRY_BASE_DELAY_MS: u64 = 50;
const RETRY_MAX_DELAY_MS: u64 = 200;

pub struct EntityExecutor {
    source_name: String,
    target: String,
    entity: &'static EntityDescriptor,
    store: Arc<Store>,
    stats: Arc<StatsRegistry>,
    client: Arc<dyn GraphSource>,
}

impl EntityExecutor {
    pub fn new(
        source_name: String,
        target: String,
        entity: &'static EntityDescriptor,
        store: Arc<Store>,
        stats: Arc<StatsRegistry>,
        client: Arc<dyn GraphSource>,
    ) -> Self {
        Self {
            source_name,
            target,
            entity,
            store,
            stats,
            client,
        }
    }

    /// Pull pages until the source returns a short or empty page. Retryable
    /// failures back off and try again indefinitely; the cursor only
    /// advances together with the rows it covers.
    pub async fn run(&self) {
        let mut cursor = self
            .store
            .get_cursor(&self.source_name, self.entity.name)
            .expect("cursor read failed");
        self.stats.start_sync(&self.source_name, self.entity.name);
        info!(
            "[pull] {}/{} start; cursor={} skip={}",
            self.source_name,
            self.entity.name,
            if cursor.value.is_empty() { "(empty)" } else { &cursor.value },
            cursor.skip
        );

        let mut buffer: Vec<String> = Vec::with_capacity(GRAPHQL_BATCH_SIZE);
        let mut retry_count: u32 = 0;

        loop {
            let body = build_query(self.entity, &cursor);
            self.stats
                .set_api_state(&self.source_name, self.entity.name, ApiState::Calling);
            let started = Instant::now();
            let response = self.client.post(&self.target, body).await;
            let latency_ms = started.elapsed().as_millis() as i64;
            self.stats
                .set_api_state(&self.source_name, self.entity.name, ApiState::Processing);

            let items = match self.classify(response, latency_ms) {
                Ok(items) => {
                    retry_count = 0;
                    items
                }
                Err(kind) => {
                    let delay = backoff_delay(retry_count);
                    retry_count += 1;
                    warn!(
                        "[pull] {}/{} {:?} failure, retry {} in {}ms",
                        self.source_name, self.entity.name, kind, retry_count, delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if items.is_empty() {
                if !buffer.is_empty() {
                    self.flush(&mut buffer, &cursor);
                }
                break;
            }

            let short_page = items.len() < GRAPHQL_BATCH_SIZE;
            advance_cursor(self.entity, &mut cursor, &items);

            for item in &items {
                buffer.push(self.entity.to_values_sql(item));
            }
            if buffer.len() >= GRAPHQL_BATCH_SIZE {
                self.flush(&mut buffer, &cursor);
            }

            if short_page {
                if !buffer.is_empty() {
                    self.flush(&mut buffer, &cursor);
                }
                break;
            }
        }

        self.stats.end_sync(&self.source_name, self.entity.name);
        info!("[pull] {}/{} done", self.source_name, self.entity.name);
    }

    fn classify(
        &self,
        response: Result<String, SourceError>,
        latency_ms: i64,
    ) -> Result<Vec<Value>, FailureKind> {
        let body = match response {
            Ok(body) if !body.is_empty() => body,
            _ => {
                self.record_failure(FailureKind::Network, latency_ms);
                return Err(FailureKind::Network);
            }
        };

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) => {
                self.record_failure(FailureKind::Json, latency_ms);
                return Err(FailureKind::Json);
            }
        };

        if let Some(errors) = parsed.get("errors") {
            self.record_failure(FailureKind::GraphQl, latency_ms);
            self.attribute_indexer_fails(errors);
            return Err(FailureKind::GraphQl);
        }

        match parsed
            .get("data")
            .and_then(|d| d.get(self.entity.plural))
            .and_then(Value::as_array)
        {
            Some(items) => {
                self.stats.record_success(
                    &self.source_name,
                    self.entity.name,
                    items.len() as i64,
                    latency_ms,
                );
                Ok(items.clone())
            }
            None => {
                self.record_failure(FailureKind::Format, latency_ms);
                Err(FailureKind::Format)
            }
        }
    }

    fn record_failure(&self, kind: FailureKind, latency_ms: i64) {
        self.stats
            .record_failure(&self.source_name, self.entity.name, kind, latency_ms);
    }

    fn attribute_indexer_fails(&self, errors: &Value) {
        let Some(errors) = errors.as_array() else {
            return;
        };
        for err in errors {
            let Some(message) = err.get("message").and_then(Value::as_str) else {
                continue;
            };
            for indexer in parse_bad_indexers(message) {
                self.stats
                    .record_indexer_fail(&self.source_name, self.entity.name, &indexer);
            }
        }
    }

    fn flush(&self, buffer: &mut Vec<String>, cursor: &SyncCursor) {
        self.store
            .atomic_insert_with_cursor(
                self.entity.table,
                self.entity.columns,
                buffer,
                &self.source_name,
                self.entity.name,
                cursor,
            )
            .expect("store write failed");
        buffer.clear();
    }
}

pub(crate) fn backoff_delay(retry_count: u32) -> Duration {
    let delay = RETRY_BASE_DELAY_MS << retry_count.min(10);
    Duration::from_millis(delay.min(RETRY_MAX_DELAY_MS))
}

/// Build the `{query}` request body for the entity's current cursor.
pub(crate) fn build_query(entity: &EntityDescriptor, cursor: &SyncCursor) -> String {
    let query = match entity.sync_mode {
        SyncMode::ById => {
            if cursor.value.is_empty() {
                format!(
                    "{{{plural}(first:{first},orderBy:id,orderDirection:asc){{{fields}}}}}",
                    plural = entity.plural,
                    first = GRAPHQL_BATCH_SIZE,
                    fields = entity.fields,
                )
            } else {
                format!(
                    "{{{plural}(first:{first},orderBy:id,orderDirection:asc,where:{{id_gt:\"{id}\"}}){{{fields}}}}}",
                    plural = entity.plural,
                    first = GRAPHQL_BATCH_SIZE,
                    id = cursor.value,
                    fields = entity.fields,
                )
            }
        }
        SyncMode::ByTimestamp | SyncMode::ByResolutionTimestamp => {
            let value = if cursor.value.is_empty() { "0" } else { &cursor.value };
            format!(
                "{{{plural}(first:{first},orderBy:{order},orderDirection:asc,where:{{{filter}:{value}}},skip:{skip}){{{fields}}}}}",
                plural = entity.plural,
                first = GRAPHQL_BATCH_SIZE,
                order = entity.order_field,
                filter = entity.where_field,
                value = value,
                skip = cursor.skip,
                fields = entity.fields,
            )
        }
    };
    json!({ "query": query }).to_string()
}

/// Advance the cursor over one page of items.
///
/// Timestamp modes keep a skip count so a run of equal timestamps spanning
/// page boundaries is never re-fetched from the start of the run.
pub(crate) fn advance_cursor(
    entity: &EntityDescriptor,
    cursor: &mut SyncCursor,
    items: &[Value],
) {
    assert!(!items.is_empty());

    if entity.sync_mode == SyncMode::ById {
        cursor.value = items
            .last()
            .and_then(|item| item.get("id"))
            .and_then(Value::as_str)
            .expect("item missing id")
            .to_string();
        cursor.skip = 0;
        return;
    }

    let extract = |item: &Value| -> String {
        match item.get(entity.order_field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(|v| v.to_string())
                .unwrap_or_else(|| n.to_string()),
            Some(other) => other.to_string(),
        }
    };

    let last_value = extract(items.last().unwrap());

    if last_value == cursor.value {
        // The whole page is still inside the cursor's timestamp run.
        cursor.skip += items.len() as i64;
    } else {
        let trailing = items
            .iter()
            .rev()
            .take_while(|item| extract(item) == last_value)
            .count();
        cursor.value = last_value;
        cursor.skip = trailing as i64;
    }
}

/// Extract indexer names with a `BadResponse` reason from a gateway error
/// message of the form `... bad indexers: {name: reason, name: reason}`.
pub(crate) fn parse_bad_indexers(message: &str) -> Vec<String> {
    let Some(start) = message.find("bad indexers:") else {
        return Vec::new();
    };
    let Some(open) = message[start..].find('{').map(|p| start + p) else {
        return Vec::new();
    };
    let Some(close) = message[open..].find('}').map(|p| open + p) else {
        return Vec::new();
    };

    let mut indexers = Vec::new();
    for part in message[open + 1..close].split(',') {
        let Some((indexer, reason)) = part.split_once(':') else {
            continue;
        };
        let indexer = indexer.trim();
        if !indexer.is_empty() && reason.contains("BadResponse") {
            indexers.push(indexer.to_string());
        }
    }
    indexers
}
