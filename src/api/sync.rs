//! Sync, stats and filler endpoints.

use crate::api::AppState;
use crate::entities::{self, escape_sql};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Per-table row counts, summed across sources.
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let mut result = Map::new();
    for entity in entities::CATALOGUE {
        result.insert(
            entity.table.to_string(),
            json!(state.stats.total_count_for_entity(entity.name)),
        );
    }
    Json(Value::Object(result))
}

pub async fn sync_state(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let rows = state.store.query_rows(
        "SELECT source, entity, cursor_value, cursor_skip, last_sync_at \
         FROM sync_state ORDER BY last_sync_at DESC",
    )?;
    Ok(Json(Value::Array(
        rows.into_iter().map(Value::Object).collect(),
    )))
}

/// Sync watermarks plus token-filler progress.
pub async fn sync_progress(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let store = &state.store;
    let eof_min_ts = store.query_single_int("SELECT MIN(timestamp) FROM enriched_order_filled");
    let eof_cursor = store.get_cursor("Polymarket", "EnrichedOrderFilled")?;
    let eof_synced_ts = eof_cursor.value.parse::<i64>().unwrap_or(0);

    let token_min_ts =
        store.query_single_int("SELECT MIN(resolutionTimestamp) FROM condition");
    let mut token_synced_ts = store.query_single_int(
        "SELECT MIN(resolutionTimestamp) FROM condition WHERE positionIds IS NULL",
    );

    let now_ts = chrono::Utc::now().timestamp();
    // No NULL rows left reads as fully caught up.
    if token_synced_ts == 0 {
        token_synced_ts = now_ts;
    }

    let filler = state.filler.progress();
    Ok(Json(json!({
        "eof_min_ts": eof_min_ts,
        "eof_synced_ts": eof_synced_ts,
        "token_min_ts": token_min_ts,
        "token_synced_ts": token_synced_ts,
        "now_ts": now_ts,
        "filler_running": filler.running,
        "filler_processed": filler.processed,
        "filler_phase": filler.phase,
        "filler_total_null": filler.total_null,
        "filler_merged": filler.merged,
        "filler_not_found": filler.not_found,
        "filler_errors": filler.errors,
        "filler_start_ts": filler.start_ts,
    })))
}

/// The registry's TTL-cached dump, passed through verbatim.
pub async fn entity_stats(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.stats.dump(),
    )
}

#[derive(Debug, Deserialize)]
pub struct IndexerFailsQuery {
    pub source: Option<String>,
    pub entity: Option<String>,
}

pub async fn indexer_fails(
    Query(params): Query<IndexerFailsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let source = params
        .source
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing query parameter 'source'".to_string()))?;
    let entity = params
        .entity
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing query parameter 'entity'".to_string()))?;

    let rows = state.store.query_rows(&format!(
        "SELECT indexer, fail_requests FROM indexer_fail_meta \
         WHERE source = {} AND entity = {} ORDER BY fail_requests DESC",
        escape_sql(&source),
        escape_sql(&entity)
    ))?;
    Ok(Json(Value::Array(
        rows.into_iter().map(Value::Object).collect(),
    )))
}

pub async fn fill_token_ids(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": state.filler.start() }))
}
