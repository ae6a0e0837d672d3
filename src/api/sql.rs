//! Read-only SQL passthrough. Validation failures are response-level
//! errors, never aborts.

use crate::api::AppState;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SqlQuery {
    pub q: Option<String>,
}

pub async fn query(
    Query(params): Query<SqlQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let sql = params
        .q
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing query parameter 'q'".to_string()))?;
    validate_select(&sql).map_err(AppError::BadRequest)?;

    let store = state.store.clone();
    let rows = tokio::task::spawn_blocking(move || store.query_rows(&sql))
        .await
        .map_err(|e| AppError::Internal(format!("query task failed: {}", e)))??;
    Ok(Json(Value::Array(
        rows.into_iter().map(Value::Object).collect(),
    )))
}

fn validate_select(sql: &str) -> Result<(), String> {
    let upper = sql.to_uppercase();
    if !upper.starts_with("SELECT") {
        return Err("Only SELECT queries allowed".to_string());
    }
    if sql.contains(';') {
        return Err("Semicolon not allowed".to_string());
    }
    if sql.contains("--") || sql.contains("/*") {
        return Err("SQL comment not allowed".to_string());
    }
    for keyword in ["INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE"] {
        if upper.contains(keyword) {
            return Err(format!("{} not allowed", keyword));
        }
    }
    Ok(())
}
