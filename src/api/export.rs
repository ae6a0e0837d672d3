//! Debug surfaces: latest-row inspection and raw CSV export.

use crate::api::AppState;
use crate::entities;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::Write;

#[derive(Debug, Deserialize)]
pub struct EntityLatestQuery {
    pub entity: Option<String>,
}

/// Schema and newest row of one entity table.
pub async fn entity_latest(
    Query(params): Query<EntityLatestQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let name = params
        .entity
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing query parameter 'entity'".to_string()))?;
    let entity = entities::find_by_name(&name)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown entity {}", name)))?;

    let columns = state
        .store
        .query_rows(&format!("PRAGMA table_info('{}')", entity.table))?;
    let rows = state.store.query_rows(&format!(
        "SELECT * FROM {} ORDER BY id DESC LIMIT 1",
        entity.table
    ))?;
    let row = rows
        .into_iter()
        .next()
        .map(Value::Object)
        .unwrap_or(Value::Null);

    Ok(Json(json!({
        "entity": entity.name,
        "table": entity.table,
        "columns": columns,
        "row": row,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub limit: Option<usize>,
    pub order: Option<String>,
}

/// Dump up to `limit` rows of every entity table to `data/export/*.csv`.
pub async fn export_raw(
    Query(params): Query<ExportQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let order = if params.order.as_deref() == Some("asc") {
        "ASC"
    } else {
        "DESC"
    };

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Value, AppError> {
        let export_dir = std::env::current_dir()
            .map_err(|e| AppError::Internal(e.to_string()))?
            .join("data/export");
        std::fs::create_dir_all(&export_dir).map_err(|e| AppError::Internal(e.to_string()))?;

        let mut results = Map::new();
        let mut ok_count = 0;
        for entity in entities::CATALOGUE {
            let sql = format!(
                "SELECT {} FROM {} ORDER BY id {} LIMIT {}",
                entity.columns, entity.table, order, limit
            );
            // A table missing from this deployment is reported, not fatal.
            let rows = match store.query_rows(&sql) {
                Ok(rows) => rows,
                Err(e) => {
                    results.insert(entity.table.to_string(), json!({ "error": e.to_string() }));
                    continue;
                }
            };

            let path = export_dir.join(format!("{}.csv", entity.table));
            let mut file = std::fs::File::create(&path)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let columns: Vec<&str> = entity.columns.split(',').map(str::trim).collect();
            writeln!(file, "{}", columns.join(","))
                .map_err(|e| AppError::Internal(e.to_string()))?;
            for row in &rows {
                let line = columns
                    .iter()
                    .map(|col| match row.get(*col) {
                        None | Some(Value::Null) => String::new(),
                        Some(Value::String(s)) => escape_csv(s),
                        Some(other) => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                writeln!(file, "{}", line).map_err(|e| AppError::Internal(e.to_string()))?;
            }

            if !rows.is_empty() {
                ok_count += 1;
            }
            results.insert(entity.table.to_string(), json!({ "ok": rows.len() }));
        }

        Ok(json!({
            "path": export_dir.display().to_string(),
            "exported_tables": ok_count,
            "results": results,
        }))
    })
    .await
    .map_err(|e| AppError::Internal(format!("export task failed: {}", e)))??;

    Ok(Json(result))
}

fn escape_csv(s: &str) -> String {
    if !s.contains(',') && !s.contains('"') && !s.contains('\n') {
        return s.to_string();
    }
    let mut escaped = String::with_capacity(s.len() + 2);
    escaped.push('"');
    for c in s.chars() {
        if c == '"' {
            escaped.push('"');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}
