//! Rebuild trigger and status endpoints.

use crate::api::AppState;
use crate::error::AppError;
use crate::rebuild::{RebuildEngine, RebuildProgress};
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Kick off a full rebuild (followed by a persist) in the background.
pub async fn rebuild_all(State(state): State<AppState>) -> Json<Value> {
    if state.engine.is_running() {
        return Json(json!({ "status": "already_running" }));
    }
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || {
        engine.rebuild_all();
        engine.save_persist();
    });
    Json(json!({ "status": "started" }))
}

pub async fn rebuild_load(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    if state.engine.is_running() {
        return Ok(Json(json!({ "status": "already_running" })));
    }
    if !RebuildEngine::has_persist(state.engine.persist_dir()) {
        return Err(AppError::BadRequest("no persist data".to_string()));
    }
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || engine.load_persist());
    Ok(Json(json!({ "status": "loading" })))
}

pub async fn check_persist(State(state): State<AppState>) -> Json<Value> {
    let dir = state.engine.persist_dir();
    let exists = RebuildEngine::has_persist(dir);
    let file_size = if exists {
        RebuildEngine::persist_file_size(dir)
    } else {
        0
    };
    Json(json!({ "exists": exists, "file_size": file_size }))
}

pub async fn status(State(state): State<AppState>) -> Json<RebuildProgress> {
    Json(state.engine.get_progress())
}
