//! Replay query endpoints over the rebuilt in-memory state.
//!
//! Serialisation can touch millions of snapshots, so every handler moves
//! the work onto a blocking thread.

use crate::api::AppState;
use crate::error::AppError;
use crate::replay;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub user: Option<String>,
}

pub async fn timeline(
    Query(params): Query<TimelineQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = require(params.user, "user")?;
    let engine = state.engine.clone();
    let body = tokio::task::spawn_blocking(move || {
        let state = engine.state();
        replay::serialize_user_timeline(&state, &user)
    })
    .await
    .map_err(|e| AppError::Internal(format!("replay task failed: {}", e)))?;

    match body {
        Some(body) => Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response()),
        None => Err(AppError::NotFound("user not found".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub user: Option<String>,
    pub ts: Option<i64>,
    pub radius: Option<usize>,
}

pub async fn trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let user = require(params.user, "user")?;
    let ts = require(params.ts, "ts")?;
    let radius = params.radius;
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let state = engine.state();
        replay::serialize_trades_at(&state, &user, ts, radius)
    })
    .await
    .map_err(|e| AppError::Internal(format!("replay task failed: {}", e)))?;

    result
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub user: Option<String>,
    pub ts: Option<i64>,
}

pub async fn positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let user = require(params.user, "user")?;
    let ts = require(params.ts, "ts")?;
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let state = engine.state();
        replay::serialize_positions_at(&state, &user, ts)
    })
    .await
    .map_err(|e| AppError::Internal(format!("replay task failed: {}", e)))?;

    result
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub limit: Option<usize>,
}

pub async fn users(
    Query(params): Query<UsersQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let limit = params.limit.unwrap_or(200);
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let state = engine.state();
        replay::serialize_user_list(&state, limit)
    })
    .await
    .map_err(|e| AppError::Internal(format!("replay task failed: {}", e)))?;
    Ok(Json(result))
}

fn require<T>(value: Option<T>, name: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::BadRequest(format!("Missing query parameter '{}'", name)))
}
