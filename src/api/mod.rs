//! HTTP API: a thin dispatcher over the core services.

pub mod export;
pub mod health;
pub mod rebuild;
pub mod replay;
pub mod sql;
pub mod sync;

use crate::db::Store;
use crate::rebuild::RebuildEngine;
use crate::stats::StatsRegistry;
use crate::sync::TokenFiller;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub stats: Arc<StatsRegistry>,
    pub engine: Arc<RebuildEngine>,
    pub filler: Arc<TokenFiller>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/api/stats", get(sync::stats))
        .route("/api/sync", get(sync::sync_state))
        .route("/api/sync-progress", get(sync::sync_progress))
        .route("/api/entity-stats", get(sync::entity_stats))
        .route("/api/indexer-fails", get(sync::indexer_fails))
        .route("/api/fill-token-ids", get(sync::fill_token_ids))
        .route("/api/rebuild-all", get(rebuild::rebuild_all))
        .route("/api/rebuild-load", get(rebuild::rebuild_load))
        .route("/api/rebuild-check-persist", get(rebuild::check_persist))
        .route("/api/rebuild-status", get(rebuild::status))
        .route("/api/replay", get(replay::timeline))
        .route("/api/replay-trades", get(replay::trades))
        .route("/api/replay-positions", get(replay::positions))
        .route("/api/replay-users", get(replay::users))
        .route("/api/sql", get(sql::query))
        .route("/api/entity-latest", get(export::entity_latest))
        .route("/api/export-raw", get(export::export_raw))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type"),
    );
    response
}
