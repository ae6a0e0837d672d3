use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready only once the store answers queries.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    if state.store.query_single_int("SELECT 1") == 1 {
        Ok(Json(serde_json::json!({"status": "ready"})))
    } else {
        Err(AppError::Internal("store unavailable".to_string()))
    }
}
