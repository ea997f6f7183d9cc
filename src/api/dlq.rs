use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use serde_json::{Value, json};

use crate::{
    api::{
        Pagination,
        extract::{ApiPath, ApiQuery},
    },
    error::AppError,
    models::dead_letter::{DeadLetterEntry, DeadLetterStats},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dlq", get(list_dead_letters))
        .route("/dlq/stats", get(dead_letter_stats))
        .route("/dlq/retry-all", post(retry_all))
        .route("/dlq/{id}", delete(delete_dead_letter))
        .route("/dlq/{id}/retry", post(retry_one))
}

async fn list_dead_letters(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Pagination>,
) -> Result<Json<Vec<DeadLetterEntry>>, AppError> {
    let entries = state
        .dead_letters
        .list(page.limit(), page.offset())
        .await?;

    Ok(Json(entries))
}

async fn dead_letter_stats(State(state): State<AppState>) -> Result<Json<DeadLetterStats>, AppError> {
    Ok(Json(state.dead_letters.stats().await?))
}

async fn retry_one(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, AppError> {
    let entry = state.dead_letters.replay(id).await?;

    Ok(Json(json!({
        "message": "Message queued for retry",
        "request_id": entry.request_id,
        "dead_letter_id": entry.id,
    })))
}

async fn retry_all(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let summary = state.dead_letters.replay_pending().await?;

    Ok(Json(json!({
        "message": format!("{} messages queued for retry", summary.count),
        "count": summary.count,
        "ids": summary.ids,
    })))
}

async fn delete_dead_letter(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, AppError> {
    state.dead_letters.delete(id).await?;

    Ok(Json(json!({ "message": "Dead letter entry deleted" })))
}
