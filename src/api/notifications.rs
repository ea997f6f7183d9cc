use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::Value;

use crate::{
    api::extract::ApiJson,
    error::AppError,
    models::request::{NotificationInput, OneOrMany},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", post(create_notifications))
}

/// POST /api/notifications. Answers with the created request for a single
/// object body, or the list of created requests for an array body.
async fn create_notifications(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<Response, AppError> {
    let body = OneOrMany::<NotificationInput>::from_body(body);
    let single = body.is_single();
    let mut created = state.ingestion.submit(body.into_vec()).await?;

    if !single {
        return Ok((StatusCode::CREATED, Json(created)).into_response());
    }

    match created.pop() {
        Some(request) => Ok((StatusCode::CREATED, Json(request)).into_response()),
        None => Err(AppError::Validation(
            "template_id and data are required".to_string(),
        )),
    }
}
