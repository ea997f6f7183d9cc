use axum::{
    Json, Router,
    extract::State,
    routing::get,
};

use crate::{
    api::{Pagination, extract::ApiQuery},
    error::AppError,
    models::request::RequestWithTemplate,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/requests", get(list_requests))
}

/// Newest first, joined with the template name.
async fn list_requests(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Pagination>,
) -> Result<Json<Vec<RequestWithTemplate>>, AppError> {
    let requests = state
        .store
        .list_requests(page.limit(), page.offset())
        .await?;

    Ok(Json(requests))
}
