use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde_json::{Value, json};

use crate::{
    api::extract::{ApiJson, ApiPath},
    error::AppError,
    models::template::{Template, TemplateInput},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
}

fn validate(input: &TemplateInput) -> Result<(), AppError> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("Template name is required".to_string()));
    }
    if input.subject.trim().is_empty() {
        return Err(AppError::Validation(
            "Template subject is required".to_string(),
        ));
    }
    Ok(())
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Template {} not found", id))
}

async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>, AppError> {
    Ok(Json(state.templates.list().await?))
}

async fn get_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Template>, AppError> {
    let template = state.templates.get(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(template))
}

async fn create_template(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<TemplateInput>,
) -> Result<(StatusCode, Json<Template>), AppError> {
    validate(&input)?;

    let template = state.templates.create(&input).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn update_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<TemplateInput>,
) -> Result<Json<Template>, AppError> {
    validate(&input)?;

    let template = state
        .templates
        .update(id, &input)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, AppError> {
    if !state.templates.delete(id).await? {
        return Err(not_found(id));
    }

    Ok(Json(json!({ "message": "Template deleted successfully" })))
}
