use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateTagRequest, TagResponse, UpdateTagRequest},
    services,
};
use crate::{
    auth::AuthUser,
    error::ApiResult,
    extract::{ApiJson, ApiPath},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags).post(create_tag))
        .route(
            "/tags/:id",
            get(get_tag).put(update_tag).patch(update_tag).delete(delete_tag),
        )
}

#[instrument(skip(state))]
pub async fn list_tags(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<TagResponse>>> {
    services::list(&state, user_id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateTagRequest>,
) -> ApiResult<impl IntoResponse> {
    let tag = services::create(&state, user_id, body).await?;
    let location = format!("/api/v1/tags/{}", tag.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(tag)))
}

#[instrument(skip(state))]
pub async fn get_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<TagResponse>> {
    services::get(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn update_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateTagRequest>,
) -> ApiResult<Json<TagResponse>> {
    services::update(&state, user_id, id, body).await.map(Json)
}

#[instrument(skip(state))]
pub async fn delete_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
