use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateTodoRequest, SetTagsRequest, TodoFilter, TodoResponse, UpdateTodoRequest},
    services,
};
use crate::{
    auth::AuthUser,
    error::ApiResult,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/todos", get(list_todos).post(create_todo))
        .route(
            "/todos/:id",
            get(get_todo)
                .put(update_todo)
                .patch(update_todo)
                .delete(delete_todo),
        )
        .route("/todos/:id/toggle", post(toggle_todo))
        .route("/todos/:id/tags", put(set_todo_tags))
        .route(
            "/todos/:id/tags/:tag_id",
            put(attach_tag).delete(detach_tag),
        )
}

#[instrument(skip(state))]
pub async fn list_todos(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(filter): ApiQuery<TodoFilter>,
) -> ApiResult<Json<Vec<TodoResponse>>> {
    services::list(&state, user_id, filter).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_todo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateTodoRequest>,
) -> ApiResult<impl IntoResponse> {
    let todo = services::create(&state, user_id, body).await?;
    let location = format!("/api/v1/todos/{}", todo.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(todo)))
}

#[instrument(skip(state))]
pub async fn get_todo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<TodoResponse>> {
    services::get(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn update_todo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateTodoRequest>,
) -> ApiResult<Json<TodoResponse>> {
    services::update(&state, user_id, id, body).await.map(Json)
}

#[instrument(skip(state))]
pub async fn toggle_todo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<TodoResponse>> {
    services::toggle(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn delete_todo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, body))]
pub async fn set_todo_tags(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<SetTagsRequest>,
) -> ApiResult<Json<TodoResponse>> {
    services::set_tags(&state, user_id, id, &body.tag_ids).await.map(Json)
}

#[instrument(skip(state))]
pub async fn attach_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath((id, tag_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<TodoResponse>> {
    services::attach_tag(&state, user_id, id, tag_id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn detach_tag(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath((id, tag_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<TodoResponse>> {
    services::detach_tag(&state, user_id, id, tag_id).await.map(Json)
}
