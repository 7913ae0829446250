use std::{convert::Infallible, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{
        ChatTurnResponse, ConversationDetail, ConversationResponse, CreateConversationRequest,
        SendMessageRequest,
    },
    services::{self, StreamEvent},
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    extract::{ApiJson, ApiPath},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/health/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/health/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/health/conversations/:id/messages", post(send_message))
        .route("/health/conversations/:id/messages/stream", post(stream_message))
}

#[instrument(skip(state))]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<ConversationResponse>>> {
    services::list_conversations(&state, user_id).await.map(Json)
}

/// Body is optional; `{}` or no body creates an untitled conversation.
#[instrument(skip(state, body))]
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req: CreateConversationRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateConversationRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::validation(format!("Invalid JSON body: {e}")))?
    };
    let conversation = services::create_conversation(&state, user_id, req).await?;
    let location = format!("/api/v1/health/conversations/{}", conversation.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(conversation)))
}

#[instrument(skip(state))]
pub async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ConversationDetail>> {
    services::get_conversation(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete_conversation(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, body))]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<SendMessageRequest>,
) -> ApiResult<Json<ChatTurnResponse>> {
    services::send_message(&state, user_id, id, body).await.map(Json)
}

fn to_event(ev: StreamEvent) -> Event {
    match ev {
        // data lines are split on '\n'; a bare '\r' would end the field early
        StreamEvent::Token(text) => Event::default().event("token").data(text.replace('\r', "")),
        StreamEvent::Done(turn) => Event::default()
            .event("done")
            .json_data(&*turn)
            .unwrap_or_else(|_| Event::default().event("done").data("{}")),
        StreamEvent::Error(msg) => Event::default()
            .event("error")
            .json_data(serde_json::json!({ "error": msg }))
            .unwrap_or_else(|_| Event::default().event("error").data("{}")),
    }
}

/// `event: token` per text delta, then one `event: done` with the stored turn.
#[instrument(skip(state, body))]
pub async fn stream_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<SendMessageRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let events = services::stream_message(state, user_id, id, body).await?;
    let stream = events.map(|ev| Ok::<_, Infallible>(to_event(ev)));
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
