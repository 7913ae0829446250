use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, OAuthLoginRequest, PasswordResetConfirm,
            PasswordResetRequest, PublicUser, RefreshRequest, RegisterRequest,
        },
        extractors::AuthUser,
        rate_limit::limit_by_ip,
        repo_types::User,
        services,
    },
    error::{ApiError, ApiResult},
    extract::ApiJson,
    state::AppState,
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/oauth", post(oauth_login))
        .route("/auth/password-reset/request", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_by_ip))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).delete(delete_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::register(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::login(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::refresh(&state, &payload.refresh_token).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> ApiResult<StatusCode> {
    services::logout(&state, &payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn oauth_login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<OAuthLoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::oauth_login(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PasswordResetRequest>,
) -> ApiResult<StatusCode> {
    services::request_password_reset(&state, &payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state, payload))]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PasswordResetConfirm>,
) -> ApiResult<StatusCode> {
    services::confirm_password_reset(&state, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<PublicUser>> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<StatusCode> {
    if !User::delete(&state.db, user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }
    info!(%user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}
