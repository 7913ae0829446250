use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        AppointmentFilter, AppointmentResponse, CreateAppointmentRequest, CreateSymptomRequest,
        LivenessResponse, SymptomResponse, UpdateAppointmentRequest,
    },
    services,
};
use crate::{
    auth::AuthUser,
    common::Pagination,
    db,
    error::ApiResult,
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/symptoms", get(list_symptoms).post(create_symptom))
        .route("/health/symptoms/:id", delete(delete_symptom))
        .route(
            "/health/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route(
            "/health/appointments/:id",
            get(get_appointment)
                .put(update_appointment)
                .patch(update_appointment)
                .delete(delete_appointment),
        )
}

pub async fn liveness(State(state): State<AppState>) -> (StatusCode, Json<LivenessResponse>) {
    let version = env!("CARGO_PKG_VERSION");
    if db::ping(&state.db).await {
        (
            StatusCode::OK,
            Json(LivenessResponse { status: "ok", database: "ok", version }),
        )
    } else {
        warn!("database ping failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(LivenessResponse { status: "degraded", database: "unreachable", version }),
        )
    }
}

#[instrument(skip(state))]
pub async fn list_symptoms(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
) -> ApiResult<Json<Vec<SymptomResponse>>> {
    services::list_symptoms(&state, user_id, page).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_symptom(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateSymptomRequest>,
) -> ApiResult<impl IntoResponse> {
    let symptom = services::create_symptom(&state, user_id, body).await?;
    Ok((StatusCode::CREATED, Json(symptom)))
}

#[instrument(skip(state))]
pub async fn delete_symptom(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete_symptom(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_appointments(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(filter): ApiQuery<AppointmentFilter>,
) -> ApiResult<Json<Vec<AppointmentResponse>>> {
    services::list_appointments(&state, user_id, filter).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn create_appointment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateAppointmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let appt = services::create_appointment(&state, user_id, body).await?;
    let location = format!("/api/v1/health/appointments/{}", appt.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(appt)))
}

#[instrument(skip(state))]
pub async fn get_appointment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<AppointmentResponse>> {
    services::get_appointment(&state, user_id, id).await.map(Json)
}

#[instrument(skip(state, body))]
pub async fn update_appointment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateAppointmentRequest>,
) -> ApiResult<Json<AppointmentResponse>> {
    services::update_appointment(&state, user_id, id, body).await.map(Json)
}

#[instrument(skip(state))]
pub async fn delete_appointment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete_appointment(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
