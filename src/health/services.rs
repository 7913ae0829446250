use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::{
    dto::{
        AppointmentFilter, AppointmentResponse, CreateAppointmentRequest, CreateSymptomRequest,
        SymptomResponse, UpdateAppointmentRequest,
    },
    repo,
    repo_types::{AppointmentRow, NewSymptom},
};
use crate::{
    common::{optional_text, required_text, Pagination},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const MIN_SEVERITY: i16 = 1;
pub const MAX_SEVERITY: i16 = 10;
pub const MAX_SYMPTOM_NAME_LEN: usize = 100;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_FIELD_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2000;

fn appointment_not_found() -> ApiError {
    ApiError::not_found("Appointment not found")
}

pub(crate) fn validate_symptom(req: CreateSymptomRequest) -> ApiResult<NewSymptom> {
    if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&req.severity) {
        return Err(ApiError::validation(format!(
            "severity must be between {MIN_SEVERITY} and {MAX_SEVERITY}"
        )));
    }
    Ok(NewSymptom {
        name: required_text("name", &req.name, MAX_SYMPTOM_NAME_LEN)?,
        severity: req.severity,
        notes: optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?,
        recorded_at: req.recorded_at,
    })
}

pub async fn list_symptoms(state: &AppState, user_id: Uuid, page: Pagination) -> ApiResult<Vec<SymptomResponse>> {
    let rows = repo::list_symptoms(&state.db, user_id, page.normalized()).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn create_symptom(
    state: &AppState,
    user_id: Uuid,
    req: CreateSymptomRequest,
) -> ApiResult<SymptomResponse> {
    let symptom = validate_symptom(req)?;
    let row = repo::insert_symptom(&state.db, user_id, None, &symptom).await?;
    info!(%user_id, symptom_id = %row.id, "symptom recorded");
    Ok(row.into())
}

pub async fn delete_symptom(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    if !repo::delete_symptom(&state.db, user_id, id).await? {
        return Err(ApiError::not_found("Symptom not found"));
    }
    Ok(())
}

pub(crate) fn new_appointment(
    user_id: Uuid,
    req: CreateAppointmentRequest,
    now: OffsetDateTime,
) -> ApiResult<AppointmentRow> {
    Ok(AppointmentRow {
        id: Uuid::nil(),
        user_id,
        title: required_text("title", &req.title, MAX_TITLE_LEN)?,
        provider_name: optional_text("provider_name", req.provider_name.as_deref(), MAX_FIELD_LEN)?,
        location: optional_text("location", req.location.as_deref(), MAX_FIELD_LEN)?,
        scheduled_at: req.scheduled_at,
        notes: optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?,
        status: req.status.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn apply_appointment_update(
    mut row: AppointmentRow,
    req: UpdateAppointmentRequest,
) -> ApiResult<AppointmentRow> {
    if let Some(title) = req.title {
        row.title = required_text("title", &title, MAX_TITLE_LEN)?;
    }
    if let Some(provider) = req.provider_name {
        row.provider_name = optional_text("provider_name", provider.as_deref(), MAX_FIELD_LEN)?;
    }
    if let Some(location) = req.location {
        row.location = optional_text("location", location.as_deref(), MAX_FIELD_LEN)?;
    }
    if let Some(at) = req.scheduled_at {
        row.scheduled_at = at;
    }
    if let Some(notes) = req.notes {
        row.notes = optional_text("notes", notes.as_deref(), MAX_NOTES_LEN)?;
    }
    if let Some(status) = req.status {
        row.status = status;
    }
    Ok(row)
}

pub async fn list_appointments(
    state: &AppState,
    user_id: Uuid,
    filter: AppointmentFilter,
) -> ApiResult<Vec<AppointmentResponse>> {
    let rows = repo::list_appointments(&state.db, user_id, filter.upcoming, filter.page()).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get_appointment(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<AppointmentResponse> {
    repo::get_appointment(&state.db, user_id, id)
        .await?
        .map(Into::into)
        .ok_or_else(appointment_not_found)
}

pub async fn create_appointment(
    state: &AppState,
    user_id: Uuid,
    req: CreateAppointmentRequest,
) -> ApiResult<AppointmentResponse> {
    let row = new_appointment(user_id, req, OffsetDateTime::now_utc())?;
    let saved = repo::insert_appointment(&state.db, &row).await?;
    info!(%user_id, appointment_id = %saved.id, "appointment created");
    Ok(saved.into())
}

pub async fn update_appointment(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    req: UpdateAppointmentRequest,
) -> ApiResult<AppointmentResponse> {
    let current = repo::get_appointment(&state.db, user_id, id)
        .await?
        .ok_or_else(appointment_not_found)?;
    let updated = apply_appointment_update(current, req)?;
    let saved = repo::save_appointment(&state.db, &updated)
        .await?
        .ok_or_else(appointment_not_found)?;
    info!(%user_id, appointment_id = %id, status = ?saved.status, "appointment updated");
    Ok(saved.into())
}

pub async fn delete_appointment(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    if !repo::delete_appointment(&state.db, user_id, id).await? {
        return Err(appointment_not_found());
    }
    info!(%user_id, appointment_id = %id, "appointment deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::repo_types::AppointmentStatus;

    fn symptom(severity: i16) -> CreateSymptomRequest {
        CreateSymptomRequest {
            name: " Headache ".into(),
            severity,
            notes: None,
            recorded_at: None,
        }
    }

    #[test]
    fn severity_bounds() {
        assert!(validate_symptom(symptom(0)).is_err());
        assert!(validate_symptom(symptom(11)).is_err());
        let ok = validate_symptom(symptom(10)).unwrap();
        assert_eq!(ok.name, "Headache");
        assert_eq!(ok.severity, 10);
    }

    #[test]
    fn appointment_defaults_to_scheduled() {
        let req: CreateAppointmentRequest = serde_json::from_str(
            r#"{"title":"Dentist","scheduled_at":"2030-01-02T09:30:00Z","location":"  "}"#,
        )
        .unwrap();
        let row = new_appointment(Uuid::new_v4(), req, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(row.status, AppointmentStatus::Scheduled);
        assert_eq!(row.location, None);
    }

    #[test]
    fn appointment_update_clears_and_sets() {
        let req: CreateAppointmentRequest = serde_json::from_str(
            r#"{"title":"GP","scheduled_at":"2030-01-02T09:30:00Z","provider_name":"Dr. Who","notes":"bring card"}"#,
        )
        .unwrap();
        let row = new_appointment(Uuid::new_v4(), req, OffsetDateTime::now_utc()).unwrap();
        let patch: UpdateAppointmentRequest =
            serde_json::from_str(r#"{"provider_name":null,"status":"cancelled"}"#).unwrap();
        let updated = apply_appointment_update(row, patch).unwrap();
        assert_eq!(updated.provider_name, None);
        assert_eq!(updated.notes.as_deref(), Some("bring card"));
        assert_eq!(updated.status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn appointment_requires_title() {
        let req: CreateAppointmentRequest =
            serde_json::from_str(r#"{"title":" ","scheduled_at":"2030-01-02T09:30:00Z"}"#).unwrap();
        assert!(new_appointment(Uuid::new_v4(), req, OffsetDateTime::now_utc()).is_err());
    }

    mod db {
        use sqlx::PgPool;

        use super::*;
        use crate::{
            health::repo_types::AppointmentStatus,
            state::testing::{insert_user, state_for},
        };

        fn appointment(title: &str, scheduled_at: OffsetDateTime) -> CreateAppointmentRequest {
            CreateAppointmentRequest {
                title: title.into(),
                provider_name: Some("Dr. Lee".into()),
                location: None,
                scheduled_at,
                notes: None,
                status: None,
            }
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn upcoming_lists_future_scheduled_only(pool: PgPool) {
            let state = state_for(pool.clone());
            let user = insert_user(&pool, "ann@example.com").await;
            let now = OffsetDateTime::now_utc();

            create_appointment(&state, user, appointment("past", now - time::Duration::days(3))).await.unwrap();
            let later = create_appointment(&state, user, appointment("later", now + time::Duration::days(9)))
                .await
                .unwrap();
            let soon = create_appointment(&state, user, appointment("soon", now + time::Duration::days(1)))
                .await
                .unwrap();
            let cancelled = create_appointment(&state, user, appointment("cancelled", now + time::Duration::days(2)))
                .await
                .unwrap();
            update_appointment(
                &state,
                user,
                cancelled.id,
                UpdateAppointmentRequest {
                    status: Some(AppointmentStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

            let upcoming = list_appointments(
                &state,
                user,
                AppointmentFilter { upcoming: true, ..Default::default() },
            )
            .await
            .unwrap();
            let ids: Vec<Uuid> = upcoming.iter().map(|a| a.id).collect();
            assert_eq!(ids, vec![soon.id, later.id]);

            let all = list_appointments(&state, user, AppointmentFilter::default()).await.unwrap();
            assert_eq!(all.len(), 4);
            assert_eq!(all[0].title, "later");
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn other_users_records_are_not_found(pool: PgPool) {
            let state = state_for(pool.clone());
            let owner = insert_user(&pool, "owner@example.com").await;
            let other = insert_user(&pool, "other@example.com").await;
            let visit = create_appointment(&state, owner, appointment("checkup", OffsetDateTime::now_utc()))
                .await
                .unwrap();
            let symptom = create_symptom(
                &state,
                owner,
                CreateSymptomRequest {
                    name: "cough".into(),
                    severity: 3,
                    notes: None,
                    recorded_at: None,
                },
            )
            .await
            .unwrap();
            assert_eq!(symptom.conversation_id, None);

            assert!(matches!(get_appointment(&state, other, visit.id).await, Err(ApiError::NotFound(_))));
            assert!(matches!(
                update_appointment(&state, other, visit.id, UpdateAppointmentRequest::default()).await,
                Err(ApiError::NotFound(_))
            ));
            assert!(matches!(delete_appointment(&state, other, visit.id).await, Err(ApiError::NotFound(_))));
            assert!(matches!(delete_symptom(&state, other, symptom.id).await, Err(ApiError::NotFound(_))));
            assert!(list_symptoms(&state, other, Pagination::default()).await.unwrap().is_empty());

            assert_eq!(list_symptoms(&state, owner, Pagination::default()).await.unwrap().len(), 1);
            delete_symptom(&state, owner, symptom.id).await.unwrap();
        }
    }
}

