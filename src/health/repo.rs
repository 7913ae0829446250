use anyhow::Context;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::repo_types::{AppointmentRow, NewSymptom, SymptomRow};
use crate::common::Pagination;

const SYMPTOM_COLUMNS: &str =
    "id, conversation_id, name, severity, notes, recorded_at, created_at";
const APPOINTMENT_COLUMNS: &str = "id, user_id, title, provider_name, location, scheduled_at, \
                                   notes, status, created_at, updated_at";

// ---- symptoms ----

pub async fn list_symptoms(
    db: &PgPool,
    user_id: Uuid,
    page: Pagination,
) -> anyhow::Result<Vec<SymptomRow>> {
    let rows = sqlx::query_as::<_, SymptomRow>(&format!(
        r#"
        SELECT {SYMPTOM_COLUMNS}
          FROM symptoms
         WHERE user_id = $1
         ORDER BY recorded_at DESC
         LIMIT $2 OFFSET $3
        "#
    ))
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(db)
    .await
    .context("list symptoms")?;
    Ok(rows)
}

pub async fn insert_symptom<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    conversation_id: Option<Uuid>,
    symptom: &NewSymptom,
) -> anyhow::Result<SymptomRow> {
    let row = sqlx::query_as::<_, SymptomRow>(&format!(
        r#"
        INSERT INTO symptoms (user_id, conversation_id, name, severity, notes, recorded_at)
        VALUES ($1, $2, $3, $4, $5, COALESCE($6, now()))
        RETURNING {SYMPTOM_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(conversation_id)
    .bind(&symptom.name)
    .bind(symptom.severity)
    .bind(&symptom.notes)
    .bind(symptom.recorded_at)
    .fetch_one(db)
    .await
    .context("insert symptom")?;
    Ok(row)
}

pub async fn delete_symptom(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM symptoms WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await
        .context("delete symptom")?;
    Ok(res.rows_affected() > 0)
}

// ---- appointments ----

pub async fn list_appointments(
    db: &PgPool,
    user_id: Uuid,
    upcoming: bool,
    page: Pagination,
) -> anyhow::Result<Vec<AppointmentRow>> {
    let filter = if upcoming {
        "AND scheduled_at >= now() AND status = 0 ORDER BY scheduled_at ASC"
    } else {
        "ORDER BY scheduled_at DESC"
    };
    let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE user_id = $1 {filter} LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(db)
    .await
    .context("list appointments")?;
    Ok(rows)
}

pub async fn get_appointment(
    db: &PgPool,
    user_id: Uuid,
    id: Uuid,
) -> anyhow::Result<Option<AppointmentRow>> {
    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get appointment")?;
    Ok(row)
}

pub async fn insert_appointment(db: &PgPool, row: &AppointmentRow) -> anyhow::Result<AppointmentRow> {
    let saved = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        INSERT INTO appointments (user_id, title, provider_name, location, scheduled_at, notes, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(row.user_id)
    .bind(&row.title)
    .bind(&row.provider_name)
    .bind(&row.location)
    .bind(row.scheduled_at)
    .bind(&row.notes)
    .bind(row.status)
    .fetch_one(db)
    .await
    .context("insert appointment")?;
    Ok(saved)
}

pub async fn save_appointment(db: &PgPool, row: &AppointmentRow) -> anyhow::Result<Option<AppointmentRow>> {
    let saved = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointments
           SET title = $3, provider_name = $4, location = $5, scheduled_at = $6,
               notes = $7, status = $8, updated_at = now()
         WHERE id = $1 AND user_id = $2
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(row.id)
    .bind(row.user_id)
    .bind(&row.title)
    .bind(&row.provider_name)
    .bind(&row.location)
    .bind(row.scheduled_at)
    .bind(&row.notes)
    .bind(row.status)
    .fetch_optional(db)
    .await
    .context("update appointment")?;
    Ok(saved)
}

pub async fn delete_appointment(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM appointments WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await
        .context("delete appointment")?;
    Ok(res.rows_affected() > 0)
}
