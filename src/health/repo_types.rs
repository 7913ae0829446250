use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct SymptomRow {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub name: String,
    pub severity: i16,
    pub notes: Option<String>,
    pub recorded_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Validated symptom ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSymptom {
    pub name: String,
    pub severity: i16,
    pub notes: Option<String>,
    pub recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[default]
    Scheduled = 0,
    Completed = 1,
    Cancelled = 2,
}

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub provider_name: Option<String>,
    pub location: Option<String>,
    pub scheduled_at: OffsetDateTime,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
