use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{AppointmentRow, AppointmentStatus, SymptomRow};
use crate::common::{nullable, Pagination};

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateSymptomRequest {
    pub name: String,
    pub severity: i16,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct SymptomResponse {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub name: String,
    pub severity: i16,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<SymptomRow> for SymptomResponse {
    fn from(r: SymptomRow) -> Self {
        Self {
            id: r.id,
            conversation_id: r.conversation_id,
            name: r.name,
            severity: r.severity,
            notes: r.notes,
            recorded_at: r.recorded_at,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub title: String,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub provider_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub location: Option<Option<String>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scheduled_at: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentFilter {
    #[serde(default)]
    pub upcoming: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AppointmentFilter {
    pub fn page(&self) -> Pagination {
        let default = Pagination::default();
        Pagination {
            limit: self.limit.unwrap_or(default.limit),
            offset: self.offset.unwrap_or(default.offset),
        }
        .normalized()
    }
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub title: String,
    pub provider_name: Option<String>,
    pub location: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<AppointmentRow> for AppointmentResponse {
    fn from(r: AppointmentRow) -> Self {
        Self {
            id: r.id,
            title: r.title,
            provider_name: r.provider_name,
            location: r.location,
            scheduled_at: r.scheduled_at,
            notes: r.notes,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
