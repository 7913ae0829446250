use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: OffsetDateTime,
    pub todo_count: i64,
}
