use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Stored as SMALLINT so ordering by priority is numeric.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

#[derive(Debug, Clone, FromRow)]
pub struct TodoRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    pub priority: Priority,
    pub due_date: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A tag attached to a todo, as read from `todo_tags JOIN tags`.
#[derive(Debug, Clone, FromRow)]
pub struct TodoTagRow {
    pub todo_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

/// Validated input for a new todo.
#[derive(Debug, Clone)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub due_date: Option<OffsetDateTime>,
}
