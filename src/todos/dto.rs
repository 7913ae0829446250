use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Priority, TodoRow, TodoTagRow};
use crate::common::{nullable, nullable_datetime, Pagination};

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// Partial update: absent fields stay as they are, `null` clears nullable ones.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTodoRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_completed: Option<bool>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "nullable_datetime")]
    pub due_date: Option<Option<OffsetDateTime>>,
}

#[derive(Debug, Deserialize)]
pub struct SetTagsRequest {
    pub tag_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TodoFilter {
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub tag_id: Option<Uuid>,
    pub search: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_before: Option<OffsetDateTime>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TodoFilter {
    pub fn page(&self) -> Pagination {
        let default = Pagination::default();
        Pagination {
            limit: self.limit.unwrap_or(default.limit),
            offset: self.offset.unwrap_or(default.offset),
        }
        .normalized()
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSummary {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct TodoResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub is_completed: bool,
    pub priority: Priority,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub tags: Vec<TagSummary>,
}

impl TodoResponse {
    pub fn new(row: TodoRow, tags: Vec<TagSummary>) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            is_completed: row.is_completed,
            priority: row.priority,
            due_date: row.due_date,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            tags,
        }
    }
}

/// Pairs every todo with its tags, keeping the order of `rows`.
pub fn attach_tags(rows: Vec<TodoRow>, tags: Vec<TodoTagRow>) -> Vec<TodoResponse> {
    let mut by_todo: std::collections::HashMap<Uuid, Vec<TagSummary>> =
        std::collections::HashMap::new();
    for t in tags {
        by_todo.entry(t.todo_id).or_default().push(TagSummary {
            id: t.id,
            name: t.name,
            color: t.color,
        });
    }
    rows.into_iter()
        .map(|row| {
            let tags = by_todo.remove(&row.id).unwrap_or_default();
            TodoResponse::new(row, tags)
        })
        .collect()
}
