use anyhow::Context;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    dto::TodoFilter,
    repo_types::{NewTodo, TodoRow, TodoTagRow},
};
use crate::common::like_pattern;

const TODO_COLUMNS: &str = "id, user_id, title, description, is_completed, priority, due_date, \
                            completed_at, created_at, updated_at";

pub async fn list(db: &PgPool, user_id: Uuid, filter: &TodoFilter) -> anyhow::Result<Vec<TodoRow>> {
    let page = filter.page();
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {TODO_COLUMNS} FROM todo_items t WHERE t.user_id = "));
    qb.push_bind(user_id);

    if let Some(completed) = filter.completed {
        qb.push(" AND t.is_completed = ").push_bind(completed);
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND t.priority = ").push_bind(priority);
    }
    if let Some(tag_id) = filter.tag_id {
        qb.push(" AND EXISTS (SELECT 1 FROM todo_tags tt WHERE tt.todo_id = t.id AND tt.tag_id = ")
            .push_bind(tag_id)
            .push(")");
    }
    if let Some(term) = filter.search_term() {
        let pattern = like_pattern(term);
        qb.push(" AND (t.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR t.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(before) = filter.due_before {
        qb.push(" AND t.due_date < ").push_bind(before);
    }

    qb.push(
        " ORDER BY t.is_completed ASC, t.priority DESC, t.due_date ASC NULLS LAST, t.created_at DESC",
    );
    qb.push(" LIMIT ").push_bind(page.limit);
    qb.push(" OFFSET ").push_bind(page.offset);

    let rows = qb
        .build_query_as::<TodoRow>()
        .fetch_all(db)
        .await
        .context("list todos")?;
    Ok(rows)
}

pub async fn get<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    id: Uuid,
) -> anyhow::Result<Option<TodoRow>> {
    let row = sqlx::query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todo_items WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get todo")?;
    Ok(row)
}

pub async fn get_for_update<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    id: Uuid,
) -> anyhow::Result<Option<TodoRow>> {
    let row = sqlx::query_as::<_, TodoRow>(&format!(
        "SELECT {TODO_COLUMNS} FROM todo_items WHERE id = $1 AND user_id = $2 FOR UPDATE"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("lock todo")?;
    Ok(row)
}

pub async fn insert<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    todo: &NewTodo,
) -> anyhow::Result<TodoRow> {
    let row = sqlx::query_as::<_, TodoRow>(&format!(
        r#"
        INSERT INTO todo_items (user_id, title, description, priority, due_date)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {TODO_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&todo.title)
    .bind(&todo.description)
    .bind(todo.priority)
    .bind(todo.due_date)
    .fetch_one(db)
    .await
    .context("insert todo")?;
    Ok(row)
}

/// Writes every mutable column of `row` back; `updated_at` is set by the database.
pub async fn save<'e>(db: impl PgExecutor<'e>, row: &TodoRow) -> anyhow::Result<TodoRow> {
    let saved = sqlx::query_as::<_, TodoRow>(&format!(
        r#"
        UPDATE todo_items
           SET title = $3, description = $4, is_completed = $5, priority = $6,
               due_date = $7, completed_at = $8, updated_at = now()
         WHERE id = $1 AND user_id = $2
        RETURNING {TODO_COLUMNS}
        "#
    ))
    .bind(row.id)
    .bind(row.user_id)
    .bind(&row.title)
    .bind(&row.description)
    .bind(row.is_completed)
    .bind(row.priority)
    .bind(row.due_date)
    .bind(row.completed_at)
    .fetch_one(db)
    .await
    .context("update todo")?;
    Ok(saved)
}

pub async fn toggle(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<TodoRow>> {
    let row = sqlx::query_as::<_, TodoRow>(&format!(
        r#"
        UPDATE todo_items
           SET is_completed = NOT is_completed,
               completed_at = CASE WHEN is_completed THEN NULL ELSE now() END,
               updated_at = now()
         WHERE id = $1 AND user_id = $2
        RETURNING {TODO_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("toggle todo")?;
    Ok(row)
}

pub async fn delete(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM todo_items WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await
        .context("delete todo")?;
    Ok(res.rows_affected() > 0)
}

// ---- tags of todos ----

pub async fn tags_for<'e>(db: impl PgExecutor<'e>, todo_ids: &[Uuid]) -> anyhow::Result<Vec<TodoTagRow>> {
    if todo_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, TodoTagRow>(
        r#"
        SELECT tt.todo_id, t.id, t.name, t.color
          FROM todo_tags tt
          JOIN tags t ON t.id = tt.tag_id
         WHERE tt.todo_id = ANY($1)
         ORDER BY lower(t.name)
        "#,
    )
    .bind(todo_ids)
    .fetch_all(db)
    .await
    .context("load todo tags")?;
    Ok(rows)
}

/// How many of `tag_ids` (deduplicated) belong to `user_id`.
pub async fn count_owned_tags<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    tag_ids: &[Uuid],
) -> anyhow::Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM tags WHERE user_id = $1 AND id = ANY($2)",
    )
    .bind(user_id)
    .bind(tag_ids)
    .fetch_one(db)
    .await
    .context("count owned tags")?;
    Ok(n)
}

pub async fn clear_tags<'e>(db: impl PgExecutor<'e>, todo_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM todo_tags WHERE todo_id = $1")
        .bind(todo_id)
        .execute(db)
        .await
        .context("clear todo tags")?;
    Ok(())
}

pub async fn add_tags<'e>(db: impl PgExecutor<'e>, todo_id: Uuid, tag_ids: &[Uuid]) -> anyhow::Result<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO todo_tags (todo_id, tag_id)
        SELECT $1, tag_id FROM UNNEST($2::uuid[]) AS tag_id
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(todo_id)
    .bind(tag_ids)
    .execute(db)
    .await
    .context("add todo tags")?;
    Ok(())
}

pub async fn remove_tag(db: &PgPool, todo_id: Uuid, tag_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM todo_tags WHERE todo_id = $1 AND tag_id = $2")
        .bind(todo_id)
        .bind(tag_id)
        .execute(db)
        .await
        .context("remove todo tag")?;
    Ok(())
}
