use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::TagRow;

const TAG_SELECT: &str = r#"
    SELECT t.id, t.name, t.color, t.created_at,
           (SELECT COUNT(*) FROM todo_tags tt WHERE tt.tag_id = t.id) AS todo_count
      FROM tags t
"#;

pub async fn list(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<TagRow>> {
    let rows = sqlx::query_as::<_, TagRow>(&format!(
        "{TAG_SELECT} WHERE t.user_id = $1 ORDER BY lower(t.name)"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list tags")?;
    Ok(rows)
}

pub async fn get(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<TagRow>> {
    let row = sqlx::query_as::<_, TagRow>(&format!(
        "{TAG_SELECT} WHERE t.id = $1 AND t.user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get tag")?;
    Ok(row)
}

/// Unique index on `(user_id, lower(name))` turns duplicates into a sqlx unique violation.
pub async fn insert(db: &PgPool, user_id: Uuid, name: &str, color: &str) -> anyhow::Result<TagRow> {
    let row = sqlx::query_as::<_, TagRow>(
        r#"
        INSERT INTO tags (user_id, name, color)
        VALUES ($1, $2, $3)
        RETURNING id, name, color, created_at, 0::BIGINT AS todo_count
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(color)
    .fetch_one(db)
    .await
    .context("insert tag")?;
    Ok(row)
}

pub async fn update(
    db: &PgPool,
    user_id: Uuid,
    id: Uuid,
    name: &str,
    color: &str,
) -> anyhow::Result<Option<TagRow>> {
    let row = sqlx::query_as::<_, TagRow>(
        r#"
        UPDATE tags t SET name = $3, color = $4
         WHERE t.id = $1 AND t.user_id = $2
        RETURNING t.id, t.name, t.color, t.created_at,
                  (SELECT COUNT(*) FROM todo_tags tt WHERE tt.tag_id = t.id) AS todo_count
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(name)
    .bind(color)
    .fetch_optional(db)
    .await
    .context("update tag")?;
    Ok(row)
}

/// Links in `todo_tags` go with the tag (ON DELETE CASCADE); todos stay.
pub async fn delete(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM tags WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await
        .context("delete tag")?;
    Ok(res.rows_affected() > 0)
}
