use anyhow::Context;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::{
    llm::Role,
    repo_types::{ConversationRow, MessageRow},
};

const CONVERSATION_COLUMNS: &str = "id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, role, content, created_at";

pub async fn list_conversations(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<ConversationRow>> {
    let rows = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = $1 ORDER BY updated_at DESC"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list conversations")?;
    Ok(rows)
}

pub async fn get_conversation<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    id: Uuid,
) -> anyhow::Result<Option<ConversationRow>> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get conversation")?;
    Ok(row)
}

pub async fn insert_conversation(
    db: &PgPool,
    user_id: Uuid,
    title: Option<&str>,
) -> anyhow::Result<ConversationRow> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (user_id, title) VALUES ($1, $2) RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(user_id)
    .bind(title)
    .fetch_one(db)
    .await
    .context("insert conversation")?;
    Ok(row)
}

/// Bumps `updated_at`; `title` is only written when the conversation has none.
pub async fn touch_conversation<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
    title: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE conversations SET updated_at = now(), title = COALESCE(title, $2) WHERE id = $1")
        .bind(id)
        .bind(title)
        .execute(db)
        .await
        .context("touch conversation")?;
    Ok(())
}

pub async fn delete_conversation(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM conversations WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await
        .context("delete conversation")?;
    Ok(res.rows_affected() > 0)
}

pub async fn list_messages(db: &PgPool, conversation_id: Uuid) -> anyhow::Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at, id"
    ))
    .bind(conversation_id)
    .fetch_all(db)
    .await
    .context("list messages")?;
    Ok(rows)
}

/// Newest `limit` messages, returned oldest first.
pub async fn recent_messages(
    db: &PgPool,
    conversation_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS} FROM (
            SELECT {MESSAGE_COLUMNS}
              FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2
        ) recent
        ORDER BY created_at, id
        "#
    ))
    .bind(conversation_id)
    .bind(limit)
    .fetch_all(db)
    .await
    .context("recent messages")?;
    Ok(rows)
}

pub async fn insert_message<'e>(
    db: impl PgExecutor<'e>,
    conversation_id: Uuid,
    role: Role,
    content: &str,
) -> anyhow::Result<MessageRow> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "INSERT INTO messages (conversation_id, role, content) VALUES ($1, $2, $3) RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .fetch_one(db)
    .await
    .context("insert message")?;
    Ok(row)
}
