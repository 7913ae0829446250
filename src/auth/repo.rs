use anyhow::Context;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{PasswordResetRow, RefreshTokenRow, User};

const USER_COLUMNS: &str =
    "id, email, password_hash, provider, provider_subject, display_name, created_at";

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id<'e>(db: impl PgExecutor<'e>, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    pub async fn find_by_provider(
        db: &PgPool,
        provider: &str,
        subject: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE provider = $1 AND provider_subject = $2"
        ))
        .bind(provider)
        .bind(subject)
        .fetch_optional(db)
        .await
        .context("find user by provider")?;
        Ok(user)
    }

    /// Create a new local user with hashed password.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, provider, display_name)
            VALUES ($1, $2, 'local', $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .fetch_one(db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    pub async fn create_external(
        db: &PgPool,
        email: &str,
        provider: &str,
        subject: &str,
        display_name: Option<&str>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, provider, provider_subject, display_name)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(provider)
        .bind(subject)
        .bind(display_name)
        .fetch_one(db)
        .await
        .context("insert external user")?;
        Ok(user)
    }

    pub async fn update_password<'e>(
        db: impl PgExecutor<'e>,
        id: Uuid,
        password_hash: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(db)
            .await
            .context("update password")?;
        Ok(())
    }

    /// Returns false when the user was already gone.
    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }
}

// ---- refresh tokens ----

pub async fn insert_refresh_token<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
    user_id: Uuid,
    expires_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO refresh_tokens (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .execute(db)
        .await
        .context("insert refresh token")?;
    Ok(())
}

/// Locks the row so two concurrent refreshes cannot both rotate it.
pub async fn find_refresh_token_for_update<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
) -> anyhow::Result<Option<RefreshTokenRow>> {
    let row = sqlx::query_as::<_, RefreshTokenRow>(
        r#"
        SELECT id, user_id, expires_at, revoked_at, replaced_by
          FROM refresh_tokens
         WHERE id = $1
           FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("find refresh token")?;
    Ok(row)
}

pub async fn mark_refresh_replaced<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
    replaced_by: Uuid,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = now(), replaced_by = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(replaced_by)
    .execute(db)
    .await
    .context("mark refresh token replaced")?;
    Ok(())
}

pub async fn revoke_refresh_token<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<u64> {
    let res = sqlx::query(
        r#"
        UPDATE refresh_tokens SET revoked_at = now()
         WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL
        "#,
    )
    .bind(id)
    .bind(user_id)
    .execute(db)
    .await
    .context("revoke refresh token")?;
    Ok(res.rows_affected())
}

pub async fn revoke_all_refresh_tokens<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
) -> anyhow::Result<u64> {
    let res = sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(db)
    .await
    .context("revoke all refresh tokens")?;
    Ok(res.rows_affected())
}

// ---- password reset ----

pub async fn insert_password_reset(
    db: &PgPool,
    user_id: Uuid,
    token: &str,
    expires_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO password_reset_requests (user_id, token, expires_at) VALUES ($1, $2, $3)",
    )
    .bind(user_id)
    .bind(token)
    .bind(expires_at)
    .execute(db)
    .await
    .context("insert password reset")?;
    Ok(())
}

pub async fn find_password_reset_for_update<'e>(
    db: impl PgExecutor<'e>,
    token: &str,
) -> anyhow::Result<Option<PasswordResetRow>> {
    let row = sqlx::query_as::<_, PasswordResetRow>(
        r#"
        SELECT id, user_id, expires_at, used_at
          FROM password_reset_requests
         WHERE token = $1
           FOR UPDATE
        "#,
    )
    .bind(token)
    .fetch_optional(db)
    .await
    .context("find password reset")?;
    Ok(row)
}

pub async fn mark_password_reset_used<'e>(db: impl PgExecutor<'e>, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE password_reset_requests SET used_at = now() WHERE id = $1")
        .bind(id)
        .execute(db)
        .await
        .context("mark password reset used")?;
    Ok(())
}
