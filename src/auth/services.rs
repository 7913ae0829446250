use sqlx::PgExecutor;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, LoginRequest, OAuthLoginRequest, PasswordResetConfirm, RegisterRequest},
    jwt::JwtKeys,
    oauth::OAuthError,
    password::{
        hash_password, is_strong_enough, is_valid_email, normalize_email, reset_token,
        verify_password, MIN_PASSWORD_LEN,
    },
    repo,
    repo_types::{PasswordResetRow, RefreshTokenRow, User},
};
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

fn password_too_short() -> ApiError {
    ApiError::validation(format!(
        "Password must be at least {MIN_PASSWORD_LEN} characters"
    ))
}

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid credentials")
}

/// Stores a fresh refresh token row and signs the matching token pair.
pub async fn issue_tokens<'e>(
    db: impl PgExecutor<'e>,
    keys: &JwtKeys,
    user: User,
) -> ApiResult<AuthResponse> {
    let jti = Uuid::new_v4();
    let expires_at = keys.refresh_expires_at(OffsetDateTime::now_utc());
    repo::insert_refresh_token(db, jti, user.id, expires_at).await?;

    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id, jti)?,
        token_type: "Bearer",
        expires_in: keys.access_ttl.as_secs(),
        user: user.into(),
    })
}

pub async fn register(state: &AppState, mut payload: RegisterRequest) -> ApiResult<AuthResponse> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    if !is_strong_enough(&payload.password) {
        warn!("password too short");
        return Err(password_too_short());
    }
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::conflict("Email already registered"));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create(&state.db, &payload.email, &hash, display_name).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    issue_tokens(&state.db, &JwtKeys::from(&state.config.jwt), user).await
}

pub async fn login(state: &AppState, payload: LoginRequest) -> ApiResult<AuthResponse> {
    let email = normalize_email(&payload.email);
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(invalid_credentials());
    };
    let Some(hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, provider = %user.provider, "password login on external account");
        return Err(invalid_credentials());
    };
    if !verify_password(&payload.password, hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(invalid_credentials());
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    issue_tokens(&state.db, &JwtKeys::from(&state.config.jwt), user).await
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RefreshCheck {
    Valid,
    /// Token was already rotated or revoked; a replay indicates theft.
    Reused,
    Expired,
    Mismatch,
}

pub(crate) fn check_refresh(row: &RefreshTokenRow, sub: Uuid, now: OffsetDateTime) -> RefreshCheck {
    if row.user_id != sub {
        RefreshCheck::Mismatch
    } else if row.revoked_at.is_some() {
        RefreshCheck::Reused
    } else if row.expires_at <= now {
        RefreshCheck::Expired
    } else {
        RefreshCheck::Valid
    }
}

/// Rotates a refresh token: the presented token is revoked and replaced.
pub async fn refresh(state: &AppState, token: &str) -> ApiResult<AuthResponse> {
    let keys = JwtKeys::from(&state.config.jwt);
    let claims = keys.verify_refresh(token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        ApiError::unauthorized("Invalid refresh token")
    })?;

    let mut tx = state.db.begin().await?;
    let Some(row) = repo::find_refresh_token_for_update(&mut *tx, claims.jti).await? else {
        warn!(jti = %claims.jti, "refresh token not found");
        return Err(ApiError::unauthorized("Invalid refresh token"));
    };

    match check_refresh(&row, claims.sub, OffsetDateTime::now_utc()) {
        RefreshCheck::Valid => {}
        RefreshCheck::Reused => {
            let revoked = repo::revoke_all_refresh_tokens(&mut *tx, row.user_id).await?;
            tx.commit().await?;
            warn!(user_id = %row.user_id, jti = %row.id, replaced_by = ?row.replaced_by, revoked, "refresh token reuse detected");
            return Err(ApiError::unauthorized("Refresh token revoked"));
        }
        RefreshCheck::Expired => return Err(ApiError::unauthorized("Refresh token expired")),
        RefreshCheck::Mismatch => return Err(ApiError::unauthorized("Invalid refresh token")),
    }

    let user = User::find_by_id(&mut *tx, row.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let new_jti = Uuid::new_v4();
    repo::insert_refresh_token(
        &mut *tx,
        new_jti,
        user.id,
        keys.refresh_expires_at(OffsetDateTime::now_utc()),
    )
    .await?;
    repo::mark_refresh_replaced(&mut *tx, row.id, new_jti).await?;
    tx.commit().await?;

    info!(user_id = %user.id, "refresh token rotated");
    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id, new_jti)?,
        token_type: "Bearer",
        expires_in: keys.access_ttl.as_secs(),
        user: user.into(),
    })
}

/// Revokes the presented refresh token. Unknown or already revoked tokens are not an error.
pub async fn logout(state: &AppState, token: &str) -> ApiResult<()> {
    let keys = JwtKeys::from(&state.config.jwt);
    let Ok(claims) = keys.verify_refresh(token) else {
        return Ok(());
    };
    let revoked = repo::revoke_refresh_token(&state.db, claims.jti, claims.sub).await?;
    info!(user_id = %claims.sub, revoked, "logout");
    Ok(())
}

pub async fn oauth_login(state: &AppState, payload: OAuthLoginRequest) -> ApiResult<AuthResponse> {
    let provider = state
        .oauth
        .get(payload.provider)
        .ok_or_else(|| ApiError::validation("OAuth provider not configured"))?;

    let identity = provider
        .validate(payload.token.trim())
        .await
        .map_err(|e| match e {
            OAuthError::Rejected(reason) => {
                warn!(provider = payload.provider.as_str(), %reason, "oauth token rejected");
                ApiError::unauthorized("Invalid OAuth token")
            }
            OAuthError::Transport(err) => {
                ApiError::Internal(anyhow::Error::new(err).context("oauth provider request"))
            }
        })?;
    let provider_name = identity.provider.as_str();

    let user = match User::find_by_provider(&state.db, provider_name, &identity.subject).await? {
        Some(user) => user,
        None => {
            if let Some(existing) = User::find_by_email(&state.db, &identity.email).await? {
                warn!(user_id = %existing.id, existing = %existing.provider, requested = provider_name, "oauth email collision");
                return Err(ApiError::conflict(
                    "Email already registered with another sign-in method",
                ));
            }
            let user = User::create_external(
                &state.db,
                &identity.email,
                provider_name,
                &identity.subject,
                identity.display_name.as_deref(),
            )
            .await?;
            info!(user_id = %user.id, provider = provider_name, "user registered via oauth");
            user
        }
    };

    info!(user_id = %user.id, provider = provider_name, "user logged in via oauth");
    issue_tokens(&state.db, &JwtKeys::from(&state.config.jwt), user).await
}

/// Always succeeds so callers cannot learn which emails are registered.
pub async fn request_password_reset(state: &AppState, email: &str) -> ApiResult<()> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }
    match User::find_by_email(&state.db, &email).await? {
        Some(user) if user.password_hash.is_some() => {
            let expires_at =
                OffsetDateTime::now_utc() + TimeDuration::minutes(RESET_TOKEN_TTL_MINUTES);
            repo::insert_password_reset(&state.db, user.id, &reset_token(), expires_at).await?;
            info!(user_id = %user.id, "password reset requested");
        }
        Some(user) => {
            info!(user_id = %user.id, provider = %user.provider, "password reset skipped for external account");
        }
        None => {
            info!("password reset requested for unknown email");
        }
    }
    Ok(())
}

pub(crate) fn reset_usable(row: &PasswordResetRow, now: OffsetDateTime) -> bool {
    row.used_at.is_none() && row.expires_at > now
}

pub async fn confirm_password_reset(state: &AppState, payload: PasswordResetConfirm) -> ApiResult<()> {
    if !is_strong_enough(&payload.new_password) {
        return Err(password_too_short());
    }

    let mut tx = state.db.begin().await?;
    let row = repo::find_password_reset_for_update(&mut *tx, payload.token.trim())
        .await?
        .filter(|r| reset_usable(r, OffsetDateTime::now_utc()))
        .ok_or_else(|| ApiError::validation("Invalid or expired reset token"))?;

    let hash = hash_password(&payload.new_password)?;
    User::update_password(&mut *tx, row.user_id, &hash).await?;
    repo::mark_password_reset_used(&mut *tx, row.id).await?;
    let revoked = repo::revoke_all_refresh_tokens(&mut *tx, row.user_id).await?;
    tx.commit().await?;

    info!(user_id = %row.user_id, revoked, "password reset completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_row(user_id: Uuid) -> RefreshTokenRow {
        RefreshTokenRow {
            id: Uuid::new_v4(),
            user_id,
            expires_at: OffsetDateTime::now_utc() + TimeDuration::hours(1),
            revoked_at: None,
            replaced_by: None,
        }
    }

    #[test]
    fn fresh_refresh_token_is_valid() {
        let user = Uuid::new_v4();
        let row = token_row(user);
        assert_eq!(check_refresh(&row, user, OffsetDateTime::now_utc()), RefreshCheck::Valid);
    }

    #[test]
    fn revoked_refresh_token_counts_as_reuse() {
        let user = Uuid::new_v4();
        let mut row = token_row(user);
        row.revoked_at = Some(OffsetDateTime::now_utc());
        row.replaced_by = Some(Uuid::new_v4());
        assert_eq!(check_refresh(&row, user, OffsetDateTime::now_utc()), RefreshCheck::Reused);
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let user = Uuid::new_v4();
        let row = token_row(user);
        let later = OffsetDateTime::now_utc() + TimeDuration::hours(2);
        assert_eq!(check_refresh(&row, user, later), RefreshCheck::Expired);
        assert_eq!(
            check_refresh(&row, Uuid::new_v4(), OffsetDateTime::now_utc()),
            RefreshCheck::Mismatch
        );
    }

    #[test]
    fn reset_token_single_use_and_expiring() {
        let now = OffsetDateTime::now_utc();
        let mut row = PasswordResetRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            expires_at: now + TimeDuration::minutes(RESET_TOKEN_TTL_MINUTES),
            used_at: None,
        };
        assert!(reset_usable(&row, now));
        assert!(!reset_usable(&row, now + TimeDuration::minutes(61)));
        row.used_at = Some(now);
        assert!(!reset_usable(&row, now));
    }

    #[tokio::test]
    async fn register_validates_before_touching_db() {
        let state = AppState::fake();
        let err = register(
            &state,
            RegisterRequest {
                email: "nope".into(),
                password: "long-enough".into(),
                display_name: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email");

        let err = register(
            &state,
            RegisterRequest {
                email: "a@b.co".into(),
                password: "short".into(),
                display_name: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn refresh_rejects_access_token_without_db() {
        let state = AppState::fake();
        let keys = JwtKeys::from(&state.config.jwt);
        let access = keys.sign_access(Uuid::new_v4()).unwrap();
        let err = refresh(&state, &access).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn logout_with_garbage_token_is_noop() {
        let state = AppState::fake();
        assert!(logout(&state, "garbage").await.is_ok());
    }

    #[tokio::test]
    async fn oauth_unconfigured_provider_is_bad_request() {
        let state = AppState::fake();
        let err = oauth_login(
            &state,
            OAuthLoginRequest {
                provider: super::super::oauth::Provider::Github,
                token: "t".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    mod db {
        use std::sync::Arc;

        use sqlx::PgPool;

        use super::*;
        use crate::{
            auth::oauth::{tests::StaticProvider, OAuthIdentity, OAuthRegistry, Provider},
            state::{test_config, testing::state_for},
        };

        fn register_req(email: &str, password: &str) -> RegisterRequest {
            RegisterRequest {
                email: email.into(),
                password: password.into(),
                display_name: Some(" Ann ".into()),
            }
        }

        fn login_req(email: &str, password: &str) -> LoginRequest {
            LoginRequest {
                email: email.into(),
                password: password.into(),
            }
        }

        async fn live_tokens(pool: &PgPool, user_id: Uuid) -> i64 {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = $1 AND revoked_at IS NULL",
            )
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn register_then_login(pool: PgPool) {
            let state = state_for(pool);
            let registered = register(&state, register_req(" Ann@Example.com ", "correct-horse"))
                .await
                .unwrap();
            assert_eq!(registered.user.email, "ann@example.com");
            assert_eq!(registered.user.display_name.as_deref(), Some("Ann"));

            let again = register(&state, register_req("ann@example.com", "another-pass")).await;
            assert!(matches!(again, Err(ApiError::Conflict(_))));

            let ok = login(&state, login_req("ANN@example.com", "correct-horse")).await.unwrap();
            assert_eq!(ok.user.id, registered.user.id);
            let bad = login(&state, login_req("ann@example.com", "wrong-horse")).await.unwrap_err();
            assert_eq!(bad.to_string(), "Invalid credentials");
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn malformed_login_email_is_invalid_credentials(pool: PgPool) {
            let state = state_for(pool);
            let err = login(&state, login_req("not-an-email", "whatever-pass")).await.unwrap_err();
            assert!(matches!(err, ApiError::Unauthorized(_)));
            assert_eq!(err.to_string(), "Invalid credentials");
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn refresh_rotates_and_reuse_revokes_everything(pool: PgPool) {
            let state = state_for(pool.clone());
            let first = register(&state, register_req("ann@example.com", "correct-horse"))
                .await
                .unwrap();
            let user_id = first.user.id;
            let second_device = login(&state, login_req("ann@example.com", "correct-horse"))
                .await
                .unwrap();
            assert_eq!(live_tokens(&pool, user_id).await, 2);

            let rotated = refresh(&state, &first.refresh_token).await.unwrap();
            assert_ne!(rotated.refresh_token, first.refresh_token);
            assert_eq!(live_tokens(&pool, user_id).await, 2);
            let replaced_by: Option<Uuid> = sqlx::query_scalar(
                "SELECT replaced_by FROM refresh_tokens WHERE user_id = $1 AND revoked_at IS NOT NULL",
            )
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(replaced_by.is_some());

            // replaying the rotated-out token kills every session
            let err = refresh(&state, &first.refresh_token).await.unwrap_err();
            assert_eq!(err.to_string(), "Refresh token revoked");
            assert_eq!(live_tokens(&pool, user_id).await, 0);
            assert!(refresh(&state, &rotated.refresh_token).await.is_err());
            assert!(refresh(&state, &second_device.refresh_token).await.is_err());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn logout_revokes_only_that_token(pool: PgPool) {
            let state = state_for(pool.clone());
            let a = register(&state, register_req("ann@example.com", "correct-horse")).await.unwrap();
            let b = login(&state, login_req("ann@example.com", "correct-horse")).await.unwrap();

            logout(&state, &a.refresh_token).await.unwrap();
            assert_eq!(live_tokens(&pool, a.user.id).await, 1);
            assert!(refresh(&state, &b.refresh_token).await.is_ok());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn password_reset_token_works_once(pool: PgPool) {
            let state = state_for(pool.clone());
            let session = register(&state, register_req("ann@example.com", "correct-horse"))
                .await
                .unwrap();

            request_password_reset(&state, "Ann@Example.com").await.unwrap();
            // unknown addresses look the same to the caller
            request_password_reset(&state, "ghost@example.com").await.unwrap();

            let token: String = sqlx::query_scalar("SELECT token FROM password_reset_requests")
                .fetch_one(&pool)
                .await
                .unwrap();
            let confirm = || PasswordResetConfirm {
                token: token.clone(),
                new_password: "battery-staple".into(),
            };

            confirm_password_reset(&state, confirm()).await.unwrap();
            let reused = confirm_password_reset(&state, confirm()).await.unwrap_err();
            assert!(matches!(reused, ApiError::Validation(_)));

            assert!(login(&state, login_req("ann@example.com", "battery-staple")).await.is_ok());
            assert!(login(&state, login_req("ann@example.com", "correct-horse")).await.is_err());
            // sessions from before the reset are gone
            assert!(refresh(&state, &session.refresh_token).await.is_err());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn oauth_creates_then_reuses_account(pool: PgPool) {
            let identity = |email: &str| OAuthIdentity {
                provider: Provider::Google,
                subject: "g-123".into(),
                email: email.into(),
                display_name: Some("Gina".into()),
            };
            let registry = OAuthRegistry::default().with_provider(Arc::new(StaticProvider {
                provider: Provider::Google,
                token: "good".into(),
                identity: identity("gina@example.com"),
            }));
            let state = AppState::from_parts(pool, Arc::new(test_config()), Arc::new(registry), None);
            let login_with = |token: &str| OAuthLoginRequest {
                provider: Provider::Google,
                token: token.into(),
            };

            let first = oauth_login(&state, login_with("good")).await.unwrap();
            assert_eq!(first.user.provider, "google");
            let second = oauth_login(&state, login_with(" good ")).await.unwrap();
            assert_eq!(first.user.id, second.user.id);

            let rejected = oauth_login(&state, login_with("forged")).await.unwrap_err();
            assert!(matches!(rejected, ApiError::Unauthorized(_)));

            // external accounts have no password
            let err = login(&state, login_req("gina@example.com", "anything-at-all")).await;
            assert!(matches!(err, Err(ApiError::Unauthorized(_))));
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn oauth_email_owned_by_local_account_conflicts(pool: PgPool) {
            let registry = OAuthRegistry::default().with_provider(Arc::new(StaticProvider {
                provider: Provider::Github,
                token: "gh".into(),
                identity: OAuthIdentity {
                    provider: Provider::Github,
                    subject: "42".into(),
                    email: "ann@example.com".into(),
                    display_name: None,
                },
            }));
            let state = AppState::from_parts(pool, Arc::new(test_config()), Arc::new(registry), None);
            register(&state, register_req("ann@example.com", "correct-horse")).await.unwrap();

            let err = oauth_login(
                &state,
                OAuthLoginRequest {
                    provider: Provider::Github,
                    token: "gh".into(),
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ApiError::Conflict(_)));
        }
    }
}

