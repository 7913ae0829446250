use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use super::{
    dto::{CreateTagRequest, TagResponse, UpdateTagRequest},
    repo,
};
use crate::{
    common::required_text,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const MAX_NAME_LEN: usize = 50;
pub const DEFAULT_COLOR: &str = "#808080";

fn tag_not_found() -> ApiError {
    ApiError::not_found("Tag not found")
}

/// Accepts `#RRGGBB` (case-insensitive) and returns it upper-cased.
pub(crate) fn normalize_color(color: &str) -> ApiResult<String> {
    lazy_static! {
        static ref COLOR_RE: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap();
    }
    let color = color.trim();
    if !COLOR_RE.is_match(color) {
        return Err(ApiError::validation("color must be a hex value like #1A2B3C"));
    }
    Ok(color.to_uppercase())
}

fn duplicate_name(err: ApiError) -> ApiError {
    match err {
        ApiError::Conflict(_) => ApiError::conflict("A tag with this name already exists"),
        other => other,
    }
}

pub async fn list(state: &AppState, user_id: Uuid) -> ApiResult<Vec<TagResponse>> {
    let rows = repo::list(&state.db, user_id).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<TagResponse> {
    repo::get(&state.db, user_id, id)
        .await?
        .map(Into::into)
        .ok_or_else(tag_not_found)
}

pub async fn create(state: &AppState, user_id: Uuid, req: CreateTagRequest) -> ApiResult<TagResponse> {
    let name = required_text("name", &req.name, MAX_NAME_LEN)?;
    let color = normalize_color(req.color.as_deref().unwrap_or(DEFAULT_COLOR))?;

    let row = repo::insert(&state.db, user_id, &name, &color)
        .await
        .map_err(|e| duplicate_name(e.into()))?;
    info!(%user_id, tag_id = %row.id, "tag created");
    Ok(row.into())
}

pub async fn update(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    req: UpdateTagRequest,
) -> ApiResult<TagResponse> {
    let current = repo::get(&state.db, user_id, id).await?.ok_or_else(tag_not_found)?;
    let name = match req.name.as_deref() {
        Some(n) => required_text("name", n, MAX_NAME_LEN)?,
        None => current.name,
    };
    let color = match req.color.as_deref() {
        Some(c) => normalize_color(c)?,
        None => current.color,
    };

    let row = repo::update(&state.db, user_id, id, &name, &color)
        .await
        .map_err(|e| duplicate_name(e.into()))?
        .ok_or_else(tag_not_found)?;
    info!(%user_id, tag_id = %id, "tag updated");
    Ok(row.into())
}

pub async fn delete(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    if !repo::delete(&state.db, user_id, id).await? {
        return Err(tag_not_found());
    }
    info!(%user_id, tag_id = %id, "tag deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_are_validated_and_uppercased() {
        assert_eq!(normalize_color("#a1b2c3").unwrap(), "#A1B2C3");
        assert_eq!(normalize_color(" #FFFFFF ").unwrap(), "#FFFFFF");
        assert!(normalize_color("a1b2c3").is_err());
        assert!(normalize_color("#abc").is_err());
        assert!(normalize_color("#gggggg").is_err());
        assert_eq!(normalize_color(DEFAULT_COLOR).unwrap(), DEFAULT_COLOR);
    }

    #[test]
    fn unique_violation_gets_friendly_message() {
        let err = duplicate_name(ApiError::conflict("Resource already exists"));
        assert_eq!(err.to_string(), "A tag with this name already exists");
        let other = duplicate_name(ApiError::not_found("x"));
        assert!(matches!(other, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_validates_before_db() {
        let state = AppState::fake();
        let uid = Uuid::new_v4();
        let blank = CreateTagRequest { name: "  ".into(), color: None };
        assert!(matches!(create(&state, uid, blank).await, Err(ApiError::Validation(_))));
        let bad_color = CreateTagRequest { name: "work".into(), color: Some("red".into()) };
        assert!(matches!(create(&state, uid, bad_color).await, Err(ApiError::Validation(_))));
    }

    mod db {
        use sqlx::PgPool;

        use super::*;
        use crate::{
            state::testing::{insert_user, state_for},
            todos::{self, dto::CreateTodoRequest},
        };

        #[sqlx::test(migrations = "./migrations")]
        async fn deleting_tag_keeps_its_todos(pool: PgPool) {
            let state = state_for(pool.clone());
            let user = insert_user(&pool, "ann@example.com").await;
            let tag = create(&state, user, CreateTagRequest { name: "work".into(), color: None })
                .await
                .unwrap();
            let todo = todos::services::create(
                &state,
                user,
                CreateTodoRequest {
                    title: "Report".into(),
                    description: None,
                    priority: None,
                    due_date: None,
                    tag_ids: vec![tag.id],
                },
            )
            .await
            .unwrap();
            assert_eq!(get(&state, user, tag.id).await.unwrap().todo_count, 1);

            delete(&state, user, tag.id).await.unwrap();

            let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todo_tags")
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(links, 0);
            let kept = todos::services::get(&state, user, todo.id).await.unwrap();
            assert!(kept.tags.is_empty());
            assert!(matches!(get(&state, user, tag.id).await, Err(ApiError::NotFound(_))));
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn duplicate_names_conflict_case_insensitively(pool: PgPool) {
            let state = state_for(pool.clone());
            let user = insert_user(&pool, "ann@example.com").await;
            let req = |name: &str| CreateTagRequest { name: name.into(), color: None };
            create(&state, user, req("Home")).await.unwrap();
            let err = create(&state, user, req("home")).await.unwrap_err();
            assert!(matches!(err, ApiError::Conflict(_)));

            // names are per user
            let other = insert_user(&pool, "bob@example.com").await;
            assert!(create(&state, other, req("home")).await.is_ok());
        }
    }
}

