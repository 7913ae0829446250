use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    dto::{attach_tags, CreateTodoRequest, TodoFilter, TodoResponse, UpdateTodoRequest},
    repo,
    repo_types::{NewTodo, TodoRow},
};
use crate::{
    common::{optional_text, required_text},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

fn todo_not_found() -> ApiError {
    ApiError::not_found("Todo not found")
}

fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut out = ids.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

pub(crate) fn validate_new(req: &CreateTodoRequest) -> ApiResult<NewTodo> {
    Ok(NewTodo {
        title: required_text("title", &req.title, MAX_TITLE_LEN)?,
        description: optional_text("description", req.description.as_deref(), MAX_DESCRIPTION_LEN)?,
        priority: req.priority.unwrap_or_default(),
        due_date: req.due_date,
    })
}

/// Applies a partial update in memory. Completion changes keep `completed_at` in sync.
pub(crate) fn apply_update(
    mut row: TodoRow,
    req: UpdateTodoRequest,
    now: OffsetDateTime,
) -> ApiResult<TodoRow> {
    if let Some(title) = req.title {
        row.title = required_text("title", &title, MAX_TITLE_LEN)?;
    }
    if let Some(description) = req.description {
        row.description =
            optional_text("description", description.as_deref(), MAX_DESCRIPTION_LEN)?;
    }
    if let Some(priority) = req.priority {
        row.priority = priority;
    }
    if let Some(due_date) = req.due_date {
        row.due_date = due_date;
    }
    if let Some(done) = req.is_completed {
        if done != row.is_completed {
            row.is_completed = done;
            row.completed_at = done.then_some(now);
        }
    }
    Ok(row)
}

async fn ensure_tags_owned<'e>(
    db: impl sqlx::PgExecutor<'e>,
    user_id: Uuid,
    tag_ids: &[Uuid],
) -> ApiResult<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let owned = repo::count_owned_tags(db, user_id, tag_ids).await?;
    if owned != tag_ids.len() as i64 {
        return Err(ApiError::not_found("Tag not found"));
    }
    Ok(())
}

async fn with_tags(state: &AppState, row: TodoRow) -> ApiResult<TodoResponse> {
    let tags = repo::tags_for(&state.db, &[row.id]).await?;
    Ok(attach_tags(vec![row], tags)
        .pop()
        .ok_or_else(|| anyhow::anyhow!("todo vanished while loading tags"))?)
}

pub async fn list(state: &AppState, user_id: Uuid, filter: TodoFilter) -> ApiResult<Vec<TodoResponse>> {
    let rows = repo::list(&state.db, user_id, &filter).await?;
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let tags = repo::tags_for(&state.db, &ids).await?;
    debug!(%user_id, count = rows.len(), "todos listed");
    Ok(attach_tags(rows, tags))
}

pub async fn create(state: &AppState, user_id: Uuid, req: CreateTodoRequest) -> ApiResult<TodoResponse> {
    let new = validate_new(&req)?;
    let tag_ids = dedup(&req.tag_ids);

    let mut tx = state.db.begin().await?;
    ensure_tags_owned(&mut *tx, user_id, &tag_ids).await?;
    let row = repo::insert(&mut *tx, user_id, &new).await?;
    repo::add_tags(&mut *tx, row.id, &tag_ids).await?;
    tx.commit().await?;

    info!(%user_id, todo_id = %row.id, "todo created");
    with_tags(state, row).await
}

pub async fn get(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<TodoResponse> {
    let row = repo::get(&state.db, user_id, id).await?.ok_or_else(todo_not_found)?;
    with_tags(state, row).await
}

pub async fn update(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    req: UpdateTodoRequest,
) -> ApiResult<TodoResponse> {
    let mut tx = state.db.begin().await?;
    let row = repo::get_for_update(&mut *tx, user_id, id)
        .await?
        .ok_or_else(todo_not_found)?;
    let updated = apply_update(row, req, OffsetDateTime::now_utc())?;
    let saved = repo::save(&mut *tx, &updated).await?;
    tx.commit().await?;

    info!(%user_id, todo_id = %id, "todo updated");
    with_tags(state, saved).await
}

pub async fn toggle(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<TodoResponse> {
    let row = repo::toggle(&state.db, user_id, id).await?.ok_or_else(todo_not_found)?;
    info!(%user_id, todo_id = %id, completed = row.is_completed, "todo toggled");
    with_tags(state, row).await
}

pub async fn delete(state: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<()> {
    if !repo::delete(&state.db, user_id, id).await? {
        return Err(todo_not_found());
    }
    info!(%user_id, todo_id = %id, "todo deleted");
    Ok(())
}

pub async fn set_tags(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    tag_ids: &[Uuid],
) -> ApiResult<TodoResponse> {
    let tag_ids = dedup(tag_ids);
    let mut tx = state.db.begin().await?;
    let row = repo::get_for_update(&mut *tx, user_id, id)
        .await?
        .ok_or_else(todo_not_found)?;
    ensure_tags_owned(&mut *tx, user_id, &tag_ids).await?;
    repo::clear_tags(&mut *tx, id).await?;
    repo::add_tags(&mut *tx, id, &tag_ids).await?;
    tx.commit().await?;

    info!(%user_id, todo_id = %id, tags = tag_ids.len(), "todo tags replaced");
    with_tags(state, row).await
}

pub async fn attach_tag(state: &AppState, user_id: Uuid, id: Uuid, tag_id: Uuid) -> ApiResult<TodoResponse> {
    let row = repo::get(&state.db, user_id, id).await?.ok_or_else(todo_not_found)?;
    ensure_tags_owned(&state.db, user_id, &[tag_id]).await?;
    repo::add_tags(&state.db, id, &[tag_id]).await?;
    with_tags(state, row).await
}

pub async fn detach_tag(state: &AppState, user_id: Uuid, id: Uuid, tag_id: Uuid) -> ApiResult<TodoResponse> {
    let row = repo::get(&state.db, user_id, id).await?.ok_or_else(todo_not_found)?;
    repo::remove_tag(&state.db, id, tag_id).await?;
    with_tags(state, row).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::todos::repo_types::Priority;

    fn row() -> TodoRow {
        TodoRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Write report".into(),
            description: Some("quarterly".into()),
            is_completed: false,
            priority: Priority::Medium,
            due_date: Some(OffsetDateTime::UNIX_EPOCH),
            completed_at: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn create_req(title: &str) -> CreateTodoRequest {
        CreateTodoRequest {
            title: title.into(),
            description: Some("   ".into()),
            priority: None,
            due_date: None,
            tag_ids: vec![],
        }
    }

    #[test]
    fn new_todo_is_trimmed_with_default_priority() {
        let new = validate_new(&create_req("  Buy milk ")).unwrap();
        assert_eq!(new.title, "Buy milk");
        assert_eq!(new.description, None);
        assert_eq!(new.priority, Priority::Medium);
    }

    #[test]
    fn new_todo_rejects_blank_or_long_title() {
        assert!(validate_new(&create_req("   ")).is_err());
        assert!(validate_new(&create_req(&"x".repeat(MAX_TITLE_LEN + 1))).is_err());
        assert!(validate_new(&create_req(&"x".repeat(MAX_TITLE_LEN))).is_ok());
    }

    #[test]
    fn absent_fields_are_untouched() {
        let before = row();
        let after = apply_update(before.clone(), UpdateTodoRequest::default(), OffsetDateTime::now_utc()).unwrap();
        assert_eq!(after.title, before.title);
        assert_eq!(after.description, before.description);
        assert_eq!(after.due_date, before.due_date);
    }

    #[test]
    fn null_clears_nullable_fields() {
        let req: UpdateTodoRequest =
            serde_json::from_str(r#"{"description":null,"due_date":null,"priority":"critical"}"#).unwrap();
        let after = apply_update(row(), req, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(after.description, None);
        assert_eq!(after.due_date, None);
        assert_eq!(after.priority, Priority::Critical);
    }

    #[test]
    fn completion_stamps_and_clears_completed_at() {
        let now = OffsetDateTime::now_utc();
        let done = apply_update(
            row(),
            UpdateTodoRequest { is_completed: Some(true), ..Default::default() },
            now,
        )
        .unwrap();
        assert!(done.is_completed);
        assert_eq!(done.completed_at, Some(now));

        // re-completing keeps the original timestamp
        let later = now + time::Duration::hours(1);
        let again = apply_update(
            done.clone(),
            UpdateTodoRequest { is_completed: Some(true), ..Default::default() },
            later,
        )
        .unwrap();
        assert_eq!(again.completed_at, Some(now));

        let reopened = apply_update(
            done,
            UpdateTodoRequest { is_completed: Some(false), ..Default::default() },
            later,
        )
        .unwrap();
        assert!(!reopened.is_completed);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn update_rejects_blank_title() {
        let req = UpdateTodoRequest { title: Some("  ".into()), ..Default::default() };
        assert!(apply_update(row(), req, OffsetDateTime::now_utc()).is_err());
    }

    #[test]
    fn dedup_sorts_and_removes_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let out = dedup(&[a, b, a]);
        assert_eq!(out.len(), 2);
    }

    mod db {
        use sqlx::PgPool;

        use super::*;
        use crate::{
            state::testing::{insert_user, state_for},
            tags::{self, dto::CreateTagRequest},
        };

        fn tagged(title: &str, tag_ids: Vec<Uuid>) -> CreateTodoRequest {
            CreateTodoRequest {
                title: title.into(),
                description: Some("from the shop".into()),
                priority: Some(Priority::High),
                due_date: None,
                tag_ids,
            }
        }

        async fn tag(state: &AppState, user_id: Uuid, name: &str) -> Uuid {
            let req = CreateTagRequest { name: name.into(), color: None };
            tags::services::create(state, user_id, req).await.unwrap().id
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn created_todo_is_persisted_with_tags(pool: PgPool) {
            let state = state_for(pool.clone());
            let user = insert_user(&pool, "ann@example.com").await;
            let errand = tag(&state, user, "errand").await;

            let created = create(&state, user, tagged(" Buy milk ", vec![errand, errand]))
                .await
                .unwrap();
            assert_eq!(created.title, "Buy milk");
            assert_eq!(created.tags.len(), 1);

            let stored: (String, i16, bool) = sqlx::query_as(
                "SELECT title, priority, is_completed FROM todo_items WHERE id = $1",
            )
            .bind(created.id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(stored, ("Buy milk".to_string(), Priority::High as i16, false));

            let fetched = get(&state, user, created.id).await.unwrap();
            assert_eq!(fetched.tags[0].id, errand);
            let listed = list(&state, user, TodoFilter::default()).await.unwrap();
            assert_eq!(listed.len(), 1);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn toggle_round_trips_completion(pool: PgPool) {
            let state = state_for(pool.clone());
            let user = insert_user(&pool, "ann@example.com").await;
            let todo = create(&state, user, tagged("Call mum", vec![])).await.unwrap();

            let done = toggle(&state, user, todo.id).await.unwrap();
            assert!(done.is_completed);
            assert!(done.completed_at.is_some());
            let open = toggle(&state, user, todo.id).await.unwrap();
            assert!(!open.is_completed);
            assert!(open.completed_at.is_none());
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn other_users_todos_are_not_found(pool: PgPool) {
            let state = state_for(pool.clone());
            let owner = insert_user(&pool, "owner@example.com").await;
            let other = insert_user(&pool, "other@example.com").await;
            let todo = create(&state, owner, tagged("Private", vec![])).await.unwrap();
            let others_tag = tag(&state, other, "mine").await;

            let not_found = |res: ApiResult<TodoResponse>| {
                assert!(matches!(res, Err(ApiError::NotFound(_))));
            };
            not_found(get(&state, other, todo.id).await);
            not_found(toggle(&state, other, todo.id).await);
            not_found(update(&state, other, todo.id, UpdateTodoRequest::default()).await);
            not_found(set_tags(&state, other, todo.id, &[]).await);
            assert!(matches!(delete(&state, other, todo.id).await, Err(ApiError::NotFound(_))));

            // a foreign tag cannot be attached either
            not_found(attach_tag(&state, owner, todo.id, others_tag).await);
            not_found(create(&state, owner, tagged("Sneaky", vec![others_tag])).await);

            assert!(get(&state, owner, todo.id).await.is_ok());
            assert!(list(&state, other, TodoFilter::default()).await.unwrap().is_empty());
        }
    }
}

