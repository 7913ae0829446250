pub(crate) mod dto;
pub mod handlers;
pub(crate) mod repo;
pub(crate) mod repo_types;
pub(crate) mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
