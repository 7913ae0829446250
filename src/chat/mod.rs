//! AI health chat: conversations, model turns and SSE streaming.

mod dto;
pub mod handlers;
pub mod llm;
mod parse;
mod prompts;
mod repo;
mod repo_types;
mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
