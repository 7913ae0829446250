use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod oauth;
mod password;
pub(crate) mod rate_limit;
mod repo;
mod repo_types;
pub mod services;

pub use extractors::AuthUser;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes(state))
        .merge(handlers::me_routes())
}
