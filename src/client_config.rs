//! Public settings a client needs before the user signs in.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{auth::oauth::Provider, state::AppState};

pub const API_VERSION: &str = "v1";

#[derive(Debug, Serialize)]
pub struct OAuthClientIds {
    pub google_client_id: Option<String>,
    pub microsoft_client_id: Option<String>,
    pub github_client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Features {
    pub chat: bool,
}

#[derive(Debug, Serialize)]
pub struct ClientConfig {
    pub api_version: &'static str,
    pub oauth: OAuthClientIds,
    pub features: Features,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(client_config))
}

/// Client ids are only published for providers that sign-in accepts.
pub async fn client_config(State(state): State<AppState>) -> Json<ClientConfig> {
    let oauth = &state.config.oauth;
    let enabled = |provider: Provider, id: &Option<String>| {
        state.oauth.get(provider).and_then(|_| id.clone())
    };
    Json(ClientConfig {
        api_version: API_VERSION,
        oauth: OAuthClientIds {
            google_client_id: enabled(Provider::Google, &oauth.google_client_id),
            microsoft_client_id: enabled(Provider::Microsoft, &oauth.microsoft_client_id),
            github_client_id: enabled(Provider::Github, &oauth.github_client_id),
        },
        features: Features {
            chat: state.chat.is_some(),
        },
    })
}
