//! External identity validation for Google, Microsoft and GitHub sign-in.
//!
//! Each provider turns a client-supplied token into an [`OAuthIdentity`] by
//! asking the provider who the token belongs to, after checking the token was
//! issued to this app. The [`OAuthRegistry`] holds only the providers that are
//! fully configured.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OAuthConfig;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const MICROSOFT_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";
const GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Github => "github",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub provider: Provider,
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;
    async fn validate(&self, token: &str) -> Result<OAuthIdentity, OAuthError>;
}

/// Provider dispatch table keyed by [`Provider`].
#[derive(Default)]
pub struct OAuthRegistry {
    providers: HashMap<Provider, Arc<dyn IdentityProvider>>,
}

impl OAuthRegistry {
    pub fn from_config(cfg: &OAuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("taskhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut registry = Self::default();
        if let Some(id) = &cfg.google_client_id {
            registry = registry.with_provider(Arc::new(GoogleProvider {
                client: client.clone(),
                client_id: id.clone(),
            }));
        }
        if let Some(id) = &cfg.microsoft_client_id {
            registry = registry.with_provider(Arc::new(MicrosoftProvider {
                client: client.clone(),
                client_id: id.clone(),
            }));
        }
        match (&cfg.github_client_id, &cfg.github_client_secret) {
            (Some(id), Some(secret)) => {
                registry = registry.with_provider(Arc::new(GithubProvider {
                    client,
                    client_id: id.clone(),
                    client_secret: secret.clone(),
                }));
            }
            (Some(_), None) => warn!("GITHUB_CLIENT_SECRET not set; GitHub sign-in disabled"),
            _ => {}
        }
        registry
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(&provider).cloned()
    }

    pub fn enabled(&self) -> Vec<Provider> {
        let mut out: Vec<Provider> = self.providers.keys().copied().collect();
        out.sort();
        out
    }
}

fn rejected_status(resp: &reqwest::Response) -> Option<OAuthError> {
    let status = resp.status();
    (!status.is_success()).then(|| OAuthError::Rejected(format!("provider answered {status}")))
}

// ---- Google ----

#[derive(Debug, Deserialize)]
pub(crate) struct GoogleTokenInfo {
    pub aud: String,
    pub sub: String,
    pub email: Option<String>,
    // tokeninfo returns "true"/"false" as strings
    #[serde(default)]
    pub email_verified: serde_json::Value,
    pub name: Option<String>,
}

pub(crate) fn google_identity(
    info: GoogleTokenInfo,
    client_id: &str,
) -> Result<OAuthIdentity, OAuthError> {
    if info.aud != client_id {
        return Err(OAuthError::Rejected("audience mismatch".into()));
    }
    let verified = match &info.email_verified {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let email = info
        .email
        .filter(|_| verified)
        .ok_or_else(|| OAuthError::Rejected("email missing or not verified".into()))?;
    Ok(OAuthIdentity {
        provider: Provider::Google,
        subject: info.sub,
        email: email.to_lowercase(),
        display_name: info.name,
    })
}

struct GoogleProvider {
    client: reqwest::Client,
    client_id: String,
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn validate(&self, token: &str) -> Result<OAuthIdentity, OAuthError> {
        let resp = self
            .client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", token)])
            .send()
            .await?;
        if let Some(err) = rejected_status(&resp) {
            return Err(err);
        }
        let info: GoogleTokenInfo = resp.json().await?;
        debug!(sub = %info.sub, "google token info received");
        google_identity(info, &self.client_id)
    }
}

// ---- Microsoft ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphMe {
    pub id: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
}

pub(crate) fn microsoft_identity(me: GraphMe) -> Result<OAuthIdentity, OAuthError> {
    let email = me
        .mail
        .or(me.user_principal_name)
        .filter(|e| e.contains('@'))
        .ok_or_else(|| OAuthError::Rejected("account has no email".into()))?;
    Ok(OAuthIdentity {
        provider: Provider::Microsoft,
        subject: me.id,
        email: email.to_lowercase(),
        display_name: me.display_name,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct MicrosoftAccessClaims {
    pub appid: Option<String>,
    pub azp: Option<String>,
}

/// Checks that a Graph access token was issued to `client_id` (`appid` on v1
/// tokens, `azp` on v2). Only the payload is read; Graph verifies the
/// signature when the token is presented to `/me`.
pub(crate) fn microsoft_check_app(token: &str, client_id: &str) -> Result<(), OAuthError> {
    let malformed = |_| OAuthError::Rejected("access token is not a JWT".into());
    let header = jsonwebtoken::decode_header(token).map_err(malformed)?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let claims =
        jsonwebtoken::decode::<MicrosoftAccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(malformed)?
            .claims;

    match claims.appid.or(claims.azp) {
        Some(app) if app == client_id => Ok(()),
        _ => Err(OAuthError::Rejected("token issued to another app".into())),
    }
}

struct MicrosoftProvider {
    client: reqwest::Client,
    client_id: String,
}

#[async_trait]
impl IdentityProvider for MicrosoftProvider {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    async fn validate(&self, token: &str) -> Result<OAuthIdentity, OAuthError> {
        microsoft_check_app(token, &self.client_id)?;
        let resp = self.client.get(MICROSOFT_ME_URL).bearer_auth(token).send().await?;
        if let Some(err) = rejected_status(&resp) {
            return Err(err);
        }
        microsoft_identity(resp.json().await?)
    }
}

// ---- GitHub ----

#[derive(Debug, Deserialize)]
pub(crate) struct GithubUser {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GithubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

pub(crate) fn github_identity(
    user: GithubUser,
    emails: Vec<GithubEmail>,
) -> Result<OAuthIdentity, OAuthError> {
    let email = emails
        .into_iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email)
        .ok_or_else(|| OAuthError::Rejected("no verified primary email".into()))?;
    Ok(OAuthIdentity {
        provider: Provider::Github,
        subject: user.id.to_string(),
        email: email.to_lowercase(),
        display_name: user.name.or(Some(user.login)),
    })
}

struct GithubProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
}

impl GithubProvider {
    /// GitHub answers 404 when the token was not issued to this OAuth app.
    async fn check_app(&self, token: &str) -> Result<(), OAuthError> {
        let resp = self
            .client
            .post(format!("{GITHUB_API_BASE}/applications/{}/token", self.client_id))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&serde_json::json!({ "access_token": token }))
            .send()
            .await?;
        match rejected_status(&resp) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get(&self, path: &str, token: &str) -> Result<reqwest::Response, OAuthError> {
        let resp = self
            .client
            .get(format!("{GITHUB_API_BASE}{path}"))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        match rejected_status(&resp) {
            Some(err) => Err(err),
            None => Ok(resp),
        }
    }
}

#[async_trait]
impl IdentityProvider for GithubProvider {
    fn provider(&self) -> Provider {
        Provider::Github
    }

    async fn validate(&self, token: &str) -> Result<OAuthIdentity, OAuthError> {
        self.check_app(token).await?;
        let user: GithubUser = self.get("/user", token).await?.json().await?;
        let emails: Vec<GithubEmail> = self.get("/user/emails", token).await?.json().await?;
        github_identity(user, emails)
    }
}
