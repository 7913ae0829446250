use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub google_client_id: Option<String>,
    pub microsoft_client_id: Option<String>,
    pub github_client_id: Option<String>,
    /// Needed to check GitHub tokens against the app; GitHub sign-in stays off without it.
    pub github_client_secret: Option<String>,
}

/// OpenAI-compatible chat completion endpoint used by the health chat.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_schema: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub cors_origins: Vec<String>,
    pub oauth: OAuthConfig,
    pub llm: LlmConfig,
    pub auth_rate_limit_per_minute: u32,
    /// Proxies in front of the service that append to `X-Forwarded-For`; 0 trusts the socket peer only.
    pub trusted_proxy_hops: usize,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "taskhub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "taskhub-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let oauth = OAuthConfig {
            google_client_id: env_opt("GOOGLE_CLIENT_ID"),
            microsoft_client_id: env_opt("MICROSOFT_CLIENT_ID"),
            github_client_id: env_opt("GITHUB_CLIENT_ID"),
            github_client_secret: env_opt("GITHUB_CLIENT_SECRET"),
        };
        let llm = LlmConfig {
            api_base: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env_opt("LLM_API_KEY"),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        };
        let schema = std::env::var("DATABASE_SCHEMA").unwrap_or_else(|_| "asp_template".into());
        if !is_valid_schema_name(&schema) {
            anyhow::bail!("DATABASE_SCHEMA must be a plain identifier, got {schema:?}");
        }

        Ok(Self {
            database_url,
            database_schema: schema,
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            jwt,
            cors_origins: parse_origins(&std::env::var("CORS_ORIGINS").unwrap_or_default()),
            oauth,
            llm,
            auth_rate_limit_per_minute: env_parse("AUTH_RATE_LIMIT_PER_MINUTE", 20),
            trusted_proxy_hops: env_parse("TRUSTED_PROXY_HOPS", 1),
        })
    }
}

// The schema name is interpolated into DDL, so only identifiers are accepted.
pub(crate) fn is_valid_schema_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_trimmed() {
        let parsed = parse_origins(" http://localhost:5173/ ,https://app.example.com,, ");
        assert_eq!(parsed, vec!["http://localhost:5173", "https://app.example.com"]);
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn schema_names_must_be_identifiers() {
        assert!(is_valid_schema_name("asp_template"));
        assert!(is_valid_schema_name("_s1"));
        assert!(!is_valid_schema_name("1abc"));
        assert!(!is_valid_schema_name("public; drop table users"));
        assert!(!is_valid_schema_name(""));
    }
}
