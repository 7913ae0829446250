use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

use crate::config::AppConfig;

/// Open the pool with `search_path` pinned to the application schema.
pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)
        .context("parse DATABASE_URL")?
        .options([("search_path", config.database_schema.as_str())]);

    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect_with(options)
        .await
        .context("connect to database")?;

    // schema name was validated in AppConfig::from_env
    sqlx::query(&format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        config.database_schema
    ))
    .execute(&db)
    .await
    .context("create schema")?;

    Ok(db)
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

pub async fn ping(db: &PgPool) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(db)
        .await
        .is_ok()
}
