pub mod credentials;

pub use credentials::{CredentialStore, PgCredentialStore};

use crate::config::DatabaseSettings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Build the Postgres connection pool from settings
pub async fn connect_pool(settings: &DatabaseSettings) -> crate::error::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout))
        .connect(&settings.url)
        .await?;
    Ok(pool)
}
