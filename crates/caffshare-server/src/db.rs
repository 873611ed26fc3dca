//! Database connection and pool management.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::pipeline::{Owner, OwnerDirectory};

/// Creates a database connection pool.
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
///
/// # Returns
/// A configured PgPool ready for use.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Runs all pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[async_trait]
impl OwnerDirectory for PgPool {
    async fn find_active_owner(&self, id: i64) -> Result<Option<Owner>, sqlx::Error> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, username FROM users WHERE id = $1 AND is_active LIMIT 1",
        )
        .bind(id)
        .fetch_optional(self)
        .await?;

        Ok(row.map(|(id, username)| Owner { id, username }))
    }
}
