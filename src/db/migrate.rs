use sqlx::PgPool;

use crate::error::StoreError;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Create the backing tables if they do not exist. Safe to run on every start.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::debug!("Store schema applied");
    Ok(())
}
