use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("connect to database")?;
    info!(max_connections, "database pool ready");
    Ok(db)
}

/// Creates the `users` table and its unique indexes. Failure is logged and
/// tolerated; the service still starts.
pub async fn run_migrations(db: &PgPool) {
    match sqlx::migrate!("./migrations").run(db).await {
        Ok(()) => info!("database indexes created"),
        Err(e) => warn!(error = %e, "migration failed; unique indexes may be missing, continuing"),
    }
}
