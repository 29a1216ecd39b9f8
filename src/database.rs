//! Database connection pool construction.
//!
//! Pools are built once by the process entry point and injected into the
//! components that need them. There is deliberately no ambient/global pool:
//! each stream run owns explicit handles to its raw and clean stores.

use deadpool_postgres::{Config as PgConfig, Pool, PoolConfig, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

use crate::errors::SyncError;

/// Build a deadpool-postgres pool from a `postgres://` connection string and
/// verify it can hand out a working connection.
pub async fn build_pool(
    database_url: &str,
    max_size: usize,
    label: &str,
) -> Result<Pool, SyncError> {
    let url = url::Url::parse(database_url)
        .map_err(|e| SyncError::Config(format!("invalid {} connection string: {}", label, e)))?;
    if url.scheme() != "postgres" && url.scheme() != "postgresql" {
        return Err(SyncError::Config(format!(
            "invalid {} database scheme: expected 'postgres', got '{}'",
            label,
            url.scheme()
        )));
    }

    let mut pg_config = PgConfig::new();
    pg_config.host = Some(
        url.host_str()
            .ok_or_else(|| SyncError::Config(format!("missing host in {} URL", label)))?
            .to_string(),
    );
    pg_config.port = Some(url.port().unwrap_or(5432));
    pg_config.user = Some(if url.username().is_empty() {
        "postgres".to_string()
    } else {
        url.username().to_string()
    });
    pg_config.password = url.password().map(str::to_string);
    pg_config.dbname = Some(url.path().trim_start_matches('/').to_string())
        .filter(|s| !s.is_empty());
    pg_config.pool = Some(PoolConfig::new(max_size));

    let pool = pg_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| SyncError::PoolBuild(format!("{} pool: {}", label, e)))?;

    // Fail fast on unreachable stores rather than inside the first page.
    let conn = pool.get().await?;
    conn.execute("SELECT 1", &[]).await?;

    info!(store = label, max_size, "Initialized connection pool");
    Ok(pool)
}
