//! Cursor-bounded page reads from the raw store.
//!
//! The source is stateless beyond the cursor it is handed: every call issues
//! one ordered, size-bounded `SELECT` with an exclusive lower bound on the
//! stream's cursor column. An empty page signals exhaustion for the current
//! invocation and is not an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;

use crate::errors::SyncError;

#[derive(Clone)]
pub struct PagedSource {
    pool: Arc<Pool>,
}

impl PagedSource {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    /// Fetch the next page of rows with `id_col > after`, ascending.
    pub async fn fetch_by_id<T, F>(
        &self,
        table: &str,
        id_col: &str,
        after: i64,
        limit: i64,
        map: F,
    ) -> Result<Vec<T>, SyncError>
    where
        F: Fn(&Row) -> Result<T, SyncError>,
    {
        let sql = page_query(table, id_col);
        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &[&after, &limit]).await?;
        debug!(table, after, fetched = rows.len(), "Fetched page by id");
        rows.iter().map(&map).collect()
    }

    /// Fetch the next page of rows strictly after the `(after_ts, after_id)`
    /// keyset pair, in `(ts_col, id_col)` order. Used by snapshot-style
    /// streams whose capture timestamps are not unique: the id tie-break
    /// keeps a page boundary inside an equal-timestamp group resumable.
    pub async fn fetch_by_ts<T, F>(
        &self,
        table: &str,
        ts_col: &str,
        id_col: &str,
        after_ts: DateTime<Utc>,
        after_id: i64,
        limit: i64,
        map: F,
    ) -> Result<Vec<T>, SyncError>
    where
        F: Fn(&Row) -> Result<T, SyncError>,
    {
        let sql = keyset_page_query(table, ts_col, id_col);
        let client = self.pool.get().await?;
        let rows = client
            .query(sql.as_str(), &[&after_ts, &after_id, &limit])
            .await?;
        debug!(table, %after_ts, after_id, fetched = rows.len(), "Fetched page by timestamp");
        rows.iter().map(&map).collect()
    }
}

fn page_query(table: &str, cursor_col: &str) -> String {
    format!(
        "SELECT * FROM \"{table}\" WHERE \"{col}\" > $1 ORDER BY \"{col}\" ASC LIMIT $2",
        table = table,
        col = cursor_col,
    )
}

fn keyset_page_query(table: &str, ts_col: &str, id_col: &str) -> String {
    format!(
        "SELECT * FROM \"{table}\" \
         WHERE (\"{ts}\" > $1 OR (\"{ts}\" = $1 AND \"{id}\" > $2)) \
         ORDER BY \"{ts}\" ASC, \"{id}\" ASC LIMIT $3",
        table = table,
        ts = ts_col,
        id = id_col,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_orders_and_bounds() {
        let sql = page_query("raw_trades", "id");
        assert_eq!(
            sql,
            "SELECT * FROM \"raw_trades\" WHERE \"id\" > $1 ORDER BY \"id\" ASC LIMIT $2"
        );
    }

    #[test]
    fn keyset_query_breaks_timestamp_ties_on_id() {
        let sql = keyset_page_query("coin_snapshots", "captured_at", "id");
        assert_eq!(
            sql,
            "SELECT * FROM \"coin_snapshots\" \
             WHERE (\"captured_at\" > $1 OR (\"captured_at\" = $1 AND \"id\" > $2)) \
             ORDER BY \"captured_at\" ASC, \"id\" ASC LIMIT $3"
        );
    }
}
