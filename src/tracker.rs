//! Durable per-stream checkpoints.
//!
//! One row per stream in the shared `pipeline_tracker` table records the
//! highest source id/timestamp fully accounted for by a committed batch. The
//! advance is an upsert and is designed to be called on the same transaction
//! as the batch insert it checkpoints, so data and cursor commit atomically.

use chrono::{DateTime, Utc};
use tokio_postgres::GenericClient;
use tracing::debug;

use crate::errors::SyncError;

/// The resume point of one stream. Defaults to `{0, epoch}` before the first
/// committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub last_id: i64,
    pub last_ts: DateTime<Utc>,
}

impl Cursor {
    pub fn start() -> Self {
        Self {
            last_id: 0,
            last_ts: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Component-wise maximum; cursors never move backward.
    pub fn advanced_to(&self, id: Option<i64>, ts: Option<DateTime<Utc>>) -> Self {
        Self {
            last_id: id.map_or(self.last_id, |v| v.max(self.last_id)),
            last_ts: ts.map_or(self.last_ts, |v| v.max(self.last_ts)),
        }
    }
}

/// Create the tracker table if missing and make sure the stream's row exists.
pub async fn ensure_stream<C: GenericClient>(client: &C, stream: &str) -> Result<(), SyncError> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS pipeline_tracker (
                table_name TEXT PRIMARY KEY,
                last_processed_id BIGINT NOT NULL DEFAULT 0,
                last_processed_ts TIMESTAMPTZ
            )",
            &[],
        )
        .await?;
    client
        .execute(
            "INSERT INTO pipeline_tracker (table_name, last_processed_id)
             VALUES ($1, 0)
             ON CONFLICT (table_name) DO NOTHING",
            &[&stream],
        )
        .await?;
    Ok(())
}

/// Read the stream's cursor, defaulting to `{0, epoch}` when absent.
pub async fn get<C: GenericClient>(client: &C, stream: &str) -> Result<Cursor, SyncError> {
    let row = client
        .query_opt(
            "SELECT last_processed_id, last_processed_ts
             FROM pipeline_tracker WHERE table_name = $1",
            &[&stream],
        )
        .await?;

    match row {
        Some(row) => {
            let last_id: i64 = row.try_get(0)?;
            let last_ts: Option<DateTime<Utc>> = row.try_get(1)?;
            Ok(Cursor {
                last_id,
                last_ts: last_ts.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            })
        }
        None => Ok(Cursor::start()),
    }
}

/// Upsert the stream's checkpoint. A `None` component leaves the stored value
/// untouched; callers pass the max of old and new so a value never regresses.
/// Must be invoked on the transaction that carries the batch insert.
pub async fn advance<C: GenericClient>(
    client: &C,
    stream: &str,
    new_id: Option<i64>,
    new_ts: Option<DateTime<Utc>>,
) -> Result<(), SyncError> {
    client
        .execute(
            "INSERT INTO pipeline_tracker (table_name, last_processed_id, last_processed_ts)
             VALUES ($1, COALESCE($2, 0), $3)
             ON CONFLICT (table_name) DO UPDATE SET
                 last_processed_id =
                     COALESCE($2, pipeline_tracker.last_processed_id),
                 last_processed_ts =
                     COALESCE($3, pipeline_tracker.last_processed_ts)",
            &[&stream, &new_id, &new_ts],
        )
        .await?;
    debug!(stream, ?new_id, ?new_ts, "Tracker advanced");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn start_cursor_is_zero_epoch() {
        let c = Cursor::start();
        assert_eq!(c.last_id, 0);
        assert_eq!(c.last_ts, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn advanced_to_never_regresses() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let c = Cursor { last_id: 100, last_ts: ts };

        let back = c.advanced_to(Some(50), Some(DateTime::<Utc>::UNIX_EPOCH));
        assert_eq!(back, c);

        let forward = c.advanced_to(Some(150), None);
        assert_eq!(forward.last_id, 150);
        assert_eq!(forward.last_ts, ts);
    }
}
