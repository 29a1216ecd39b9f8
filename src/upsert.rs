//! Transactional batch upserts into the cleaned store.
//!
//! One call takes a page's worth of hashed rows and writes them in bounded
//! chunks. Each chunk is a single multi-row `INSERT ... ON CONFLICT
//! (row_hash) DO NOTHING` plus the tracker advance, committed as one
//! transaction: either the rows and the new cursor land together or neither
//! does. Re-running the same page after a crash re-derives identical hashes
//! and the unique constraint turns it into a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tracing::{info, warn};

use crate::errors::SyncError;
use crate::metrics::{COMMIT_DURATION_SECONDS, CURSOR_POSITION, ROWS_DROPPED, ROWS_INSERTED};
use crate::tracker::{self, Cursor};

/// Destination table layout for one stream. `columns` is the full insert
/// column list, `row_hash` last.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

/// A row ready for the destination store.
pub trait UpsertRow {
    /// Dedup identity; must be non-empty or the batch aborts.
    fn row_hash(&self) -> &str;
    /// Raw source id this row accounts for (max leg id for derived rows).
    fn source_id(&self) -> i64;
    /// Raw source timestamp, for timestamp-tracked streams.
    fn source_ts(&self) -> Option<DateTime<Utc>>;
    /// Insert parameters, in `TableSpec::columns` order, `row_hash` included.
    fn params(&self) -> Vec<&(dyn ToSql + Sync)>;
}

/// Result of one [`BatchUpserter::apply`] call.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    /// Cursor after the last committed chunk.
    pub cursor: Cursor,
    /// Rows the destination actually kept (post conflict-skip).
    pub rows_inserted: u64,
}

pub struct BatchUpserter {
    pool: Arc<Pool>,
    batch_size: usize,
}

impl BatchUpserter {
    pub fn new(pool: Arc<Pool>, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Make sure the destination carries the unique index that enforces
    /// at-most-once inserts. The only DDL this engine owns.
    pub async fn ensure_unique_hash_index(&self, spec: &TableSpec) -> Result<(), SyncError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_row_hash ON \"{table}\" (\"row_hash\")",
            table = spec.table,
        );
        client.execute(sql.as_str(), &[]).await?;
        Ok(())
    }

    /// Write a batch and advance the stream's cursor, chunk by chunk, each
    /// chunk atomic. Returns the cursor after the last committed chunk and
    /// the number of rows the destination kept; on error, everything up to
    /// the previous commit remains valid.
    pub async fn apply<T: UpsertRow>(
        &self,
        stream: &str,
        spec: &TableSpec,
        batch: &[T],
        prior: &Cursor,
        track_ts: bool,
    ) -> Result<BatchOutcome, SyncError> {
        for row in batch {
            if row.row_hash().is_empty() {
                return Err(SyncError::Integrity(format!(
                    "empty row_hash in batch for {}",
                    spec.table
                )));
            }
            let supplied = row.params().len();
            if supplied != spec.columns.len() {
                return Err(SyncError::Integrity(format!(
                    "{}: row supplies {} params for {} columns",
                    spec.table,
                    supplied,
                    spec.columns.len()
                )));
            }
        }

        let (mut unique, duplicates) = dedupe_by_hash(batch);
        if duplicates > 0 {
            ROWS_DROPPED
                .with_label_values(&[stream, "duplicate"])
                .inc_by(duplicates as u64);
            warn!(stream, duplicates, "Suppressed duplicate rows within batch");
        }

        let mut cursor = *prior;
        let mut rows_inserted = 0u64;
        if unique.is_empty() {
            return Ok(BatchOutcome {
                cursor,
                rows_inserted,
            });
        }

        // Derived rows arrive in pairing-group order, not id order. Chunks
        // must commit in watermark order or an early chunk's tracker advance
        // would cover ids still waiting in a later chunk.
        sort_for_checkpoint(&mut unique);

        for chunk in unique.chunks(self.batch_size) {
            let sql = build_insert_sql(spec, chunk.len());
            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * spec.columns.len());
            for row in chunk {
                params.extend(row.params());
            }

            let max_id = chunk.iter().map(|r| r.source_id()).max();
            let max_ts = chunk.iter().filter_map(|r| r.source_ts()).max();
            let next = cursor.advanced_to(max_id, if track_ts { max_ts } else { None });

            let timer = COMMIT_DURATION_SECONDS
                .with_label_values(&[stream])
                .start_timer();
            let mut client = self.pool.get().await?;
            let tx = client.transaction().await?;
            let inserted = tx.execute(sql.as_str(), &params).await?;
            if next != cursor {
                tracker::advance(
                    &*tx,
                    stream,
                    Some(next.last_id),
                    track_ts.then_some(next.last_ts),
                )
                .await?;
            }
            tx.commit().await?;
            timer.observe_duration();

            cursor = next;
            rows_inserted += inserted;
            ROWS_INSERTED.with_label_values(&[stream]).inc_by(inserted);
            CURSOR_POSITION
                .with_label_values(&[stream])
                .set(cursor.last_id);
            info!(
                stream,
                rows = chunk.len(),
                inserted,
                cursor_id = cursor.last_id,
                "Committed batch"
            );
        }

        Ok(BatchOutcome {
            cursor,
            rows_inserted,
        })
    }
}

/// Order rows by source watermark so chunked commits checkpoint in the same
/// order the raw ids are accounted for.
pub fn sort_for_checkpoint<T: UpsertRow>(rows: &mut [&T]) {
    rows.sort_by_key(|r| (r.source_id(), r.source_ts()));
}

/// Intra-batch duplicate suppression: two rows sharing a dedup key must
/// never appear in the same insert statement. First occurrence wins.
pub fn dedupe_by_hash<T: UpsertRow>(batch: &[T]) -> (Vec<&T>, usize) {
    let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());
    let mut unique: Vec<&T> = Vec::with_capacity(batch.len());
    for row in batch {
        if seen.insert(row.row_hash()) {
            unique.push(row);
        }
    }
    let duplicates = batch.len() - unique.len();
    (unique, duplicates)
}

/// Build the multi-row insert with the conflict-skip clause keyed on
/// `row_hash`. First write wins; duplicates are discarded silently.
pub fn build_insert_sql(spec: &TableSpec, rows: usize) -> String {
    let cols = spec
        .columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");

    let width = spec.columns.len();
    let values = (0..rows)
        .map(|r| {
            let placeholders = (0..width)
                .map(|c| format!("${}", r * width + c + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO \"{}\" ({}) VALUES {} ON CONFLICT (\"row_hash\") DO NOTHING",
        spec.table, cols, values
    )
}
