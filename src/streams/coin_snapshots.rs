//! Coin snapshot clean-copy stream.
//!
//! Snapshot rows have no monotonic id across captures, so this stream keys
//! its cursor on the capture timestamp. Rows are copied as-is; the hash
//! covers the full declared column list in order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::errors::SyncError;
use crate::hashing::row_hash;
use crate::sync::{PageResult, StreamPipeline, SyncContext};
use crate::tracker::Cursor;
use crate::types::FieldValue;
use crate::upsert::{TableSpec, UpsertRow};

const STREAM: &str = "coin_snapshots";
const RAW_TABLE: &str = "coin_snapshots";

const SPEC: TableSpec = TableSpec {
    table: "clean_coin_snapshots",
    columns: &[
        "source_id",
        "token_address",
        "captured_at",
        "coin_price",
        "dev_pubkey",
        "dev_capital",
        "dev_holder_percentage",
        "token_supply",
        "total_holders_supply",
        "is_bundle",
        "reserves_in_sol",
        "liquidity_to_mcap_ratio",
        "row_hash",
    ],
};

#[derive(Debug, Clone)]
pub struct CoinSnapshot {
    pub source_id: i64,
    pub token_address: String,
    pub captured_at: DateTime<Utc>,
    pub coin_price: Option<Decimal>,
    pub dev_pubkey: Option<String>,
    pub dev_capital: Option<Decimal>,
    pub dev_holder_percentage: Option<Decimal>,
    pub token_supply: Option<Decimal>,
    pub total_holders_supply: Option<Decimal>,
    pub is_bundle: Option<bool>,
    pub reserves_in_sol: Option<Decimal>,
    pub liquidity_to_mcap_ratio: Option<Decimal>,
    pub row_hash: String,
}

impl CoinSnapshot {
    fn hash_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Int(self.source_id),
            FieldValue::Text(self.token_address.clone()),
            FieldValue::Timestamp(self.captured_at),
            FieldValue::opt_decimal(self.coin_price),
            FieldValue::opt_text(self.dev_pubkey.as_deref()),
            FieldValue::opt_decimal(self.dev_capital),
            FieldValue::opt_decimal(self.dev_holder_percentage),
            FieldValue::opt_decimal(self.token_supply),
            FieldValue::opt_decimal(self.total_holders_supply),
            self.is_bundle.map_or(FieldValue::Null, FieldValue::Bool),
            FieldValue::opt_decimal(self.reserves_in_sol),
            FieldValue::opt_decimal(self.liquidity_to_mcap_ratio),
        ]
    }
}

impl UpsertRow for CoinSnapshot {
    fn row_hash(&self) -> &str {
        &self.row_hash
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    fn source_ts(&self) -> Option<DateTime<Utc>> {
        Some(self.captured_at)
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.source_id,
            &self.token_address,
            &self.captured_at,
            &self.coin_price,
            &self.dev_pubkey,
            &self.dev_capital,
            &self.dev_holder_percentage,
            &self.token_supply,
            &self.total_holders_supply,
            &self.is_bundle,
            &self.reserves_in_sol,
            &self.liquidity_to_mcap_ratio,
            &self.row_hash,
        ]
    }
}

pub struct CoinSnapshotPipeline;

#[async_trait]
impl StreamPipeline for CoinSnapshotPipeline {
    fn name(&self) -> &'static str {
        STREAM
    }

    async fn prepare(&self, ctx: &SyncContext) -> Result<(), SyncError> {
        ctx.upserter.ensure_unique_hash_index(&SPEC).await
    }

    async fn process_page(
        &self,
        ctx: &SyncContext,
        cursor: Cursor,
    ) -> Result<PageResult, SyncError> {
        let snapshots = ctx
            .source
            .fetch_by_ts(
                RAW_TABLE,
                "captured_at",
                "id",
                cursor.last_ts,
                cursor.last_id,
                ctx.config.page_size,
                map_snapshot,
            )
            .await?;

        let fetched = snapshots.len();
        if fetched == 0 {
            return Ok(PageResult {
                fetched,
                rows_committed: 0,
                next: cursor,
            });
        }
        // Pages arrive in (captured_at, id) order; the tail row is the
        // keyset the next fetch resumes after, even when a page boundary
        // falls inside a group sharing one capture timestamp.
        let page_tail_ts = snapshots.last().map(|s| s.captured_at);
        let page_tail_id = snapshots.last().map(|s| s.source_id);

        let outcome = ctx
            .upserter
            .apply(STREAM, &SPEC, &snapshots, &cursor, true)
            .await?;

        Ok(PageResult {
            fetched,
            rows_committed: outcome.rows_inserted,
            next: outcome.cursor.advanced_to(page_tail_id, page_tail_ts),
        })
    }
}

fn map_snapshot(row: &Row) -> Result<CoinSnapshot, SyncError> {
    let decode = |e| SyncError::RowDecode {
        table: RAW_TABLE,
        source: e,
    };
    let mut snapshot = CoinSnapshot {
        source_id: row.try_get("id").map_err(decode)?,
        token_address: row.try_get("token_address").map_err(decode)?,
        captured_at: row.try_get("captured_at").map_err(decode)?,
        coin_price: row.try_get("coin_price").map_err(decode)?,
        dev_pubkey: row.try_get("dev_pubkey").map_err(decode)?,
        dev_capital: row.try_get("dev_capital").map_err(decode)?,
        dev_holder_percentage: row.try_get("dev_holder_percentage").map_err(decode)?,
        token_supply: row.try_get("token_supply").map_err(decode)?,
        total_holders_supply: row.try_get("total_holders_supply").map_err(decode)?,
        is_bundle: row.try_get("is_bundle").map_err(decode)?,
        reserves_in_sol: row.try_get("reserves_in_sol").map_err(decode)?,
        liquidity_to_mcap_ratio: row.try_get("liquidity_to_mcap_ratio").map_err(decode)?,
        row_hash: String::new(),
    };
    snapshot.row_hash = row_hash(&snapshot.hash_fields());
    Ok(snapshot)
}
