//! Arbitrage opportunity clean-copy streams.
//!
//! Two streams share one record shape: the live `arb_opportunities` table
//! (id-tracked) and its append-only `arb_opportunity_history` sibling, which
//! additionally checkpoints the row timestamp. Normalization is timestamp
//! coercion, null-filtering of the required fields and exchange-name
//! capitalization; the row hash covers the declared field list in order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::warn;

use crate::errors::SyncError;
use crate::hashing::row_hash;
use crate::metrics::ROWS_DROPPED;
use crate::sync::{PageResult, StreamPipeline, SyncContext};
use crate::tracker::Cursor;
use crate::types::FieldValue;
use crate::upsert::{TableSpec, UpsertRow};

/// A raw opportunity row before null-filtering.
#[derive(Debug)]
struct RawOpportunity {
    id: i64,
    symbol: Option<String>,
    stable_symbol: Option<String>,
    min_exchange: Option<String>,
    max_exchange: Option<String>,
    profit: Option<Decimal>,
    occurred_at: Option<DateTime<Utc>>,
}

/// A normalized, hashed opportunity ready for the cleaned store.
#[derive(Debug, Clone)]
pub struct CleanOpportunity {
    pub source_id: i64,
    pub symbol: String,
    pub stable_symbol: String,
    pub min_exchange: String,
    pub max_exchange: String,
    pub profit: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub row_hash: String,
}

impl CleanOpportunity {
    fn from_raw(raw: RawOpportunity) -> Option<Self> {
        let symbol = raw.symbol?;
        let stable_symbol = raw.stable_symbol?;
        let min_exchange = capitalize(&raw.min_exchange?);
        let max_exchange = capitalize(&raw.max_exchange?);
        let profit = raw.profit?;
        let occurred_at = raw.occurred_at?;

        let hash = row_hash(&[
            FieldValue::Text(symbol.clone()),
            FieldValue::Text(stable_symbol.clone()),
            FieldValue::Text(min_exchange.clone()),
            FieldValue::Text(max_exchange.clone()),
            FieldValue::Decimal(profit),
            FieldValue::Timestamp(occurred_at),
        ]);

        Some(Self {
            source_id: raw.id,
            symbol,
            stable_symbol,
            min_exchange,
            max_exchange,
            profit,
            occurred_at,
            row_hash: hash,
        })
    }
}

impl UpsertRow for CleanOpportunity {
    fn row_hash(&self) -> &str {
        &self.row_hash
    }

    fn source_id(&self) -> i64 {
        self.source_id
    }

    fn source_ts(&self) -> Option<DateTime<Utc>> {
        Some(self.occurred_at)
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.symbol,
            &self.stable_symbol,
            &self.min_exchange,
            &self.max_exchange,
            &self.profit,
            &self.occurred_at,
            &self.row_hash,
        ]
    }
}

const COLUMNS: &[&str] = &[
    "symbol",
    "stable_symbol",
    "min_exchange",
    "max_exchange",
    "profit",
    "occurred_at",
    "row_hash",
];

/// Clean-copy pipeline instance; both arb streams are configurations of it.
pub struct ArbOpportunityPipeline {
    stream: &'static str,
    raw_table: &'static str,
    spec: TableSpec,
    track_ts: bool,
}

impl ArbOpportunityPipeline {
    pub fn live() -> Self {
        Self {
            stream: "arb_opportunities",
            raw_table: "arb_opportunities",
            spec: TableSpec {
                table: "clean_arb_opportunities",
                columns: COLUMNS,
            },
            track_ts: false,
        }
    }

    pub fn history() -> Self {
        Self {
            stream: "arb_opportunity_history",
            raw_table: "arb_opportunity_history",
            spec: TableSpec {
                table: "clean_arb_opportunity_history",
                columns: COLUMNS,
            },
            track_ts: true,
        }
    }
}

#[async_trait]
impl StreamPipeline for ArbOpportunityPipeline {
    fn name(&self) -> &'static str {
        self.stream
    }

    async fn prepare(&self, ctx: &SyncContext) -> Result<(), SyncError> {
        ctx.upserter.ensure_unique_hash_index(&self.spec).await
    }

    async fn process_page(
        &self,
        ctx: &SyncContext,
        cursor: Cursor,
    ) -> Result<PageResult, SyncError> {
        let raw_table = self.raw_table;
        let rows = ctx
            .source
            .fetch_by_id(raw_table, "id", cursor.last_id, ctx.config.page_size, |row| {
                map_raw(row, raw_table)
            })
            .await?;

        let fetched = rows.len();
        if fetched == 0 {
            return Ok(PageResult {
                fetched,
                rows_committed: 0,
                next: cursor,
            });
        }

        // Pages are ordered ascending, so the raw high-water mark is the tail.
        let page_max_id = rows.last().map(|r| r.id);
        let page_max_ts = rows.iter().filter_map(|r| r.occurred_at).max();

        let clean: Vec<CleanOpportunity> = rows
            .into_iter()
            .filter_map(CleanOpportunity::from_raw)
            .collect();
        let filtered = fetched - clean.len();
        if filtered > 0 {
            ROWS_DROPPED
                .with_label_values(&[self.stream, "null_field"])
                .inc_by(filtered as u64);
            warn!(stream = self.stream, filtered, "Dropped rows with null required fields");
        }

        let outcome = ctx
            .upserter
            .apply(self.stream, &self.spec, &clean, &cursor, self.track_ts)
            .await?;

        Ok(PageResult {
            fetched,
            rows_committed: outcome.rows_inserted,
            next: outcome
                .cursor
                .advanced_to(page_max_id, if self.track_ts { page_max_ts } else { None }),
        })
    }
}

fn map_raw(row: &Row, table: &'static str) -> Result<RawOpportunity, SyncError> {
    let decode = |e| SyncError::RowDecode { table, source: e };
    Ok(RawOpportunity {
        id: row.try_get("id").map_err(decode)?,
        symbol: row.try_get("symbol").map_err(decode)?,
        stable_symbol: row.try_get("stable_symbol").map_err(decode)?,
        min_exchange: row.try_get("min_exchange").map_err(decode)?,
        max_exchange: row.try_get("max_exchange").map_err(decode)?,
        profit: row.try_get("profit").map_err(decode)?,
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
    })
}

/// Upper-case the first character, leave the rest untouched.
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
