//! Copy-trader pairing stream.
//!
//! Raw legs are grouped per trader and matched with the strict-amount rule:
//! the SELL's input token and amount must mirror the BUY's output exactly.
//! A BUY without its SELL stays unpaired this cycle and may pair on a later
//! run once the counterpart leg lands in the raw store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::errors::SyncError;
use crate::hashing::row_hash;
use crate::metrics::ROWS_DROPPED;
use crate::pairing::pair_strict_amount;
use crate::sync::{PageResult, StreamPipeline, SyncContext};
use crate::tracker::Cursor;
use crate::types::{CopyTradeOutcome, CopyTraderLeg, FieldValue, TradeSide};
use crate::upsert::{TableSpec, UpsertRow};

const STREAM: &str = "copy_trader";
const RAW_TABLE: &str = "copy_trader_transactions";

const SPEC: TableSpec = TableSpec {
    table: "processed_copy_trades",
    columns: &[
        "trader_address",
        "token_bought",
        "amount_bought",
        "buy_cost",
        "sell_revenue",
        "profit",
        "win_loss",
        "buy_occurred_at",
        "sell_occurred_at",
        "row_hash",
    ],
};

/// A paired copy trade in destination shape.
#[derive(Debug, Clone)]
struct CopyTradeRow {
    trader_address: String,
    token_bought: String,
    amount_bought: Decimal,
    buy_cost: Decimal,
    sell_revenue: Decimal,
    profit: Decimal,
    win_loss: String,
    buy_occurred_at: Option<DateTime<Utc>>,
    sell_occurred_at: Option<DateTime<Utc>>,
    row_hash: String,
    source_watermark: i64,
}

impl CopyTradeRow {
    fn from_outcome(outcome: CopyTradeOutcome) -> Self {
        let hash = row_hash(&[
            FieldValue::Text(outcome.trader_address.clone()),
            FieldValue::Text(outcome.token_bought.clone()),
            FieldValue::Decimal(outcome.amount_bought),
            FieldValue::Decimal(outcome.buy_cost),
            FieldValue::Decimal(outcome.sell_revenue),
            FieldValue::Decimal(outcome.profit),
            FieldValue::opt_timestamp(outcome.buy_occurred_at),
            FieldValue::opt_timestamp(outcome.sell_occurred_at),
        ]);

        Self {
            trader_address: outcome.trader_address,
            token_bought: outcome.token_bought,
            amount_bought: outcome.amount_bought,
            buy_cost: outcome.buy_cost,
            sell_revenue: outcome.sell_revenue,
            profit: outcome.profit,
            win_loss: outcome.win_loss.as_str().to_string(),
            buy_occurred_at: outcome.buy_occurred_at,
            sell_occurred_at: outcome.sell_occurred_at,
            row_hash: hash,
            source_watermark: outcome.source_watermark,
        }
    }
}

impl UpsertRow for CopyTradeRow {
    fn row_hash(&self) -> &str {
        &self.row_hash
    }

    fn source_id(&self) -> i64 {
        self.source_watermark
    }

    fn source_ts(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        vec![
            &self.trader_address,
            &self.token_bought,
            &self.amount_bought,
            &self.buy_cost,
            &self.sell_revenue,
            &self.profit,
            &self.win_loss,
            &self.buy_occurred_at,
            &self.sell_occurred_at,
            &self.row_hash,
        ]
    }
}

pub struct CopyTraderPipeline;

#[async_trait]
impl StreamPipeline for CopyTraderPipeline {
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
        let rows = ctx
            .source
            .fetch_by_id(RAW_TABLE, "id", cursor.last_id, ctx.config.page_size, map_leg)
            .await?;

        let fetched = rows.len();
        if fetched == 0 {
            return Ok(PageResult {
                fetched,
                rows_committed: 0,
                next: cursor,
            });
        }
        let page_max_id = rows.last().map(|(id, _)| *id);

        let legs: Vec<CopyTraderLeg> = rows.into_iter().filter_map(|(_, leg)| leg).collect();
        let outcomes = pair_strict_amount(&legs);

        let buys = legs.iter().filter(|l| l.side == TradeSide::Buy).count();
        if buys > outcomes.len() {
            ROWS_DROPPED
                .with_label_values(&[STREAM, "unpaired"])
                .inc_by((buys - outcomes.len()) as u64);
        }

        let paired: Vec<CopyTradeRow> =
            outcomes.into_iter().map(CopyTradeRow::from_outcome).collect();

        let outcome = ctx
            .upserter
            .apply(STREAM, &SPEC, &paired, &cursor, false)
            .await?;

        Ok(PageResult {
            fetched,
            rows_committed: outcome.rows_inserted,
            next: outcome.cursor.advanced_to(page_max_id, None),
        })
    }
}

/// Map a raw row to a leg. Rows with an unknown side or a missing trader are
/// skipped, not fatal; the id is always surfaced for the page watermark.
fn map_leg(row: &Row) -> Result<(i64, Option<CopyTraderLeg>), SyncError> {
    let decode = |e| SyncError::RowDecode {
        table: RAW_TABLE,
        source: e,
    };
    let id: i64 = row.try_get("id").map_err(decode)?;
    let side: Option<String> = row.try_get("side").map_err(decode)?;
    let trader_address: Option<String> = row.try_get("trader_address").map_err(decode)?;
    let token_in: Option<String> = row.try_get("token_in").map_err(decode)?;
    let token_out: Option<String> = row.try_get("token_out").map_err(decode)?;
    let amount_in: Option<Decimal> = row.try_get("amount_in").map_err(decode)?;
    let amount_out: Option<Decimal> = row.try_get("amount_out").map_err(decode)?;
    let occurred_at: Option<DateTime<Utc>> = row.try_get("occurred_at").map_err(decode)?;

    let leg = match (side, trader_address, token_in, token_out, amount_in, amount_out) {
        (Some(side), Some(trader), Some(tin), Some(tout), Some(ain), Some(aout)) => {
            TradeSide::parse(&side).map(|side| CopyTraderLeg {
                id,
                side,
                trader_address: trader,
                token_in: tin,
                token_out: tout,
                amount_in: ain,
                amount_out: aout,
                occurred_at,
            })
        }
        _ => None,
    };
    Ok((id, leg))
}
