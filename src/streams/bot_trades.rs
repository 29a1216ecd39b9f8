//! Bot-trade pairing stream with metadata enrichment.
//!
//! The most involved pipeline: legs are grouped per token address and
//! matched by the aggregate rule (SELL plus optional PARTIAL_SELL against the
//! BUY), then each paired group is enriched with the token's display
//! symbol/name through the bounded lookup pool. A group whose lookup fails
//! after retries is dropped for this cycle; the rest of the page proceeds.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::warn;

use crate::enrichment::{EnrichmentFetcher, MetadataLookup, TokenMetadata};
use crate::errors::SyncError;
use crate::hashing::row_hash;
use crate::metrics::ROWS_DROPPED;
use crate::pairing::pair_token_aggregate;
use crate::sync::{PageResult, StreamPipeline, SyncContext};
use crate::tracker::Cursor;
use crate::types::{BotTradeLeg, FieldValue, PairedBotTrade, TradeSide};
use crate::upsert::{TableSpec, UpsertRow};

const STREAM: &str = "bot_trades";
const RAW_TABLE: &str = "bot_trade_transactions";

const SPEC: TableSpec = TableSpec {
    table: "processed_bot_trades",
    columns: &[
        "token_address",
        "buy_amount",
        "buy_price",
        "buy_wallet_address",
        "buy_occurred_at",
        "buy_amount_usd",
        "partial_sell_amount",
        "partial_sell_price",
        "partial_sell_wallet_address",
        "partial_sell_amount_usd",
        "partial_sell_occurred_at",
        "partial_sell_coin_info_id",
        "sell_amount",
        "sell_price",
        "sell_wallet_address",
        "sell_occurred_at",
        "sell_amount_usd",
        "profit_usd",
        "profit",
        "win_loss",
        "symbol",
        "name",
        "coin_info_id",
        "row_hash",
    ],
};

/// A fully enriched, paired bot trade in destination shape.
#[derive(Debug, Clone)]
struct BotTradeRow {
    token_address: String,
    buy_amount: Decimal,
    buy_price: Option<Decimal>,
    buy_wallet_address: String,
    buy_occurred_at: Option<DateTime<Utc>>,
    buy_amount_usd: Decimal,
    partial_sell_amount: Option<Decimal>,
    partial_sell_price: Option<Decimal>,
    partial_sell_wallet_address: Option<String>,
    partial_sell_amount_usd: Option<Decimal>,
    partial_sell_occurred_at: Option<DateTime<Utc>>,
    partial_sell_coin_info_id: Option<i64>,
    sell_amount: Decimal,
    sell_price: Option<Decimal>,
    sell_wallet_address: String,
    sell_occurred_at: Option<DateTime<Utc>>,
    sell_amount_usd: Decimal,
    profit_usd: Decimal,
    profit: Decimal,
    win_loss: String,
    symbol: String,
    name: String,
    coin_info_id: Option<i64>,
    row_hash: String,
    source_watermark: i64,
}

impl BotTradeRow {
    fn build(paired: PairedBotTrade, metadata: TokenMetadata) -> Self {
        // The sell-side figures are the SELL + PARTIAL_SELL aggregates.
        let hash = row_hash(&[
            FieldValue::Text(paired.token_address.clone()),
            FieldValue::Decimal(paired.buy.amount),
            FieldValue::opt_decimal(paired.buy.price),
            FieldValue::Text(paired.buy.wallet_address.clone()),
            FieldValue::opt_timestamp(paired.buy.occurred_at),
            FieldValue::Decimal(paired.total_sell_amount),
            FieldValue::opt_decimal(paired.sell.price),
            FieldValue::Text(paired.sell.wallet_address.clone()),
            FieldValue::opt_timestamp(paired.sell.occurred_at),
            FieldValue::Decimal(paired.profit),
            FieldValue::Text(metadata.symbol.clone()),
            FieldValue::Text(metadata.name.clone()),
        ]);

        Self {
            token_address: paired.token_address,
            buy_amount: paired.buy.amount,
            buy_price: paired.buy.price,
            buy_wallet_address: paired.buy.wallet_address,
            buy_occurred_at: paired.buy.occurred_at,
            buy_amount_usd: paired.buy.amount_usd,
            partial_sell_amount: paired.partial_sell.as_ref().map(|p| p.amount),
            partial_sell_price: paired.partial_sell.as_ref().and_then(|p| p.price),
            partial_sell_wallet_address: paired
                .partial_sell
                .as_ref()
                .map(|p| p.wallet_address.clone()),
            partial_sell_amount_usd: paired.partial_sell.as_ref().map(|p| p.amount_usd),
            partial_sell_occurred_at: paired.partial_sell.as_ref().and_then(|p| p.occurred_at),
            partial_sell_coin_info_id: paired.partial_sell.as_ref().and_then(|p| p.coin_info_id),
            sell_amount: paired.total_sell_amount,
            sell_price: paired.sell.price,
            sell_wallet_address: paired.sell.wallet_address,
            sell_occurred_at: paired.sell.occurred_at,
            sell_amount_usd: paired.total_sell_amount_usd,
            profit_usd: paired.profit_usd,
            profit: paired.profit,
            win_loss: paired.win_loss.as_str().to_string(),
            symbol: metadata.symbol,
            name: metadata.name,
            coin_info_id: paired.buy.coin_info_id,
            row_hash: hash,
            source_watermark: paired.source_watermark,
        }
    }
}

impl UpsertRow for BotTradeRow {
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
            &self.token_address,
            &self.buy_amount,
            &self.buy_price,
            &self.buy_wallet_address,
            &self.buy_occurred_at,
            &self.buy_amount_usd,
            &self.partial_sell_amount,
            &self.partial_sell_price,
            &self.partial_sell_wallet_address,
            &self.partial_sell_amount_usd,
            &self.partial_sell_occurred_at,
            &self.partial_sell_coin_info_id,
            &self.sell_amount,
            &self.sell_price,
            &self.sell_wallet_address,
            &self.sell_occurred_at,
            &self.sell_amount_usd,
            &self.profit_usd,
            &self.profit,
            &self.win_loss,
            &self.symbol,
            &self.name,
            &self.coin_info_id,
            &self.row_hash,
        ]
    }
}

pub struct BotTradesPipeline<L> {
    fetcher: EnrichmentFetcher<L>,
}

impl<L> BotTradesPipeline<L>
where
    L: MetadataLookup + 'static,
{
    pub fn new(fetcher: EnrichmentFetcher<L>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<L> StreamPipeline for BotTradesPipeline<L>
where
    L: MetadataLookup + 'static,
{
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

        let legs: Vec<BotTradeLeg> = rows.into_iter().filter_map(|(_, leg)| leg).collect();
        let paired = pair_token_aggregate(&legs);

        // One lookup per distinct token, fanned out under the permit cap.
        let tokens: Vec<String> = paired
            .iter()
            .map(|p| p.token_address.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let metadata = self.fetcher.fetch_many(tokens).await?;

        let mut enriched = Vec::with_capacity(paired.len());
        let mut dropped = 0u64;
        for group in paired {
            match metadata.get(&group.token_address) {
                Some(meta) => enriched.push(BotTradeRow::build(group, meta.clone())),
                None => {
                    dropped += 1;
                    warn!(
                        stream = STREAM,
                        token = %group.token_address,
                        "Skipping paired trade: metadata unavailable"
                    );
                }
            }
        }
        if dropped > 0 {
            ROWS_DROPPED
                .with_label_values(&[STREAM, "enrichment"])
                .inc_by(dropped);
        }

        let outcome = ctx
            .upserter
            .apply(STREAM, &SPEC, &enriched, &cursor, false)
            .await?;

        Ok(PageResult {
            fetched,
            rows_committed: outcome.rows_inserted,
            next: outcome.cursor.advanced_to(page_max_id, None),
        })
    }
}

fn map_leg(row: &Row) -> Result<(i64, Option<BotTradeLeg>), SyncError> {
    let decode = |e| SyncError::RowDecode {
        table: RAW_TABLE,
        source: e,
    };
    let id: i64 = row.try_get("id").map_err(decode)?;
    let side: Option<String> = row.try_get("side").map_err(decode)?;
    let token_address: Option<String> = row.try_get("token_address").map_err(decode)?;
    let wallet_address: Option<String> = row.try_get("wallet_address").map_err(decode)?;
    let amount: Option<Decimal> = row.try_get("amount").map_err(decode)?;
    let price: Option<Decimal> = row.try_get("price").map_err(decode)?;
    let amount_usd: Option<Decimal> = row.try_get("amount_usd").map_err(decode)?;
    let coin_info_id: Option<i64> = row.try_get("coin_info_id").map_err(decode)?;
    let occurred_at: Option<DateTime<Utc>> = row.try_get("occurred_at").map_err(decode)?;

    let leg = match (side, token_address, wallet_address, amount) {
        (Some(side), Some(token), Some(wallet), Some(amount)) => {
            TradeSide::parse(&side).map(|side| BotTradeLeg {
                id,
                side,
                token_address: token,
                wallet_address: wallet,
                amount,
                price,
                // Absent dollar figures count as zero in the aggregates.
                amount_usd: amount_usd.unwrap_or(Decimal::ZERO),
                coin_info_id,
                occurred_at,
            })
        }
        _ => None,
    };
    Ok((id, leg))
}
