//! # Core Type Definitions
//!
//! This module serves as the single source of truth for the shared data
//! structures used throughout the sync engine. Each stream gets one explicit
//! record type plus a declared ordered field list, so the hash computation and
//! the destination column mapping cannot silently drift apart.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

//================================================================================================//
//                                      CANONICAL VALUES                                          //
//================================================================================================//

/// A single field value on its way into the row hash.
///
/// Canonicalization rules: `Null` stringifies to the empty string, lists are
/// comma-joined, timestamps render as ISO-8601 UTC with millisecond precision
/// (matching the destination's text representation of timestamps).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Decimal(Decimal),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
}

impl FieldValue {
    /// The stable string form used for hashing.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            FieldValue::List(items) => items.join(","),
        }
    }

    pub fn opt_text(value: Option<&str>) -> Self {
        match value {
            Some(s) => FieldValue::Text(s.to_string()),
            None => FieldValue::Null,
        }
    }

    pub fn opt_timestamp(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(ts) => FieldValue::Timestamp(ts),
            None => FieldValue::Null,
        }
    }

    pub fn opt_decimal(value: Option<Decimal>) -> Self {
        match value {
            Some(d) => FieldValue::Decimal(d),
            None => FieldValue::Null,
        }
    }
}

//================================================================================================//
//                                        TRADE LEGS                                              //
//================================================================================================//

/// Which side of a trade a raw leg represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
    PartialSell,
}

impl TradeSide {
    /// Sides arrive in mixed case from the raw store.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            "PARTIAL_SELL" => Some(TradeSide::PartialSell),
            _ => None,
        }
    }
}

/// One leg of a copy-trader trade, correlated by trader address. Amounts are
/// expressed in the leg's own token pair (`amount_in` spent, `amount_out`
/// received).
#[derive(Debug, Clone)]
pub struct CopyTraderLeg {
    pub id: i64,
    pub side: TradeSide,
    pub trader_address: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// One leg of a bot trade, correlated by token address.
#[derive(Debug, Clone)]
pub struct BotTradeLeg {
    pub id: i64,
    pub side: TradeSide,
    pub token_address: String,
    pub wallet_address: String,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub amount_usd: Decimal,
    pub coin_info_id: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
}

//================================================================================================//
//                                      PAIRED OUTCOMES                                           //
//================================================================================================//

/// Win/loss classification of a paired trade. Zero profit classifies as
/// `Loss`; there is no tie state (preserved from the upstream system, see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinLoss {
    Win,
    Loss,
}

impl WinLoss {
    pub fn from_profit(profit: Decimal) -> Self {
        if profit > Decimal::ZERO {
            WinLoss::Win
        } else {
            WinLoss::Loss
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WinLoss::Win => "WIN",
            WinLoss::Loss => "LOSS",
        }
    }
}

/// A strict-amount paired copy trade: one BUY matched to the first SELL whose
/// input token and amount mirror the BUY's output.
#[derive(Debug, Clone)]
pub struct CopyTradeOutcome {
    pub trader_address: String,
    pub token_bought: String,
    pub amount_bought: Decimal,
    pub buy_cost: Decimal,
    pub sell_revenue: Decimal,
    pub profit: Decimal,
    pub win_loss: WinLoss,
    pub buy_occurred_at: Option<DateTime<Utc>>,
    pub sell_occurred_at: Option<DateTime<Utc>>,
    /// Highest raw leg id consumed to build this outcome.
    pub source_watermark: i64,
}

/// A token-aggregate paired bot trade, prior to metadata enrichment. The sell
/// side sums the SELL leg with an optional PARTIAL_SELL leg.
#[derive(Debug, Clone)]
pub struct PairedBotTrade {
    pub token_address: String,
    pub buy: BotTradeLeg,
    pub partial_sell: Option<BotTradeLeg>,
    pub sell: BotTradeLeg,
    pub total_sell_amount: Decimal,
    pub total_sell_amount_usd: Decimal,
    pub profit: Decimal,
    pub profit_usd: Decimal,
    pub win_loss: WinLoss,
    pub source_watermark: i64,
}
