//! Matching opposing trade legs into derived outcomes.
//!
//! Legs are grouped by a correlation key (trader address or token address)
//! and matched first-come: the first qualifying SELL wins, not the best one.
//! Grouping is transient and rebuilt for every page. Two variants exist:
//!
//! - **Strict-amount** (copy trading): a SELL qualifies only if its input
//!   token equals the BUY's output token and its input amount equals the
//!   BUY's output amount exactly, in decimal arithmetic.
//! - **Token-aggregate** (bot trades): BUY and SELL share a token address
//!   with no amount constraint; an optional PARTIAL_SELL is summed into the
//!   sell side.
//!
//! Unmatched BUYs are simply dropped from the cycle; their counterpart may
//! arrive in a later page.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::{BotTradeLeg, CopyTradeOutcome, CopyTraderLeg, PairedBotTrade, TradeSide, WinLoss};

/// Fraction digits carried by monetary profit figures.
const PROFIT_SCALE: u32 = 8;

/// Strict-amount pairing over copy-trader legs, grouped by trader address.
pub fn pair_strict_amount(legs: &[CopyTraderLeg]) -> Vec<CopyTradeOutcome> {
    let mut outcomes = Vec::new();

    for (_, group) in group_by(legs, |leg| leg.trader_address.as_str()) {
        let sells: Vec<&CopyTraderLeg> = group
            .iter()
            .copied()
            .filter(|l| l.side == TradeSide::Sell)
            .collect();

        for buy in group.iter().filter(|l| l.side == TradeSide::Buy) {
            let matched = sells.iter().find(|sell| {
                sell.token_in == buy.token_out && sell.amount_in == buy.amount_out
            });
            let Some(sell) = matched else {
                continue;
            };

            let buy_cost = buy.amount_in;
            let sell_revenue = sell.amount_out;
            let profit = (sell_revenue - buy_cost).round_dp(PROFIT_SCALE);

            outcomes.push(CopyTradeOutcome {
                trader_address: buy.trader_address.clone(),
                token_bought: buy.token_out.clone(),
                amount_bought: buy.amount_out,
                buy_cost,
                sell_revenue,
                profit,
                win_loss: WinLoss::from_profit(profit),
                buy_occurred_at: buy.occurred_at,
                sell_occurred_at: sell.occurred_at,
                source_watermark: buy.id.max(sell.id),
            });
        }
    }

    outcomes
}

/// Token-aggregate pairing over bot-trade legs, grouped by token address.
/// A group without both a BUY and a SELL yields nothing this cycle.
pub fn pair_token_aggregate(legs: &[BotTradeLeg]) -> Vec<PairedBotTrade> {
    let mut outcomes = Vec::new();

    for (token_address, group) in group_by(legs, |leg| leg.token_address.as_str()) {
        let buy = group.iter().find(|l| l.side == TradeSide::Buy);
        let sell = group.iter().find(|l| l.side == TradeSide::Sell);
        let partial = group.iter().find(|l| l.side == TradeSide::PartialSell);

        let (Some(buy), Some(sell)) = (buy, sell) else {
            continue;
        };

        let partial_amount = partial.map_or(Decimal::ZERO, |p| p.amount);
        let partial_usd = partial.map_or(Decimal::ZERO, |p| p.amount_usd);

        let total_sell_amount = sell.amount + partial_amount;
        let total_sell_usd = sell.amount_usd + partial_usd;

        let profit = (total_sell_amount - buy.amount).round_dp(PROFIT_SCALE);
        let profit_usd = (total_sell_usd - buy.amount_usd).round_dp(PROFIT_SCALE);

        let source_watermark = buy
            .id
            .max(sell.id)
            .max(partial.map_or(0, |p| p.id));

        outcomes.push(PairedBotTrade {
            token_address: token_address.to_string(),
            buy: (*buy).clone(),
            partial_sell: partial.map(|p| (*p).clone()),
            sell: (*sell).clone(),
            total_sell_amount,
            total_sell_amount_usd: total_sell_usd,
            profit,
            profit_usd,
            // Classification follows the dollar-denominated profit.
            win_loss: WinLoss::from_profit(profit_usd),
            source_watermark,
        });
    }

    outcomes
}

/// Group by key, preserving first-seen key order so pairing output is
/// deterministic for a given page.
fn group_by<'a, T, F>(items: &'a [T], key_fn: F) -> Vec<(&'a str, Vec<&'a T>)>
where
    F: Fn(&'a T) -> &'a str,
{
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    let mut groups: Vec<(&str, Vec<&T>)> = Vec::new();
    for item in items {
        let key = key_fn(item);
        match index.get(key) {
            Some(&slot) => groups[slot].1.push(item),
            None => {
                index.insert(key, groups.len());
                groups.push((key, vec![item]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ct_leg(
        id: i64,
        side: TradeSide,
        trader: &str,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
        amount_out: Decimal,
    ) -> CopyTraderLeg {
        CopyTraderLeg {
            id,
            side,
            trader_address: trader.to_string(),
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            amount_out,
            occurred_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, id as u32 % 60).unwrap()),
        }
    }

    fn bot_leg(id: i64, side: TradeSide, token: &str, amount: Decimal, usd: Decimal) -> BotTradeLeg {
        BotTradeLeg {
            id,
            side,
            token_address: token.to_string(),
            wallet_address: format!("wallet-{}", id),
            amount,
            price: Some(dec!(1.0)),
            amount_usd: usd,
            coin_info_id: Some(42),
            occurred_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap()),
        }
    }

    #[test]
    fn strict_pairing_matches_exact_amounts() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T1", "TOK", "USDT", dec!(10), dec!(120)),
        ];
        let outcomes = pair_strict_amount(&legs);
        assert_eq!(outcomes.len(), 1);
        let o = &outcomes[0];
        assert_eq!(o.profit, dec!(20));
        assert_eq!(o.win_loss, WinLoss::Win);
        assert_eq!(o.source_watermark, 2);
    }

    #[test]
    fn strict_pairing_rejects_amount_mismatch() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T1", "TOK", "USDT", dec!(9), dec!(120)),
        ];
        assert!(pair_strict_amount(&legs).is_empty());
    }

    #[test]
    fn strict_pairing_rejects_token_mismatch() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T1", "OTHER", "USDT", dec!(10), dec!(120)),
        ];
        assert!(pair_strict_amount(&legs).is_empty());
    }

    #[test]
    fn strict_pairing_does_not_cross_traders() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T2", "TOK", "USDT", dec!(10), dec!(120)),
        ];
        assert!(pair_strict_amount(&legs).is_empty());
    }

    #[test]
    fn strict_pairing_takes_first_matching_sell() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T1", "TOK", "USDT", dec!(10), dec!(105)),
            ct_leg(3, TradeSide::Sell, "T1", "TOK", "USDT", dec!(10), dec!(200)),
        ];
        let outcomes = pair_strict_amount(&legs);
        assert_eq!(outcomes.len(), 1);
        // First match, not best match.
        assert_eq!(outcomes[0].sell_revenue, dec!(105));
    }

    #[test]
    fn zero_profit_classifies_as_loss() {
        let legs = vec![
            ct_leg(1, TradeSide::Buy, "T1", "USDT", "TOK", dec!(100), dec!(10)),
            ct_leg(2, TradeSide::Sell, "T1", "TOK", "USDT", dec!(10), dec!(100)),
        ];
        let outcomes = pair_strict_amount(&legs);
        assert_eq!(outcomes[0].profit, Decimal::ZERO);
        assert_eq!(outcomes[0].win_loss, WinLoss::Loss);
    }

    #[test]
    fn hairline_profit_classifies_as_win() {
        assert_eq!(WinLoss::from_profit(dec!(0.00000001)), WinLoss::Win);
        assert_eq!(WinLoss::from_profit(dec!(0)), WinLoss::Loss);
        assert_eq!(WinLoss::from_profit(dec!(-0.5)), WinLoss::Loss);
    }

    #[test]
    fn token_aggregate_sums_partial_sell() {
        let legs = vec![
            bot_leg(10, TradeSide::Buy, "MINT", dec!(100), dec!(50)),
            bot_leg(11, TradeSide::PartialSell, "MINT", dec!(40), dec!(30)),
            bot_leg(12, TradeSide::Sell, "MINT", dec!(70), dec!(45)),
        ];
        let outcomes = pair_token_aggregate(&legs);
        assert_eq!(outcomes.len(), 1);
        let o = &outcomes[0];
        assert_eq!(o.total_sell_amount, dec!(110));
        assert_eq!(o.total_sell_amount_usd, dec!(75));
        assert_eq!(o.profit, dec!(10));
        assert_eq!(o.profit_usd, dec!(25));
        assert_eq!(o.win_loss, WinLoss::Win);
        assert_eq!(o.source_watermark, 12);
    }

    #[test]
    fn token_aggregate_requires_buy_and_sell() {
        let only_buy = vec![bot_leg(1, TradeSide::Buy, "MINT", dec!(5), dec!(5))];
        assert!(pair_token_aggregate(&only_buy).is_empty());

        let only_sell = vec![bot_leg(2, TradeSide::Sell, "MINT", dec!(5), dec!(5))];
        assert!(pair_token_aggregate(&only_sell).is_empty());

        let partial_only = vec![
            bot_leg(3, TradeSide::Buy, "MINT", dec!(5), dec!(5)),
            bot_leg(4, TradeSide::PartialSell, "MINT", dec!(1), dec!(1)),
        ];
        assert!(pair_token_aggregate(&partial_only).is_empty());
    }

    #[test]
    fn token_aggregate_isolates_groups() {
        let legs = vec![
            bot_leg(1, TradeSide::Buy, "A", dec!(10), dec!(10)),
            bot_leg(2, TradeSide::Sell, "A", dec!(12), dec!(12)),
            bot_leg(3, TradeSide::Buy, "B", dec!(10), dec!(10)),
        ];
        let outcomes = pair_token_aggregate(&legs);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].token_address, "A");
    }

    #[test]
    fn grouping_preserves_first_seen_order() {
        let legs = vec![
            bot_leg(1, TradeSide::Buy, "B", dec!(1), dec!(1)),
            bot_leg(2, TradeSide::Buy, "A", dec!(1), dec!(1)),
            bot_leg(3, TradeSide::Sell, "B", dec!(2), dec!(2)),
            bot_leg(4, TradeSide::Sell, "A", dec!(2), dec!(2)),
        ];
        let outcomes = pair_token_aggregate(&legs);
        let tokens: Vec<&str> = outcomes.iter().map(|o| o.token_address.as_str()).collect();
        assert_eq!(tokens, vec!["B", "A"]);
    }
}
