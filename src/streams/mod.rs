//! Per-stream pipeline definitions.
//!
//! Each stream is a thin configuration over the core engine: a raw table, a
//! destination `TableSpec`, an ordered hash field list and (where the stream
//! calls for it) a pairing rule and enrichment. The registry here is what the
//! binary runs.

pub mod arb;
pub mod bot_trades;
pub mod coin_snapshots;
pub mod copy_trader;

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::enrichment::{EnrichmentFetcher, HttpMetadataLookup};
use crate::errors::SyncError;
use crate::sync::StreamPipeline;

/// Names of every known stream, in run order.
pub const STREAM_NAMES: &[&str] = &[
    "arb_opportunities",
    "arb_opportunity_history",
    "copy_trader",
    "bot_trades",
    "coin_snapshots",
];

/// Build the pipelines for the requested stream names (all when empty).
/// `bot_trades` is the only stream that needs the external lookup service,
/// so the HTTP client is only constructed when that stream is selected.
pub fn build(
    config: &SyncConfig,
    selected: &[String],
) -> Result<Vec<Box<dyn StreamPipeline>>, SyncError> {
    let wanted: Vec<&str> = if selected.is_empty() {
        STREAM_NAMES.to_vec()
    } else {
        selected.iter().map(String::as_str).collect()
    };

    let mut pipelines: Vec<Box<dyn StreamPipeline>> = Vec::with_capacity(wanted.len());
    for name in wanted {
        match name {
            "arb_opportunities" => pipelines.push(Box::new(arb::ArbOpportunityPipeline::live())),
            "arb_opportunity_history" => {
                pipelines.push(Box::new(arb::ArbOpportunityPipeline::history()))
            }
            "copy_trader" => pipelines.push(Box::new(copy_trader::CopyTraderPipeline)),
            "bot_trades" => {
                let lookup = Arc::new(HttpMetadataLookup::new(&config.enrichment)?);
                let fetcher = EnrichmentFetcher::new(lookup, &config.enrichment);
                pipelines.push(Box::new(bot_trades::BotTradesPipeline::new(fetcher)));
            }
            "coin_snapshots" => pipelines.push(Box::new(coin_snapshots::CoinSnapshotPipeline)),
            other => {
                return Err(SyncError::Config(format!(
                    "unknown stream '{}' (known: {})",
                    other,
                    STREAM_NAMES.join(", ")
                )))
            }
        }
    }
    Ok(pipelines)
}
