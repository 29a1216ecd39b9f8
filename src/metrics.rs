//! # Global Metrics Registry
//!
//! This module defines and registers all Prometheus metrics for the sync
//! engine. Centralizing metric definitions keeps the observability surface in
//! one place; exposition (scrape endpoint, push gateway) is outside the scope
//! of these batch jobs.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

/// Pages fetched and processed, per stream.
pub static PAGES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cleansync_pages_processed_total",
        "Number of source pages fetched and processed",
        &["stream"]
    )
    .expect("metric registration")
});

/// Rows durably inserted into the cleaned store, per stream.
pub static ROWS_INSERTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cleansync_rows_inserted_total",
        "Rows inserted into the destination store (post conflict-skip)",
        &["stream"]
    )
    .expect("metric registration")
});

/// Rows dropped before insert, per stream and reason
/// (`duplicate`, `null_field`, `unpaired`, `enrichment`).
pub static ROWS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cleansync_rows_dropped_total",
        "Rows or pairing groups dropped before insert",
        &["stream", "reason"]
    )
    .expect("metric registration")
});

/// Metadata lookup attempts, per terminal outcome (`ok`, `transient`,
/// `permanent`, `missing`).
pub static LOOKUP_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cleansync_lookup_outcomes_total",
        "Terminal outcomes of external metadata lookups",
        &["outcome"]
    )
    .expect("metric registration")
});

/// Last committed cursor id, per stream.
pub static CURSOR_POSITION: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "cleansync_cursor_position",
        "Last committed last_processed_id per stream",
        &["stream"]
    )
    .expect("metric registration")
});

/// Wall time of one insert transaction, per stream.
pub static COMMIT_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cleansync_commit_duration_seconds",
        "Duration of batch insert transactions",
        &["stream"]
    )
    .expect("metric registration")
});
