//! # cleansync
//!
//! Incremental raw-to-clean synchronization for append-only trade/event
//! stores. Each stream moves rows from the raw store into the cleaned store
//! exactly once per logical row, resuming from a durable cursor, with a
//! derivation stage that pairs opposing trade legs into outcomes and
//! enriches them through an external metadata lookup.

pub mod config;
pub mod database;
pub mod enrichment;
pub mod errors;
pub mod hashing;
pub mod metrics;
pub mod pairing;
pub mod source;
pub mod streams;
pub mod sync;
pub mod tracker;
pub mod types;
pub mod upsert;
