//! # Centralized Error Handling
//!
//! This module defines the typed error hierarchy for the whole sync engine.
//! Every pipeline stage returns `Result<_, SyncError>` so the sync loop can
//! decide between continue and abort based on the error kind, rather than
//! catching ambiguous string-based errors.

use thiserror::Error;

/// The top-level error type, encapsulating all failures within a stream run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("Pool build error: {0}")]
    PoolBuild(String),
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("Data integrity error: {0}")]
    Integrity(String),
    #[error("Row decode error in {table}: {source}")]
    RowDecode {
        table: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of the external metadata lookup. Only `Transient` is retried;
/// the other kinds drop the affected pairing group for the current cycle.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("transient lookup failure: {0}")]
    Transient(String),
    #[error("lookup rejected with status {0}")]
    Permanent(u16),
    #[error("response missing symbol/name metadata")]
    MissingMetadata,
}

impl LookupError {
    /// Whether the failure class is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::Transient(_))
    }
}
