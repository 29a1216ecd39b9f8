//! # Sync Loop
//!
//! Drives one stream's repeat-until-empty cycle: fetch page, transform (and
//! pair/enrich where the stream calls for it), hash, upsert, advance. Each
//! stream is a finite batch job over explicit store handles; nothing here is
//! shared across streams. Stops are honored only between pages, never inside
//! a batch transaction.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::metrics::PAGES_PROCESSED;
use crate::source::PagedSource;
use crate::tracker::{self, Cursor};
use crate::upsert::BatchUpserter;

/// Everything a stream needs to run, owned by the entry point and injected.
pub struct SyncContext {
    pub source: PagedSource,
    pub upserter: BatchUpserter,
    pub dest: Arc<Pool>,
    pub config: Arc<SyncConfig>,
    pub cancel: CancellationToken,
}

/// Outcome of processing one page.
#[derive(Debug, Clone, Copy)]
pub struct PageResult {
    /// Raw rows fetched; zero signals stream exhaustion.
    pub fetched: usize,
    /// Rows durably inserted by this page (post conflict-skip).
    pub rows_committed: u64,
    /// Position the next fetch should start from. May run ahead of the
    /// durable cursor when a page produced no emittable rows.
    pub next: Cursor,
}

/// One source-table-to-destination-table pipeline.
#[async_trait]
pub trait StreamPipeline: Send + Sync {
    /// Checkpoint key and log label.
    fn name(&self) -> &'static str;

    /// One-time setup: tracker row and the destination's unique hash index.
    async fn prepare(&self, ctx: &SyncContext) -> Result<(), SyncError>;

    /// Fetch and fully process one page starting after `cursor`.
    async fn process_page(&self, ctx: &SyncContext, cursor: Cursor)
        -> Result<PageResult, SyncError>;
}

/// Final report of one stream run.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub stream: &'static str,
    pub pages: u64,
    pub rows_committed: u64,
    pub cursor: Cursor,
}

/// Run one stream to exhaustion (or until cancelled). Any error stops the
/// loop immediately; progress committed by earlier pages stays valid and the
/// next invocation resumes from the durable cursor.
pub async fn run_stream(
    ctx: &SyncContext,
    pipeline: &dyn StreamPipeline,
) -> Result<StreamSummary, SyncError> {
    let name = pipeline.name();
    pipeline.prepare(ctx).await?;

    let mut cursor = {
        let client = ctx.dest.get().await?;
        tracker::ensure_stream(&**client, name).await?;
        tracker::get(&**client, name).await?
    };
    info!(
        stream = name,
        resume_id = cursor.last_id,
        resume_ts = %cursor.last_ts,
        "Starting stream sync"
    );

    let mut pages = 0u64;
    let mut rows_committed = 0u64;

    loop {
        if ctx.cancel.is_cancelled() {
            info!(stream = name, "Stop requested; halting between pages");
            break;
        }

        let page = pipeline.process_page(ctx, cursor).await?;
        if page.fetched == 0 {
            info!(stream = name, "Source exhausted");
            break;
        }

        pages += 1;
        rows_committed += page.rows_committed;
        PAGES_PROCESSED.with_label_values(&[name]).inc();

        if page.next == cursor {
            // A full page that moves nothing forward would loop forever.
            warn!(stream = name, fetched = page.fetched, "Cursor did not advance; halting");
            break;
        }
        cursor = page.next;
    }

    info!(
        stream = name,
        pages,
        rows_committed,
        final_id = cursor.last_id,
        "Stream sync finished"
    );
    Ok(StreamSummary {
        stream: name,
        pages,
        rows_committed,
        cursor,
    })
}
