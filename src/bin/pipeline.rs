//! Pipeline runner – executes the configured sync streams as one finite
//! batch job. Intended to be invoked on a schedule; every run resumes from
//! the durable per-stream cursors and terminates once all sources are
//! exhausted. Exits non-zero if any stream failed; progress committed before
//! the failure stays valid.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cleansync::config::SyncConfig;
use cleansync::database::build_pool;
use cleansync::source::PagedSource;
use cleansync::streams;
use cleansync::sync::{run_stream, SyncContext};
use cleansync::upsert::BatchUpserter;

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Run the raw-to-clean sync streams")]
struct Args {
    /// Streams to run, in order. Runs every known stream when omitted.
    #[arg(value_name = "STREAM")]
    streams: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("tokio_postgres=warn".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = Arc::new(SyncConfig::from_env()?);

    let raw_pool = Arc::new(build_pool(&config.raw_db_url, config.pool_size, "raw").await?);
    let clean_pool = Arc::new(build_pool(&config.clean_db_url, config.pool_size, "clean").await?);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; will stop after the current page");
            ctrl_c_token.cancel();
        }
    });

    let ctx = SyncContext {
        source: PagedSource::new(Arc::clone(&raw_pool)),
        upserter: BatchUpserter::new(Arc::clone(&clean_pool), config.batch_size),
        dest: Arc::clone(&clean_pool),
        config: Arc::clone(&config),
        cancel,
    };

    let pipelines = streams::build(&config, &args.streams)?;
    info!(count = pipelines.len(), "Running sync streams");

    let mut failures = 0usize;
    for pipeline in &pipelines {
        match run_stream(&ctx, pipeline.as_ref()).await {
            Ok(summary) => {
                info!(
                    stream = summary.stream,
                    pages = summary.pages,
                    rows = summary.rows_committed,
                    cursor_id = summary.cursor.last_id,
                    "Stream completed"
                );
            }
            Err(e) => {
                failures += 1;
                error!(stream = pipeline.name(), error = %e, "Stream failed");
            }
        }
        if ctx.cancel.is_cancelled() {
            warn!("Stop requested; skipping remaining streams");
            break;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} stream(s) failed", failures);
    }
    Ok(())
}
