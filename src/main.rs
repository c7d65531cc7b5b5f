//! # News Ingest Worker
//!
//! A queue-driven crawl worker. It takes crawl requests off RabbitMQ, scrapes the
//! registered Korean economic news sources, stores new articles in PostgreSQL,
//! and reports per-source results back over the broker.
//!
//! ## Guarantees
//!
//! - Articles are deduplicated by canonical URL; a URL is stored at most once
//!   across all jobs, sources and workers
//! - A job reaches exactly one terminal status (`COMPLETED` or `FAILED`), and a
//!   committed `COMPLETED` is never downgraded by a late broker failure
//! - The job store is authoritative; result events are best-effort notifications
//!
//! ## Usage
//!
//! ```sh
//! DATABASE_URL=postgres://lucr@localhost/lucr news_ingest_worker --run-migrations
//! ```
//!
//! ## Architecture
//!
//! 1. **Consume**: one request at a time from `lucr.crawl.request` (manual ack)
//! 2. **Crawl**: each source in turn, capped at `maxArticles` per source
//! 3. **Persist**: idempotent article inserts and job status transitions
//! 4. **Report**: a result event on `crawl.result`, then acknowledge

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod broker;
mod cli;
mod consumer;
mod coordinator;
mod error;
mod models;
mod publisher;
mod sources;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use broker::Backoff;
use cli::Cli;
use consumer::CrawlConsumer;
use coordinator::CrawlCoordinator;
use publisher::AmqpResultPublisher;
use store::{PgArticleStore, PgJobStore};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env is normal in deployment.
    dotenvy::dotenv().ok();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "news_ingest_worker starting up");

    let args = Cli::parse();
    debug!(
        amqp_url = %utils::redact_url(&args.amqp_url),
        exchange = %args.exchange,
        request_queue = %args.request_queue,
        http_timeout_secs = args.http_timeout_secs,
        "Parsed CLI arguments"
    );

    // --- Database ---
    info!(max_connections = args.db_max_connections, "Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(args.db_max_connections)
        .connect(&args.database_url)
        .await?;
    info!("Database connected");

    if args.run_migrations {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations complete");
    }

    // --- Crawl pipeline ---
    let client = sources::build_client(&args.user_agent, args.http_timeout())?;
    let articles = Arc::new(PgArticleStore::new(pool.clone()));
    let coordinator = CrawlCoordinator::new(sources::registry(&client)?, articles);
    info!(sources = ?coordinator.source_names(), "Sources registered");

    let settings = args.broker_settings();
    let consumer = CrawlConsumer::new(
        Arc::new(PgJobStore::new(pool.clone())),
        coordinator,
        Arc::new(AmqpResultPublisher::new(&settings)),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    consumer.run(&settings, &Backoff::default(), shutdown).await?;

    pool.close().await;
    info!(
        elapsed_s = start_time.elapsed().as_secs(),
        "news_ingest_worker stopped"
    );
    Ok(())
}
