//! Persistence for articles and crawl jobs.
//!
//! Both stores sit behind traits so the consumer loop and coordinator can be driven
//! against in-memory doubles in tests. The PostgreSQL implementations share the
//! `news` and `crawl_jobs` tables with the producer system.
//!
//! Every operation runs in its own transaction, acquired from the pool and released
//! by either an explicit commit or a rollback (an uncommitted `sqlx::Transaction`
//! rolls back when dropped, so early returns and `?` are safe).

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{ArticleRecord, CrawlJob, JobTransition, TransitionOutcome};

pub mod articles;
pub mod jobs;

pub use articles::PgArticleStore;
pub use jobs::PgJobStore;

/// Append-only article storage, deduplicated by canonical URL.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert `record` unless an article with the same URL already exists.
    ///
    /// Returns `true` only for a real insertion. A duplicate URL, a lost race against
    /// another writer, and any persistence error all return `false` without leaving
    /// a partial row behind.
    async fn insert_if_absent(&self, record: &ArticleRecord) -> bool;
}

/// Crawl job records and their lifecycle.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load a job by id.
    async fn find(&self, job_id: &str) -> Result<Option<CrawlJob>, StoreError>;

    /// Apply `transition` atomically if the state machine allows it.
    ///
    /// Always bumps `updated_at`; sets `completed_at` only on terminal transitions.
    /// A missing job or a forbidden transition is reported in the outcome and
    /// writes nothing.
    async fn update_status(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<TransitionOutcome, StoreError>;
}
