//! PostgreSQL job store (`crawl_jobs` table).
//!
//! The table's primary key is a UUID assigned by the producer. A job id that does not
//! parse as a UUID can never match a row, so it is reported as not found rather than
//! surfacing a database cast error.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::JobStore;
use crate::error::StoreError;
use crate::models::{CrawlJob, JobStatus, JobTransition, MediaResults, TransitionOutcome};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CrawlJobRow {
    id: Uuid,
    status: String,
    total_articles: Option<i32>,
    media_results: Option<String>,
    error_message: Option<String>,
    // TIMESTAMP WITHOUT TIME ZONE in the producer schema; stored as UTC.
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
}

impl TryFrom<CrawlJobRow> for CrawlJob {
    type Error = StoreError;

    fn try_from(row: CrawlJobRow) -> Result<Self, Self::Error> {
        let media_results = match row.media_results.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<MediaResults>(raw)?,
            _ => MediaResults::new(),
        };
        let created_at = row
            .created_at
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);

        Ok(CrawlJob {
            id: row.id.to_string(),
            status: row.status.parse()?,
            total_articles: row.total_articles.map(i64::from).unwrap_or(0),
            media_results,
            error_message: row.error_message,
            created_at,
            updated_at: row.updated_at.map(|t| t.and_utc()).unwrap_or(created_at),
            completed_at: row.completed_at.map(|t| t.and_utc()),
        })
    }
}

fn parse_job_id(job_id: &str) -> Option<Uuid> {
    Uuid::parse_str(job_id.trim()).ok()
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(level = "debug", skip(self))]
    async fn find(&self, job_id: &str) -> Result<Option<CrawlJob>, StoreError> {
        let Some(id) = parse_job_id(job_id) else {
            warn!(job_id, "Job id is not a UUID; no such crawl job");
            return Ok(None);
        };

        let row: Option<CrawlJobRow> = sqlx::query_as(
            r#"
            SELECT id, status, total_articles, media_results, error_message,
                   created_at, updated_at, completed_at
            FROM crawl_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CrawlJob::try_from).transpose()
    }

    #[instrument(level = "debug", skip(self, transition), fields(to = %transition.target()))]
    async fn update_status(
        &self,
        job_id: &str,
        transition: JobTransition,
    ) -> Result<TransitionOutcome, StoreError> {
        let Some(id) = parse_job_id(job_id) else {
            error!(job_id, "CrawlJob not found (id is not a UUID)");
            return Ok(TransitionOutcome::NotFound);
        };

        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM crawl_jobs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((current,)) = current else {
            error!(job_id, "CrawlJob not found");
            return Ok(TransitionOutcome::NotFound);
        };
        let current: JobStatus = current.parse()?;
        let target = transition.target();

        if !current.can_transition_to(target) {
            warn!(job_id, from = %current, to = %target, "Refusing status transition");
            return Ok(TransitionOutcome::Rejected { current });
        }

        let now = Utc::now().naive_utc();
        match &transition {
            JobTransition::Running => {
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET status = $1,
                        updated_at = $2
                    WHERE id = $3
                    "#,
                )
                .bind(target.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            JobTransition::Completed {
                total_articles,
                media_results,
            } => {
                let total = i32::try_from(*total_articles).unwrap_or(i32::MAX);
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET status = $1,
                        total_articles = $2,
                        media_results = $3,
                        completed_at = $4,
                        updated_at = $4
                    WHERE id = $5
                    "#,
                )
                .bind(target.as_str())
                .bind(total)
                .bind(serde_json::to_string(media_results)?)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            JobTransition::Failed { error } => {
                sqlx::query(
                    r#"
                    UPDATE crawl_jobs
                    SET status = $1,
                        error_message = $2,
                        completed_at = $3,
                        updated_at = $3
                    WHERE id = $4
                    "#,
                )
                .bind(target.as_str())
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(job_id, from = %current, to = %target, "CrawlJob status updated");
        Ok(TransitionOutcome::Applied)
    }
}
