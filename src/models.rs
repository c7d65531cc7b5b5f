//! Data models for crawl jobs, articles, and the messages exchanged with the broker.
//!
//! This module defines the core data structures used throughout the worker:
//! - [`CrawlJob`] / [`JobStatus`]: the job record and its lifecycle state machine
//! - [`ArticleRecord`]: a normalized article as produced by a source adapter
//! - [`Article`]: the persisted form of an article row
//! - [`CrawlRequest`]: the inbound job-request message
//! - [`CrawlResultEvent`]: the outbound completion/failure event
//!
//! Message bodies use camelCase field names to match the JSON contract shared with
//! the producer system.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProcessError;

/// Per-source count of newly inserted articles, in registry order.
pub type MediaResults = IndexMap<String, i64>;

/// Default per-source cap when a request omits `maxArticles`.
pub const DEFAULT_MAX_ARTICLES: u32 = 50;

/// Lifecycle status of a [`CrawlJob`].
///
/// Transitions are monotonic: `PENDING -> RUNNING -> {COMPLETED | FAILED}`.
/// `COMPLETED` and `FAILED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Column / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// `RUNNING -> RUNNING` is allowed so a job redelivered after a worker crash can
    /// be picked up again. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Pending | JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Pending | JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status column holds an unrecognized value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A crawl job record.
///
/// Created by the external producer, mutated only by the consumer loop and never
/// deleted here.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlJob {
    /// Caller-assigned opaque identifier.
    pub id: String,
    pub status: JobStatus,
    /// Sum of `media_results`; zero until the job completes.
    pub total_articles: i64,
    pub media_results: MediaResults,
    /// Failure reason, set only on a `FAILED` transition.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Bumped by every applied transition.
    pub updated_at: DateTime<Utc>,
    /// Set only on the terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    /// A fresh `PENDING` job, as the producer would insert it.
    #[cfg(test)]
    pub fn pending(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            total_articles: 0,
            media_results: MediaResults::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A requested status change together with the fields it carries.
///
/// The job store applies it only when [`JobStatus::can_transition_to`] allows the
/// move from the job's current status:
///
/// | Transition | Writes |
/// |------------|--------|
/// | `Running` | `status`, `updated_at` |
/// | `Completed` | `status`, `total_articles`, `media_results`, `completed_at`, `updated_at` |
/// | `Failed` | `status`, `error_message`, `completed_at`, `updated_at` |
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    Running,
    Completed {
        total_articles: i64,
        media_results: MediaResults,
    },
    Failed {
        error: String,
    },
}

impl JobTransition {
    /// A `COMPLETED` transition whose total is derived from the per-source tallies.
    pub fn completed(media_results: MediaResults) -> Self {
        JobTransition::Completed {
            total_articles: media_results.values().sum(),
            media_results,
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            JobTransition::Running => JobStatus::Running,
            JobTransition::Completed { .. } => JobStatus::Completed,
            JobTransition::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// What the job store did with a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row was updated and committed.
    Applied,
    /// No job with that id exists; nothing was written.
    NotFound,
    /// The state machine forbids the move; nothing was written.
    Rejected { current: JobStatus },
}

/// A normalized article as returned by a source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    /// Whitespace-normalized, at most 500 characters.
    pub title: String,
    /// At most 5000 characters, never empty (placeholder when extraction yields nothing).
    pub content: String,
    /// Canonical absolute URL; the sole idempotency key.
    pub url: String,
    /// Source tag, e.g. `HANKYUNG`.
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
}

/// A persisted article row. Append-only: never mutated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// Generated at insertion; the URL, not the id, identifies an article.
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// Stamp a record with a generated id and ingestion timestamps.
    pub fn from_record(record: &ArticleRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: record.title.clone(),
            content: record.content.clone(),
            source: record.source.clone(),
            url: record.url.clone(),
            published_at: record.published_at,
            image_url: record.image_url.clone(),
            crawled_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_max_articles() -> u32 {
    DEFAULT_MAX_ARTICLES
}

/// Inbound job request: `{"jobId": "...", "maxArticles": 50}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub job_id: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: u32,
}

impl CrawlRequest {
    /// Parse and validate a raw message body.
    ///
    /// Anything that does not decode into the request schema, carries a blank
    /// `jobId`, or asks for zero articles is a [`ProcessError::MessageFormat`].
    pub fn from_slice(payload: &[u8]) -> Result<Self, ProcessError> {
        let request: CrawlRequest = serde_json::from_slice(payload)
            .map_err(|e| ProcessError::MessageFormat(e.to_string()))?;

        if request.job_id.trim().is_empty() {
            return Err(ProcessError::MessageFormat("jobId is blank".to_string()));
        }
        if request.max_articles == 0 {
            return Err(ProcessError::MessageFormat(
                "maxArticles must be at least 1".to_string(),
            ));
        }
        Ok(request)
    }
}

/// Outbound result event published once per job.
///
/// Serialized as:
///
/// ```json
/// {"jobId": "...", "status": "COMPLETED", "totalArticles": 7, "mediaResults": {"hankyung": 5, "mk": 2}}
/// ```
///
/// A `FAILED` event always carries a zero total and an empty `mediaResults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResultEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub total_articles: i64,
    pub media_results: MediaResults,
}

impl CrawlResultEvent {
    /// A `COMPLETED` event; `totalArticles` always equals the sum of `mediaResults`.
    pub fn completed(job_id: impl Into<String>, media_results: MediaResults) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            total_articles: media_results.values().sum(),
            media_results,
        }
    }

    /// A `FAILED` event for `job_id`.
    pub fn failed(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            total_articles: 0,
            media_results: MediaResults::new(),
        }
    }
}
