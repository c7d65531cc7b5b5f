//! Error taxonomy for the ingestion worker.
//!
//! Each component owns one error type; [`ProcessError`] is what the consumer loop
//! reasons about when deciding between acknowledgment, negative acknowledgment and
//! reconciliation.

use thiserror::Error;

use crate::models::UnknownStatus;

/// Failures from the article and job stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("media results column is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Status(#[from] UnknownStatus),
}

/// A single source adapter failed (network, parse, timeout).
///
/// Always isolated by the coordinator; never fails a job.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("failed to parse feed: {0}")]
    Feed(#[from] quick_xml::DeError),
}

/// Result event could not be delivered. Advisory only; the job store stays authoritative.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker refused the message")]
    Nacked,
}

/// Connection or topology failures talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("gave up after {attempts} connection attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Job-level failures seen by the consumer loop.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The payload cannot become well-formed on retry; dropped without redelivery.
    #[error("malformed crawl request: {0}")]
    MessageFormat(String),

    /// No job record matches; dropped without redelivery.
    #[error("crawl job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settling the delivery with the broker failed.
    #[error("acknowledgment failed: {0}")]
    Ack(#[from] BrokerError),
}
