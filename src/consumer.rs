//! Crawl request consumer.
//!
//! Receives one request at a time (prefetch 1, manual acks) and drives the job
//! through its lifecycle:
//!
//! ```text
//! parse -> load job -> RUNNING -> crawl -> COMPLETED -> publish -> ack
//! ```
//!
//! # Failure Handling
//!
//! | Situation | Job store | Event | Delivery |
//! |-----------|-----------|-------|----------|
//! | Malformed payload | untouched | none | nack, no requeue |
//! | Unknown job | untouched | none | nack, no requeue |
//! | Job already terminal | untouched | none | ack |
//! | Failure before COMPLETED is stored | FAILED | FAILED | nack, no requeue |
//! | Failure after COMPLETED is stored (lost ack) | stays COMPLETED | already sent | nack, no requeue |
//!
//! The last row is the reconciliation path: the job record is re-read before
//! writing FAILED, so a crawl whose results were committed is never downgraded
//! because the broker connection dropped at acknowledgment time.
//!
//! A failed nack is logged and ignored; the broker redelivers the unsettled
//! message and the terminal-job check above makes that redelivery a no-op.

use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::broker::{AmqpDelivery, Backoff, BrokerSettings, connect_with_backoff, open_request_consumer};
use crate::coordinator::CrawlCoordinator;
use crate::error::{BrokerError, ProcessError};
use crate::models::{
    CrawlRequest, CrawlResultEvent, JobStatus, JobTransition, TransitionOutcome,
};
use crate::publisher::ResultPublisher;
use crate::store::JobStore;
use crate::utils::truncate_for_log;

/// Settlement side of a received message.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Whether the broker has delivered this message before.
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), BrokerError>;

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// How one message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Job completed and the delivery was acknowledged.
    Completed { total_articles: i64 },
    /// Payload was not a valid crawl request.
    Malformed,
    /// No job record matched the request.
    UnknownJob,
    /// The job had already finished; the redelivery was acknowledged and ignored.
    AlreadyFinished(JobStatus),
    /// Processing failed and the job was marked FAILED.
    Failed,
    /// Processing errored after COMPLETED was stored; the success was kept.
    Reconciled,
}

pub struct CrawlConsumer {
    jobs: Arc<dyn JobStore>,
    coordinator: CrawlCoordinator,
    publisher: Arc<dyn ResultPublisher>,
}

impl CrawlConsumer {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        coordinator: CrawlCoordinator,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Self {
        Self {
            jobs,
            coordinator,
            publisher,
        }
    }

    /// Handle one message end to end. Every path settles the delivery.
    pub async fn on_message(&self, payload: &[u8], delivery: &dyn Delivery) -> HandleOutcome {
        let request = match CrawlRequest::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %truncate_for_log(&String::from_utf8_lossy(payload), 200),
                    "Dropping malformed crawl request"
                );
                self.reject(delivery).await;
                return HandleOutcome::Malformed;
            }
        };

        info!(
            job_id = %request.job_id,
            max_articles = request.max_articles,
            redelivered = delivery.redelivered(),
            "Crawl request received"
        );

        match self.process(&request, delivery).await {
            Ok(outcome) => outcome,
            Err(ProcessError::JobNotFound(job_id)) => {
                error!(%job_id, "Crawl job not found; dropping request");
                self.reject(delivery).await;
                HandleOutcome::UnknownJob
            }
            Err(e) => self.reconcile(&request.job_id, e, delivery).await,
        }
    }

    #[instrument(level = "info", skip_all, fields(job_id = %request.job_id))]
    async fn process(
        &self,
        request: &CrawlRequest,
        delivery: &dyn Delivery,
    ) -> Result<HandleOutcome, ProcessError> {
        let job_id = request.job_id.as_str();
        let t0 = Instant::now();

        let job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| ProcessError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            warn!(job_id, status = %job.status, "Job already finished; acknowledging redelivery");
            delivery.ack().await?;
            return Ok(HandleOutcome::AlreadyFinished(job.status));
        }

        match self.jobs.update_status(job_id, JobTransition::Running).await? {
            TransitionOutcome::Applied => {}
            TransitionOutcome::NotFound => return Err(ProcessError::JobNotFound(job_id.to_string())),
            TransitionOutcome::Rejected { current } => {
                warn!(job_id, %current, "Job finished concurrently; acknowledging");
                delivery.ack().await?;
                return Ok(HandleOutcome::AlreadyFinished(current));
            }
        }

        let media_results = self.coordinator.run(request.max_articles as usize).await;
        let transition = JobTransition::completed(media_results.clone());

        match self.jobs.update_status(job_id, transition).await? {
            TransitionOutcome::Applied => {}
            TransitionOutcome::NotFound => return Err(ProcessError::JobNotFound(job_id.to_string())),
            TransitionOutcome::Rejected { current } => {
                warn!(job_id, %current, "Job finished concurrently; discarding this run's result");
                delivery.ack().await?;
                return Ok(HandleOutcome::AlreadyFinished(current));
            }
        }

        let event = CrawlResultEvent::completed(job_id, media_results);
        let total_articles = event.total_articles;
        self.announce(&event).await;

        delivery.ack().await?;
        info!(
            job_id,
            total_articles,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Crawl job completed"
        );
        Ok(HandleOutcome::Completed { total_articles })
    }

    /// Decide the job's final state after `cause` interrupted processing.
    async fn reconcile(&self, job_id: &str, cause: ProcessError, delivery: &dyn Delivery) -> HandleOutcome {
        error!(job_id, error = %cause, "Crawl processing failed");

        let current = match self.jobs.find(job_id).await {
            Ok(job) => job.map(|j| j.status),
            Err(e) => {
                warn!(job_id, error = %e, "Could not re-read job status");
                None
            }
        };

        let outcome = match current {
            Some(JobStatus::Completed) => {
                warn!(job_id, "Acknowledgment failed but the job is already COMPLETED; keeping the result");
                HandleOutcome::Reconciled
            }
            Some(JobStatus::Failed) => {
                warn!(job_id, "Job is already FAILED; nothing further to record");
                HandleOutcome::Failed
            }
            _ => self.record_failure(job_id, &cause).await,
        };

        self.reject(delivery).await;
        outcome
    }

    async fn record_failure(&self, job_id: &str, cause: &ProcessError) -> HandleOutcome {
        let transition = JobTransition::Failed {
            error: cause.to_string(),
        };
        match self.jobs.update_status(job_id, transition).await {
            Ok(TransitionOutcome::Applied) => info!(job_id, "Job marked FAILED"),
            Ok(outcome) => warn!(job_id, ?outcome, "FAILED status not recorded"),
            Err(e) => error!(job_id, error = %e, "Could not record FAILED status"),
        }
        self.announce(&CrawlResultEvent::failed(job_id)).await;
        HandleOutcome::Failed
    }

    async fn announce(&self, event: &CrawlResultEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            error!(job_id = %event.job_id, status = %event.status, error = %e, "Result event publish failed");
        }
    }

    async fn reject(&self, delivery: &dyn Delivery) {
        if let Err(e) = delivery.nack(false).await {
            warn!(error = %e, "Nack failed (connection lost); broker will redeliver");
        }
    }

    /// Consume requests until `shutdown` resolves.
    ///
    /// A closed or failed delivery stream triggers a reconnect. The message in
    /// flight is always settled before shutdown is observed.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Exhausted`] when the broker stays unreachable, or the request
    /// consumer cannot be opened, for more than `backoff.max_retries` consecutive
    /// attempts.
    pub async fn run(
        &self,
        settings: &BrokerSettings,
        backoff: &Backoff,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), BrokerError> {
        tokio::pin!(shutdown);
        let mut open_failures = 0usize;

        loop {
            let conn = connect_with_backoff(&settings.amqp_url, backoff).await?;
            let mut deliveries = match open_request_consumer(&conn, settings).await {
                Ok(deliveries) => {
                    open_failures = 0;
                    deliveries
                }
                Err(e) => {
                    if let Err(close_err) = conn.close(200, "request consumer unavailable").await {
                        warn!(error = %close_err, "Closing broker connection failed");
                    }
                    open_failures += 1;
                    let Some(delay) = backoff.retry_delay(open_failures) else {
                        error!(
                            attempt = open_failures,
                            max = backoff.max_retries,
                            error = %e,
                            "Could not open request consumer; retries exhausted"
                        );
                        return Err(BrokerError::Exhausted {
                            attempts: open_failures,
                            last: e.to_string(),
                        });
                    };
                    warn!(
                        attempt = open_failures,
                        max = backoff.max_retries,
                        ?delay,
                        error = %e,
                        "Could not open request consumer; reconnecting"
                    );
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("Shutdown requested while reconnecting");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            info!(queue = %settings.request_queue, sources = ?self.coordinator.source_names(), "Waiting for crawl requests");

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested; closing broker connection");
                        if let Err(e) = conn.close(200, "worker shutdown").await {
                            warn!(error = %e, "Closing broker connection failed");
                        }
                        return Ok(());
                    }
                    next = deliveries.next() => match next {
                        Some(Ok(message)) => {
                            let delivery = AmqpDelivery::from(&message);
                            let outcome = self.on_message(&message.data, &delivery).await;
                            info!(?outcome, "Message handled");
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Delivery stream failed; reconnecting");
                            break;
                        }
                        None => {
                            warn!("Delivery stream closed; reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}
