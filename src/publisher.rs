//! Result event publishing.
//!
//! One `CrawlResultEvent` per finished job, routed through the topic exchange under
//! the result routing key. A short-lived connection is opened per event: results
//! are published once per job, so there is nothing to pool, and the consumer's own
//! connection may be the one that just failed.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::broker::BrokerSettings;
use crate::error::PublishError;
use crate::models::CrawlResultEvent;

/// Persistent delivery mode (survives a broker restart).
const PERSISTENT: u8 = 2;

/// Outbound channel for job results.
///
/// Publishing is advisory: a failure is returned for the caller to log and must
/// never change the recorded job state.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, event: &CrawlResultEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct AmqpResultPublisher {
    amqp_url: String,
    exchange: String,
    routing_key: String,
}

impl AmqpResultPublisher {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            amqp_url: settings.amqp_url.clone(),
            exchange: settings.exchange.clone(),
            routing_key: settings.result_routing_key.clone(),
        }
    }

    async fn send(&self, conn: &Connection, payload: &[u8]) -> Result<(), PublishError> {
        let channel = conn.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        let confirmation = channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked);
        }
        Ok(())
    }
}

#[async_trait]
impl ResultPublisher for AmqpResultPublisher {
    #[instrument(level = "info", skip_all, fields(job_id = %event.job_id, status = %event.status))]
    async fn publish(&self, event: &CrawlResultEvent) -> Result<(), PublishError> {
        let t0 = Instant::now();
        let payload = serde_json::to_vec(event)?;
        debug!(bytes = payload.len(), "Encoded result event");

        let conn = Connection::connect(&self.amqp_url, ConnectionProperties::default()).await?;
        let sent = self.send(&conn, &payload).await;
        if let Err(e) = conn.close(200, "result published").await {
            warn!(error = %e, "Closing publisher connection failed");
        }
        sent?;

        info!(
            job_id = %event.job_id,
            status = %event.status,
            total_articles = event.total_articles,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Result event published"
        );
        Ok(())
    }
}
