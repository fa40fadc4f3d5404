//! Sequential stream consumer shared by the settlement and finalization stages.
//!
//! One loop per process, bound to one topic and consumer group, so messages
//! are handled strictly in stream order. A message is acknowledged only after
//! it was processed or durably dead-lettered.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConsumerConfig;
use crate::events::{Delivery, EventLog, EventLogError};
use crate::ports::{DeadLetter, DeadLetterStore, StoreError};

use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandleError {
    pub fn is_transient(&self) -> bool {
        match self {
            HandleError::Malformed(_) => false,
            HandleError::Store(e) => e.is_transient(),
        }
    }

    fn is_consistency(&self) -> bool {
        matches!(self, HandleError::Store(StoreError::Consistency(_)))
    }
}

/// One saga stage reacting to messages from a single topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn topic(&self) -> &'static str;

    fn group(&self) -> &'static str;

    async fn handle(&self, payload: &str) -> Result<(), HandleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    DeadLettered,
    /// Could not be processed nor dead-lettered; left unacknowledged.
    Deferred,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub processed: usize,
    pub dead_lettered: usize,
    pub deferred: usize,
}

pub struct StreamConsumer<H> {
    log: Arc<dyn EventLog>,
    dead_letters: Arc<dyn DeadLetterStore>,
    handler: H,
    consumer_name: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<H: MessageHandler> StreamConsumer<H> {
    pub fn new(
        log: Arc<dyn EventLog>,
        dead_letters: Arc<dyn DeadLetterStore>,
        handler: H,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            log,
            dead_letters,
            handler,
            consumer_name: config.consumer_name.clone(),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Runs until `shutdown` resolves. Fetch failures never end the loop.
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let topic = self.handler.topic();
        info!(topic, group = self.handler.group(), consumer = %self.consumer_name, "Consumer started");
        tokio::pin!(shutdown);

        let mut fetch_failures: u32 = 0;
        loop {
            let delay = tokio::select! {
                _ = &mut shutdown => break,
                result = self.poll_once() => match result {
                    Ok(report) => {
                        fetch_failures = 0;
                        if report.deferred > 0 {
                            Some(self.retry.delay_for(self.retry.max_attempts))
                        } else if report.fetched == 0 {
                            Some(self.retry.base)
                        } else {
                            None
                        }
                    }
                    Err(e) => {
                        fetch_failures = fetch_failures.saturating_add(1);
                        if fetch_failures >= self.retry.max_attempts {
                            error!(topic, failures = fetch_failures, error = %e, "Sustained fetch failures from event log");
                        } else {
                            warn!(topic, failures = fetch_failures, error = %e, "Fetch from event log failed");
                        }
                        Some(self.retry.delay_for(fetch_failures))
                    }
                },
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = sleep(delay) => {}
                }
            }
        }

        info!(topic, "Consumer stopped");
    }

    /// Fetches one batch and handles every message in order.
    pub async fn poll_once(&self) -> Result<BatchReport, EventLogError> {
        let deliveries = self
            .log
            .fetch(
                self.handler.topic(),
                self.handler.group(),
                &self.consumer_name,
                self.batch_size,
            )
            .await?;

        let mut report = BatchReport {
            fetched: deliveries.len(),
            ..Default::default()
        };
        for delivery in &deliveries {
            match self.process(delivery).await {
                Disposition::Processed => report.processed += 1,
                Disposition::DeadLettered => report.dead_lettered += 1,
                Disposition::Deferred => {
                    // Later messages must not overtake this one.
                    report.deferred += 1;
                    break;
                }
            }
        }
        Ok(report)
    }

    async fn process(&self, delivery: &Delivery) -> Disposition {
        let topic = self.handler.topic();
        let mut attempt: u32 = 0;

        let failure = loop {
            attempt += 1;
            match self.handler.handle(&delivery.payload).await {
                Ok(()) => {
                    self.ack(delivery).await;
                    debug!(topic, message_id = %delivery.id, "Message processed");
                    return Disposition::Processed;
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        topic,
                        message_id = %delivery.id,
                        attempt,
                        error = %e,
                        "Message handling failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        if failure.is_consistency() {
            error!(alert = true, topic, message_id = %delivery.id, error = %failure, "Ledger consistency violated");
        }

        let entry = DeadLetter {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            message_id: delivery.id.clone(),
            payload: delivery.payload.clone(),
            error_reason: failure.to_string(),
            attempts: i32::try_from(attempt).unwrap_or(i32::MAX),
            moved_to_dlq_at: Utc::now(),
        };

        match self.dead_letters.dead_letter(&entry).await {
            Ok(()) => {
                error!(
                    topic,
                    message_id = %delivery.id,
                    dlq_id = %entry.id,
                    attempts = attempt,
                    error = %failure,
                    "Message moved to dead-letter queue"
                );
                self.ack(delivery).await;
                Disposition::DeadLettered
            }
            Err(e) => {
                error!(
                    topic,
                    message_id = %delivery.id,
                    error = %e,
                    cause = %failure,
                    "Could not dead-letter message; leaving it unacknowledged"
                );
                Disposition::Deferred
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self
            .log
            .ack(self.handler.topic(), self.handler.group(), &delivery.id)
            .await
        {
            // Redelivery is harmless: every stage is idempotent.
            warn!(topic = self.handler.topic(), message_id = %delivery.id, error = %e, "Ack failed");
        }
    }
}
