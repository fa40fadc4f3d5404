//! Outbox relay: publishes events that were committed together with the rows
//! they describe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::events::EventLog;
use crate::ports::{OutboxStore, StoreResult};

use super::retry::RetryPolicy;

/// A persisted event still unpublished after this many attempts is escalated.
const ALERT_AFTER_ATTEMPTS: i32 = 5;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    log: Arc<dyn EventLog>,
    batch_size: i64,
    poll: Duration,
    retry: RetryPolicy,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxStore>, log: Arc<dyn EventLog>, config: &ConsumerConfig) -> Self {
        Self {
            outbox,
            log,
            batch_size: config.outbox_batch_size.max(1),
            poll: config.outbox_poll,
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Publishes pending events in insertion order. Stops at the first failed
    /// publish so later events never overtake it.
    pub async fn relay_once(&self) -> StoreResult<RelayReport> {
        let mut report = RelayReport::default();

        for event in self.outbox.pending_events(self.batch_size).await? {
            match self.log.publish(&event.topic, &event.payload).await {
                Ok(message_id) => {
                    self.outbox.mark_published(event.id).await?;
                    debug!(outbox_id = event.id, topic = %event.topic, message_id = %message_id, "Event published");
                    report.published += 1;
                }
                Err(e) => {
                    self.outbox.record_publish_failure(event.id, &e.to_string()).await?;
                    let attempts = event.attempts + 1;
                    if attempts >= ALERT_AFTER_ATTEMPTS {
                        error!(
                            outbox_id = event.id,
                            topic = %event.topic,
                            attempts,
                            error = %e,
                            "Event persisted but still unpublished"
                        );
                    } else {
                        warn!(outbox_id = event.id, topic = %event.topic, attempts, error = %e, "Publish failed");
                    }
                    report.failed += 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!("Outbox relay started");
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;

        loop {
            let delay = tokio::select! {
                _ = &mut shutdown => break,
                result = self.relay_once() => match result {
                    Ok(report) if report.failed == 0 => {
                        failures = 0;
                        if report.published == 0 { Some(self.poll) } else { None }
                    }
                    Ok(_) => {
                        failures = failures.saturating_add(1);
                        Some(self.retry.delay_for(failures))
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        warn!(error = %e, failures, "Outbox read failed");
                        Some(self.retry.delay_for(failures))
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

        info!("Outbox relay stopped");
    }
}
