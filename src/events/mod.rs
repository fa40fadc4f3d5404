//! Event streams connecting the saga stages.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryEventLog;
pub use self::redis::RedisEventLog;

pub mod topics {
    /// Validated orders, produced by intake, consumed by settlement.
    pub const EXCHANGE_ORDERS: &str = "exchange_orders";
    /// Settlement notifications, consumed by the finalizer.
    pub const TRANSACTIONS: &str = "transactions";

    pub const FUND_GROUP: &str = "fund-group";
    pub const TRANSACTIONS_GROUP: &str = "transactions-group";
}

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Event log unavailable: {0}")]
    Unavailable(String),
}

/// One message handed to a consumer. Stays pending until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub payload: String,
}

/// Ordered, at-least-once event stream.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn ping(&self) -> Result<(), EventLogError>;

    /// Appends `payload` to `topic`, returning the assigned message id.
    async fn publish(&self, topic: &str, payload: &str) -> Result<String, EventLogError>;

    /// Next batch for `consumer` in `group`. Entries delivered earlier but never
    /// acknowledged come first, so a restarted consumer resumes where it stopped.
    async fn fetch(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, EventLogError>;

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), EventLogError>;
}
