//! Storage ports.
//! Services depend on these traits; `adapters` provides Postgres and in-memory
//! implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{ExchangeOrder, Rejection, SubAccount, Transaction, TransactionInit, TransactionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("No transaction row for {0}")]
    MissingTransaction(Uuid),

    #[error("Balance consistency violated: {0}")]
    Consistency(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

impl StoreError {
    /// Worth retrying the same operation later.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)
            ),
            StoreError::Unavailable(_) | StoreError::Conflict(_) => true,
            StoreError::MissingTransaction(_)
            | StoreError::Consistency(_)
            | StoreError::Corrupt(_)
            | StoreError::Duplicate(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of one settlement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Both balances moved and the `TransactionInit` event was enqueued.
    Settled(TransactionInit),
    /// Re-validation failed; the transaction row is now `cancelled`.
    Rejected(Rejection),
    /// The transaction was already settled or terminal. Nothing changed.
    AlreadySettled(TransactionStatus),
}

/// An event waiting in (or already relayed from) the outbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A consumed message that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeadLetter {
    pub id: Uuid,
    pub topic: String,
    pub message_id: String,
    pub payload: String,
    pub error_reason: String,
    pub attempts: i32,
    pub moved_to_dlq_at: DateTime<Utc>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find_account(&self, account_number: &str) -> StoreResult<Option<SubAccount>>;

    async fn create_sub_account(&self, account: &SubAccount) -> StoreResult<SubAccount>;

    /// Persists the exchange order, its `pending` transaction row and the
    /// `exchange_orders` outbox event as one atomic unit.
    async fn record_order(&self, order: &ExchangeOrder) -> StoreResult<()>;

    /// Re-validates the source account and moves `amt` from `from` to `fund`.
    /// Either both balances change, the stamp is written and the
    /// `transactions` outbox event is enqueued, or nothing changes.
    async fn settle(
        &self,
        order: &ExchangeOrder,
        completed_at: DateTime<Utc>,
        system_notes: &str,
    ) -> StoreResult<SettlementOutcome>;

    /// Moves a settled `pending` row to `completed`. Returns rows affected.
    async fn finalize(&self, transaction_id: Uuid) -> StoreResult<u64>;

    async fn get_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Unpublished events in insertion order.
    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>>;

    async fn mark_published(&self, id: i64) -> StoreResult<()>;

    async fn record_publish_failure(&self, id: i64, error: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn dead_letter(&self, entry: &DeadLetter) -> StoreResult<()>;

    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>>;

    /// Removes the entry and re-enqueues its payload in the outbox.
    /// Returns false when no such entry exists.
    async fn requeue(&self, id: Uuid) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::MissingTransaction(Uuid::new_v4()).is_transient());
        assert!(!StoreError::Consistency("debit without credit".into()).is_transient());
    }
}
