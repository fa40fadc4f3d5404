//! Transaction finalization: marks settled transactions `completed`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::TransactionInit;
use crate::events::topics;
use crate::ports::{LedgerStore, StoreError};

use super::consumer::{HandleError, MessageHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Completed,
    /// Unknown, unsettled or already terminal. Logged, not escalated.
    NoRowUpdated,
}

pub struct TransactionFinalizer {
    store: Arc<dyn LedgerStore>,
}

impl TransactionFinalizer {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn finalize(&self, init: &TransactionInit) -> Result<FinalizeOutcome, StoreError> {
        let rows = self.store.finalize(init.transaction_id).await?;
        if rows > 0 {
            info!(transaction_id = %init.transaction_id, "Transaction completed");
            Ok(FinalizeOutcome::Completed)
        } else {
            warn!(transaction_id = %init.transaction_id, "No transaction row updated");
            Ok(FinalizeOutcome::NoRowUpdated)
        }
    }
}

#[async_trait]
impl MessageHandler for TransactionFinalizer {
    fn topic(&self) -> &'static str {
        topics::TRANSACTIONS
    }

    fn group(&self) -> &'static str {
        topics::TRANSACTIONS_GROUP
    }

    async fn handle(&self, payload: &str) -> Result<(), HandleError> {
        let init: TransactionInit =
            serde_json::from_str(payload).map_err(|e| HandleError::Malformed(e.to_string()))?;
        self.finalize(&init).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::domain::{ExchangeOrder, TransactionStatus};
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn unknown_transaction_is_logged_not_failed() {
        let finalizer = TransactionFinalizer::new(Arc::new(InMemoryLedger::new()));
        let init = TransactionInit {
            transaction_id: Uuid::new_v4(),
            completed_at: Utc::now(),
        };
        assert_eq!(finalizer.finalize(&init).await.unwrap(), FinalizeOutcome::NoRowUpdated);
    }

    #[tokio::test]
    async fn unsettled_row_is_not_completed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let now = Utc::now();
        let order = ExchangeOrder {
            transaction_id: Uuid::new_v4(),
            blank: String::new(),
            from: "A".to_string(),
            fund: "B".to_string(),
            amt: BigDecimal::from(1),
            re: String::new(),
            received_at: now,
            validated_at: now,
            submitted_at: now,
        };
        ledger.record_order(&order).await.unwrap();
        let finalizer = TransactionFinalizer::new(ledger.clone());

        let outcome = finalizer
            .finalize(&TransactionInit {
                transaction_id: order.transaction_id,
                completed_at: now,
            })
            .await
            .unwrap();

        assert_eq!(outcome, FinalizeOutcome::NoRowUpdated);
        let tx = ledger.get_transaction(order.transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn store_outage_is_retryable() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_unavailable(true);
        let finalizer = TransactionFinalizer::new(ledger);
        let payload = serde_json::to_string(&TransactionInit {
            transaction_id: Uuid::new_v4(),
            completed_at: Utc::now(),
        })
        .unwrap();

        let err = finalizer.handle(&payload).await.unwrap_err();
        assert!(err.is_transient());
    }
}
