//! Fund settlement: the stage that actually moves balances.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::order::stamp_after;
use crate::domain::ExchangeOrder;
use crate::events::topics;
use crate::ports::{LedgerStore, SettlementOutcome, StoreError};

use super::consumer::{HandleError, MessageHandler};

pub struct SettlementWorker {
    store: Arc<dyn LedgerStore>,
    system_notes: String,
}

impl SettlementWorker {
    pub fn new(store: Arc<dyn LedgerStore>, system_notes: impl Into<String>) -> Self {
        Self {
            store,
            system_notes: system_notes.into(),
        }
    }

    /// Settles one exchange order. Redelivered orders are recognised by their
    /// `transaction_id` and leave balances untouched.
    pub async fn settle(&self, order: &ExchangeOrder) -> Result<SettlementOutcome, StoreError> {
        let completed_at = stamp_after(order.submitted_at);
        let outcome = self
            .store
            .settle(order, completed_at, &self.system_notes)
            .await?;

        match &outcome {
            SettlementOutcome::Settled(init) => info!(
                transaction_id = %order.transaction_id,
                from = %order.from,
                fund = %order.fund,
                amt = %order.amt,
                completed_at = %init.completed_at,
                "Balances adjusted"
            ),
            SettlementOutcome::Rejected(rejection) => warn!(
                transaction_id = %order.transaction_id,
                "Transaction cancelled: {}",
                rejection
            ),
            SettlementOutcome::AlreadySettled(status) => info!(
                transaction_id = %order.transaction_id,
                status = %status,
                "Duplicate delivery ignored"
            ),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl MessageHandler for SettlementWorker {
    fn topic(&self) -> &'static str {
        topics::EXCHANGE_ORDERS
    }

    fn group(&self) -> &'static str {
        topics::FUND_GROUP
    }

    async fn handle(&self, payload: &str) -> Result<(), HandleError> {
        let order: ExchangeOrder =
            serde_json::from_str(payload).map_err(|e| HandleError::Malformed(e.to_string()))?;
        self.settle(&order).await?;
        Ok(())
    }
}
