//! Order intake: validates both legs of a transfer and records it.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::order::stamp_after;
use crate::domain::validation::{check_destination, check_source};
use crate::domain::{ExchangeOrder, Order, Rejection};
use crate::ports::{LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("amt must be a positive amount, got {0}")]
    InvalidAmount(BigDecimal),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct OrderIntake {
    store: Arc<dyn LedgerStore>,
}

impl OrderIntake {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validates `order` and records it together with its outbound
    /// `exchange_orders` event. Nothing is written when validation fails.
    pub async fn submit_order(
        &self,
        order: Order,
        received_at: DateTime<Utc>,
    ) -> Result<Uuid, IntakeError> {
        if order.amt <= BigDecimal::from(0) {
            return Err(IntakeError::InvalidAmount(order.amt));
        }

        let fund = self.store.find_account(&order.fund).await?;
        if let Err(rejection) = check_destination(&order.fund, fund.as_ref()) {
            warn!(from = %order.from, fund = %order.fund, "Order rejected: {}", rejection);
            return Err(rejection.into());
        }

        let from = self.store.find_account(&order.from).await?;
        if let Err(rejection) = check_source(&order.from, from.as_ref(), &order.amt) {
            warn!(from = %order.from, fund = %order.fund, "Order rejected: {}", rejection);
            return Err(rejection.into());
        }

        let validated_at = stamp_after(received_at);
        let transaction_id = Uuid::new_v4();
        let submitted_at = stamp_after(validated_at);
        let exchange_order =
            ExchangeOrder::from_order(order, transaction_id, received_at, validated_at, submitted_at);

        self.store.record_order(&exchange_order).await?;

        info!(
            transaction_id = %transaction_id,
            from = %exchange_order.from,
            fund = %exchange_order.fund,
            amt = %exchange_order.amt,
            "Exchange order recorded"
        );
        Ok(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::domain::{AccountStatus, Leg, SubAccount};

    fn ledger_with(accounts: &[(&str, i64, AccountStatus)]) -> Arc<InMemoryLedger> {
        let ledger = Arc::new(InMemoryLedger::new());
        for (number, balance, status) in accounts {
            ledger.put_account(SubAccount {
                account_id: Uuid::new_v4(),
                account_number: number.to_string(),
                balance: BigDecimal::from(*balance),
                status: *status,
                linked_accounts: vec![],
                credential: String::new(),
            });
        }
        ledger
    }

    fn order(from: &str, fund: &str, amt: i64) -> Order {
        Order {
            blank: String::new(),
            from: from.to_string(),
            fund: fund.to_string(),
            amt: BigDecimal::from(amt),
            re: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn valid_order_is_recorded_with_ordered_timestamps() {
        let ledger = ledger_with(&[("A", 500, AccountStatus::Active), ("B", 0, AccountStatus::Active)]);
        let intake = OrderIntake::new(ledger.clone());
        let received_at = Utc::now();

        let id = intake.submit_order(order("A", "B", 100), received_at).await.unwrap();

        let events = ledger.outbox_events();
        assert_eq!(events.len(), 1);
        let recorded: ExchangeOrder = serde_json::from_str(&events[0].payload).unwrap();
        assert_eq!(recorded.transaction_id, id);
        assert_eq!(recorded.received_at, received_at);
        assert!(recorded.validated_at >= recorded.received_at);
        assert!(recorded.submitted_at >= recorded.validated_at);
        assert_eq!(ledger.exchange_order_count(), 1);
        // Intake never touches balances.
        assert_eq!(ledger.balance("A"), Some(BigDecimal::from(500)));
    }

    #[tokio::test]
    async fn destination_is_checked_first() {
        let ledger = ledger_with(&[("A", 0, AccountStatus::Active)]);
        let intake = OrderIntake::new(ledger.clone());

        let err = intake.submit_order(order("A", "missing", 100), Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Rejected(Rejection::AccountNotFound { leg: Leg::Fund, .. })
        ));
    }

    #[tokio::test]
    async fn underfunded_source_leaves_no_trace() {
        let ledger = ledger_with(&[("C", 50, AccountStatus::Active), ("B", 0, AccountStatus::Active)]);
        let intake = OrderIntake::new(ledger.clone());

        let err = intake.submit_order(order("C", "B", 100), Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Rejected(Rejection::InsufficientFunds { leg: Leg::From, .. })
        ));
        assert_eq!(ledger.exchange_order_count(), 0);
        assert_eq!(ledger.transaction_count(), 0);
        assert!(ledger.outbox_events().is_empty());
    }

    #[tokio::test]
    async fn inactive_source_is_rejected() {
        let ledger = ledger_with(&[("A", 500, AccountStatus::Inactive), ("B", 0, AccountStatus::Active)]);
        let intake = OrderIntake::new(ledger);

        let err = intake.submit_order(order("A", "B", 1), Utc::now()).await.unwrap_err();
        assert!(matches!(err, IntakeError::Rejected(Rejection::AccountInactive { .. })));
    }

    #[tokio::test]
    async fn non_positive_amount_is_invalid() {
        let ledger = ledger_with(&[("A", 500, AccountStatus::Active), ("B", 0, AccountStatus::Active)]);
        let intake = OrderIntake::new(ledger);

        let err = intake.submit_order(order("A", "B", 0), Utc::now()).await.unwrap_err();
        assert!(matches!(err, IntakeError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn store_outage_is_distinct_from_rejection() {
        let ledger = ledger_with(&[]);
        ledger.set_unavailable(true);
        let intake = OrderIntake::new(ledger);

        let err = intake.submit_order(order("A", "B", 1), Utc::now()).await.unwrap_err();
        assert!(matches!(err, IntakeError::Store(StoreError::Unavailable(_))));
    }
}
