use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::PgPool;
use std::path::Path;
use uuid::Uuid;

use fund_exchange::adapters::PostgresLedger;
use fund_exchange::db::run_migrations;
use fund_exchange::domain::{
    AccountStatus, ExchangeOrder, Leg, Order, Rejection, SubAccount, TransactionStatus,
};
use fund_exchange::events::topics;
use fund_exchange::ports::{DeadLetter, DeadLetterStore, LedgerStore, OutboxStore, SettlementOutcome};

async fn setup() -> Option<PostgresLedger> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            println!("Skipping Postgres ledger test: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPool::connect(&database_url).await.expect("Failed to connect to test DB");
    run_migrations(&pool, &Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await
        .expect("migrations");
    Some(PostgresLedger::new(pool))
}

async fn seed(ledger: &PostgresLedger, balance: i64) -> String {
    let number = format!("T-{}", Uuid::new_v4());
    ledger
        .create_sub_account(&SubAccount {
            account_id: Uuid::new_v4(),
            account_number: number.clone(),
            balance: BigDecimal::from(balance),
            status: AccountStatus::Active,
            linked_accounts: vec![],
            credential: String::new(),
        })
        .await
        .expect("create account");
    number
}

fn exchange_order(from: &str, fund: &str, amt: i64) -> ExchangeOrder {
    let now = Utc::now();
    let order = Order {
        blank: String::new(),
        from: from.to_string(),
        fund: fund.to_string(),
        amt: BigDecimal::from(amt),
        re: "rent".to_string(),
    };
    ExchangeOrder::from_order(order, Uuid::new_v4(), now, now, now)
}

#[tokio::test]
async fn test_settle_moves_balances_once() {
    let Some(ledger) = setup().await else { return };
    let a = seed(&ledger, 500).await;
    let b = seed(&ledger, 0).await;

    let order = exchange_order(&a, &b, 100);
    ledger.record_order(&order).await.expect("record order");

    let pending = ledger.get_transaction(order.transaction_id).await.unwrap().unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert!(pending.completed_at.is_none());

    let outcome = ledger.settle(&order, Utc::now(), "default note").await.unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled(_)));

    let again = ledger.settle(&order, Utc::now(), "default note").await.unwrap();
    assert_eq!(again, SettlementOutcome::AlreadySettled(TransactionStatus::Pending));

    let from = ledger.find_account(&a).await.unwrap().unwrap();
    let fund = ledger.find_account(&b).await.unwrap().unwrap();
    assert_eq!(from.balance, BigDecimal::from(400));
    assert_eq!(fund.balance, BigDecimal::from(100));

    assert_eq!(ledger.finalize(order.transaction_id).await.unwrap(), 1);
    assert_eq!(ledger.finalize(order.transaction_id).await.unwrap(), 0);
    let done = ledger.get_transaction(order.transaction_id).await.unwrap().unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_overdraw_at_settlement_cancels() {
    let Some(ledger) = setup().await else { return };
    let a = seed(&ledger, 50).await;
    let b = seed(&ledger, 0).await;

    let order = exchange_order(&a, &b, 80);
    ledger.record_order(&order).await.expect("record order");

    let outcome = ledger.settle(&order, Utc::now(), "default note").await.unwrap();
    assert!(matches!(outcome, SettlementOutcome::Rejected(_)));

    let tx = ledger.get_transaction(order.transaction_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);
    let from = ledger.find_account(&a).await.unwrap().unwrap();
    assert_eq!(from.balance, BigDecimal::from(50));
}

#[tokio::test]
async fn test_missing_destination_rolls_back_debit() {
    let Some(ledger) = setup().await else { return };
    let a = seed(&ledger, 500).await;
    let missing = format!("T-{}", Uuid::new_v4());

    let order = exchange_order(&a, &missing, 100);
    ledger.record_order(&order).await.expect("record order");

    let outcome = ledger.settle(&order, Utc::now(), "default note").await.unwrap();
    match outcome {
        SettlementOutcome::Rejected(Rejection::AccountNotFound { leg, account }) => {
            assert_eq!(leg, Leg::Fund);
            assert_eq!(account, missing);
        }
        other => panic!("expected AccountNotFound for the fund leg, got {:?}", other),
    }

    let from = ledger.find_account(&a).await.unwrap().unwrap();
    assert_eq!(from.balance, BigDecimal::from(500));

    let tx = ledger.get_transaction(order.transaction_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Cancelled);
    assert!(tx.completed_at.is_none());

    let id = order.transaction_id.to_string();
    let pending = ledger.pending_events(10_000).await.unwrap();
    assert!(!pending
        .iter()
        .any(|e| e.topic == topics::TRANSACTIONS && e.payload.contains(&id)));
}

#[tokio::test]
async fn test_outbox_and_dead_letter_requeue() {
    let Some(ledger) = setup().await else { return };
    let a = seed(&ledger, 10).await;
    let b = seed(&ledger, 0).await;

    let order = exchange_order(&a, &b, 5);
    ledger.record_order(&order).await.expect("record order");

    let pending = ledger.pending_events(1000).await.unwrap();
    let event = pending
        .iter()
        .find(|e| e.payload.contains(&order.transaction_id.to_string()))
        .expect("order event in outbox");
    ledger.record_publish_failure(event.id, "broker down").await.unwrap();
    ledger.mark_published(event.id).await.unwrap();
    let still_pending = ledger.pending_events(1000).await.unwrap();
    assert!(still_pending.iter().all(|e| e.id != event.id));

    let entry = DeadLetter {
        id: Uuid::new_v4(),
        topic: event.topic.clone(),
        message_id: "1-0".to_string(),
        payload: event.payload.clone(),
        error_reason: "test".to_string(),
        attempts: 5,
        moved_to_dlq_at: Utc::now(),
    };
    ledger.dead_letter(&entry).await.unwrap();
    assert!(ledger.requeue(entry.id).await.unwrap());
    assert!(!ledger.requeue(entry.id).await.unwrap());

    let requeued = ledger.pending_events(1000).await.unwrap();
    assert!(requeued.iter().any(|e| e.payload == entry.payload));
}
