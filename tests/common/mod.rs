#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use fund_exchange::adapters::InMemoryLedger;
use fund_exchange::config::ConsumerConfig;
use fund_exchange::domain::{AccountStatus, SubAccount};
use fund_exchange::events::InMemoryEventLog;
use fund_exchange::services::{OutboxRelay, SettlementWorker, StreamConsumer, TransactionFinalizer};
use fund_exchange::{create_app, AppState};

/// All three stages wired to shared in-memory adapters. Tests drive the
/// background stages step by step through `pump`.
pub struct Saga {
    pub ledger: Arc<InMemoryLedger>,
    pub log: Arc<InMemoryEventLog>,
    pub app: Router,
    pub relay: OutboxRelay,
    pub settlement: StreamConsumer<SettlementWorker>,
    pub finalizer: StreamConsumer<TransactionFinalizer>,
}

pub fn test_config(max_attempts: u32) -> ConsumerConfig {
    ConsumerConfig {
        max_attempts,
        backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..ConsumerConfig::default()
    }
}

impl Saga {
    pub fn new() -> Self {
        Self::with_config(test_config(3))
    }

    pub fn with_config(config: ConsumerConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let log = Arc::new(InMemoryEventLog::new());

        let app = create_app(AppState::new(ledger.clone(), ledger.clone(), log.clone()));
        let relay = OutboxRelay::new(ledger.clone(), log.clone(), &config);
        let settlement = StreamConsumer::new(
            log.clone(),
            ledger.clone(),
            SettlementWorker::new(ledger.clone(), "default note"),
            &config,
        );
        let finalizer = StreamConsumer::new(
            log.clone(),
            ledger.clone(),
            TransactionFinalizer::new(ledger.clone()),
            &config,
        );

        Self {
            ledger,
            log,
            app,
            relay,
            settlement,
            finalizer,
        }
    }

    pub fn seed(&self, number: &str, balance: i64, status: AccountStatus) {
        self.ledger.put_account(SubAccount {
            account_id: Uuid::new_v4(),
            account_number: number.to_string(),
            balance: BigDecimal::from(balance),
            status,
            linked_accounts: vec![],
            credential: String::new(),
        });
    }

    /// Runs relay, settlement, relay, finalizer once each.
    pub async fn pump(&self) {
        self.relay.relay_once().await.expect("relay");
        self.settlement.poll_once().await.expect("settlement poll");
        self.relay.relay_once().await.expect("relay");
        self.finalizer.poll_once().await.expect("finalizer poll");
    }

    pub async fn request(&self, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn submit(&self, from: &str, fund: &str, amt: &str) -> (StatusCode, Value) {
        let body = format!(
            r#"{{"blank":"","from":"{}","fund":"{}","amt":{},"re":""}}"#,
            from, fund, amt
        );
        self.request("POST", "/exchange_api/submit_order", Some(&body)).await
    }

    pub fn balance(&self, number: &str) -> BigDecimal {
        self.ledger.balance(number).expect("account exists")
    }
}
