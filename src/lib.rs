pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::events::EventLog;
use crate::ports::{DeadLetterStore, LedgerStore};
use crate::services::OrderIntake;

#[derive(Clone)]
pub struct AppState {
    pub intake: OrderIntake,
    pub ledger: Arc<dyn LedgerStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub event_log: Arc<dyn EventLog>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            intake: OrderIntake::new(ledger.clone()),
            ledger,
            dead_letters,
            event_log,
            start_time: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(handlers::openapi))
        .route(
            "/exchange_api/submit_order",
            post(handlers::exchange::submit_order),
        )
        .route("/sub_account/new", post(handlers::sub_account::create_sub_account))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/dlq", get(handlers::dlq::list_dlq))
        .route("/dlq/:id/requeue", post(handlers::dlq::requeue_dlq))
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
