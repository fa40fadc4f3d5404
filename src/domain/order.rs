//! Transfer requests and the event payloads that carry them through the saga.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Transfer request as received from the client. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    #[serde(default)]
    pub blank: String,
    /// Source sub-account number.
    pub from: String,
    /// Destination sub-account number.
    pub fund: String,
    #[schema(value_type = String, example = "100.00")]
    pub amt: BigDecimal,
    #[serde(default)]
    pub re: String,
}

/// A validated order. Persisted once at intake and carried on the
/// `exchange_orders` stream; immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub transaction_id: Uuid,
    pub blank: String,
    pub from: String,
    pub fund: String,
    pub amt: BigDecimal,
    pub re: String,
    pub received_at: DateTime<Utc>,
    pub validated_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

impl ExchangeOrder {
    pub fn from_order(
        order: Order,
        transaction_id: Uuid,
        received_at: DateTime<Utc>,
        validated_at: DateTime<Utc>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id,
            blank: order.blank,
            from: order.from,
            fund: order.fund,
            amt: order.amt,
            re: order.re,
            received_at,
            validated_at,
            submitted_at,
        }
    }
}

/// Settlement-succeeded notification carried on the `transactions` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInit {
    pub transaction_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

/// Returns `now`, clamped so it never precedes `previous`.
pub fn stamp_after(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}
