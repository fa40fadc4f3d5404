//! Ledger transaction entity and its status machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::order::ExchangeOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Ledger record keyed by the intake-assigned `transaction_id`.
///
/// Created `pending` at intake. Settlement stamps `completed_at` once balances
/// have moved (or cancels it); the finalizer then marks it `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub from: String,
    pub fund: String,
    #[schema(value_type = String)]
    pub amt: BigDecimal,
    pub re: String,
    pub received_at: DateTime<Utc>,
    pub validated_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub system_notes: String,
}

impl Transaction {
    pub fn pending(order: &ExchangeOrder) -> Self {
        Self {
            transaction_id: order.transaction_id,
            from: order.from.clone(),
            fund: order.fund.clone(),
            amt: order.amt.clone(),
            re: order.re.clone(),
            received_at: order.received_at,
            validated_at: order.validated_at,
            submitted_at: order.submitted_at,
            completed_at: None,
            status: TransactionStatus::Pending,
            system_notes: String::new(),
        }
    }

    /// True once balances have moved for this transaction or it reached a
    /// terminal state. Settlement must not run again for such a row.
    pub fn is_settled(&self) -> bool {
        self.completed_at.is_some() || self.status.is_terminal()
    }

    /// Only a settled, still-pending row may be finalized.
    pub fn can_finalize(&self) -> bool {
        self.status == TransactionStatus::Pending && self.completed_at.is_some()
    }
}
