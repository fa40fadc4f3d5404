//! SQLx row types. Converted into domain types at the adapter boundary.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{SubAccount, Transaction};
use crate::ports::{DeadLetter, OutboxEvent, StoreError};

#[derive(Debug, FromRow)]
pub struct SubAccountRow {
    pub account_id: Uuid,
    pub account_number: String,
    pub balance: BigDecimal,
    pub linked_accounts: Vec<String>,
    pub status: String,
    pub credential: String,
}

impl SubAccountRow {
    pub fn into_domain(self) -> Result<SubAccount, StoreError> {
        Ok(SubAccount {
            account_id: self.account_id,
            account_number: self.account_number,
            balance: self.balance,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            linked_accounts: self.linked_accounts,
            credential: self.credential,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct TransactionRow {
    pub transaction_id: Uuid,
    pub from_account: String,
    pub fund_account: String,
    pub amt: BigDecimal,
    pub re: String,
    pub received_at: DateTime<Utc>,
    pub validated_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub system_notes: String,
}

impl TransactionRow {
    pub fn into_domain(self) -> Result<Transaction, StoreError> {
        Ok(Transaction {
            transaction_id: self.transaction_id,
            from: self.from_account,
            fund: self.fund_account,
            amt: self.amt,
            re: self.re,
            received_at: self.received_at,
            validated_at: self.validated_at,
            submitted_at: self.submitted_at,
            completed_at: self.completed_at,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            system_notes: self.system_notes,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxEvent {
    fn from(row: OutboxRow) -> Self {
        OutboxEvent {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            published_at: row.published_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DeadLetterRow {
    pub id: Uuid,
    pub topic: String,
    pub message_id: String,
    pub payload: String,
    pub error_reason: String,
    pub attempts: i32,
    pub moved_to_dlq_at: DateTime<Utc>,
}

impl From<DeadLetterRow> for DeadLetter {
    fn from(row: DeadLetterRow) -> Self {
        DeadLetter {
            id: row.id,
            topic: row.topic,
            message_id: row.message_id,
            payload: row.payload,
            error_reason: row.error_reason,
            attempts: row.attempts,
            moved_to_dlq_at: row.moved_to_dlq_at,
        }
    }
}
