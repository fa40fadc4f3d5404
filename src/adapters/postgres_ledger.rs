//! Postgres implementation of the ledger, outbox and dead-letter ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{DeadLetterRow, OutboxRow, SubAccountRow, TransactionRow};
use crate::domain::validation::check_source;
use crate::domain::{ExchangeOrder, Leg, Rejection, SubAccount, Transaction, TransactionInit, TransactionStatus};
use crate::events::topics;
use crate::ports::{
    DeadLetter, DeadLetterStore, LedgerStore, OutboxEvent, OutboxStore, SettlementOutcome,
    StoreError, StoreResult,
};

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed ledger. Every multi-row change runs in one SQL transaction.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(e: sqlx::Error, what: &str) -> StoreError {
    let duplicate = e
        .as_database_error()
        .and_then(|d| d.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false);
    if duplicate {
        StoreError::Duplicate(what.to_string())
    } else {
        StoreError::Database(e)
    }
}

async fn enqueue_event(
    tx: &mut SqlxTransaction<'_, Postgres>,
    topic: &str,
    payload: &str,
) -> StoreResult<()> {
    sqlx::query("INSERT INTO outbox (topic, payload) VALUES ($1, $2)")
        .bind(topic)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn cancel_pending(
    tx: &mut SqlxTransaction<'_, Postgres>,
    transaction_id: Uuid,
    notes: &str,
) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE transactions SET status = 'cancelled', system_notes = $2 \
         WHERE transaction_id = $1 AND status = 'pending' AND completed_at IS NULL",
    )
    .bind(transaction_id)
    .bind(notes)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_account(&self, account_number: &str) -> StoreResult<Option<SubAccount>> {
        let row = sqlx::query_as::<_, SubAccountRow>(
            "SELECT account_id, account_number, balance, linked_accounts, status, credential \
             FROM sub_accounts WHERE account_number = $1",
        )
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubAccountRow::into_domain).transpose()
    }

    async fn create_sub_account(&self, account: &SubAccount) -> StoreResult<SubAccount> {
        let row = sqlx::query_as::<_, SubAccountRow>(
            r#"
            INSERT INTO sub_accounts (account_id, account_number, balance, linked_accounts, status, credential)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING account_id, account_number, balance, linked_accounts, status, credential
            "#,
        )
        .bind(account.account_id)
        .bind(&account.account_number)
        .bind(&account.balance)
        .bind(&account.linked_accounts)
        .bind(account.status.as_str())
        .bind(&account.credential)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &account.account_number))?;

        row.into_domain()
    }

    async fn record_order(&self, order: &ExchangeOrder) -> StoreResult<()> {
        let payload = serde_json::to_string(order).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO exchange_orders (
                transaction_id, from_account, fund_account, amt, re, blank,
                received_at, validated_at, submitted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.transaction_id)
        .bind(&order.from)
        .bind(&order.fund)
        .bind(&order.amt)
        .bind(&order.re)
        .bind(&order.blank)
        .bind(order.received_at)
        .bind(order.validated_at)
        .bind(order.submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &order.transaction_id.to_string()))?;

        let pending = Transaction::pending(order);
        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, from_account, fund_account, amt, re,
                received_at, validated_at, submitted_at, completed_at, status, system_notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(pending.transaction_id)
        .bind(&pending.from)
        .bind(&pending.fund)
        .bind(&pending.amt)
        .bind(&pending.re)
        .bind(pending.received_at)
        .bind(pending.validated_at)
        .bind(pending.submitted_at)
        .bind(pending.completed_at)
        .bind(pending.status.as_str())
        .bind(&pending.system_notes)
        .execute(&mut *tx)
        .await?;

        enqueue_event(&mut tx, topics::EXCHANGE_ORDERS, &payload).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn settle(
        &self,
        order: &ExchangeOrder,
        completed_at: DateTime<Utc>,
        system_notes: &str,
    ) -> StoreResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, completed_at FROM transactions WHERE transaction_id = $1 FOR UPDATE",
        )
        .bind(order.transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (status, stamped) = current.ok_or(StoreError::MissingTransaction(order.transaction_id))?;
        let status: TransactionStatus = status.parse().map_err(StoreError::Corrupt)?;
        if status.is_terminal() || stamped.is_some() {
            tx.rollback().await?;
            return Ok(SettlementOutcome::AlreadySettled(status));
        }

        let source = sqlx::query_as::<_, SubAccountRow>(
            "SELECT account_id, account_number, balance, linked_accounts, status, credential \
             FROM sub_accounts WHERE account_number = $1 FOR UPDATE",
        )
        .bind(&order.from)
        .fetch_optional(&mut *tx)
        .await?
        .map(SubAccountRow::into_domain)
        .transpose()?;

        if let Err(rejection) = check_source(&order.from, source.as_ref(), &order.amt) {
            cancel_pending(&mut tx, order.transaction_id, &rejection.to_string()).await?;
            tx.commit().await?;
            return Ok(SettlementOutcome::Rejected(rejection));
        }

        let debited = adjust_balance(&mut tx, &order.from, &(-order.amt.clone()), Some(&order.amt)).await?;
        if debited != 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "debit of {} affected {} rows",
                order.from, debited
            )));
        }

        match adjust_balance(&mut tx, &order.fund, &order.amt, None).await? {
            1 => {}
            0 => {
                // Dropping the debit with the rest of the SQL transaction.
                tx.rollback().await?;
                let rejection = Rejection::AccountNotFound {
                    leg: Leg::Fund,
                    account: order.fund.clone(),
                };
                let mut cancel = self.pool.begin().await?;
                cancel_pending(&mut cancel, order.transaction_id, &rejection.to_string()).await?;
                cancel.commit().await?;
                return Ok(SettlementOutcome::Rejected(rejection));
            }
            credited => {
                tx.rollback().await?;
                return Err(StoreError::Consistency(format!(
                    "credit to {} matched {} rows",
                    order.fund, credited
                )));
            }
        }

        let stamped = sqlx::query(
            "UPDATE transactions SET completed_at = $2, system_notes = $3 \
             WHERE transaction_id = $1 AND status = 'pending' AND completed_at IS NULL",
        )
        .bind(order.transaction_id)
        .bind(completed_at)
        .bind(system_notes)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if stamped != 1 {
            tx.rollback().await?;
            return Err(StoreError::Consistency(format!(
                "balances moved but transaction {} could not be stamped",
                order.transaction_id
            )));
        }

        let init = TransactionInit {
            transaction_id: order.transaction_id,
            completed_at,
        };
        let payload = serde_json::to_string(&init).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        enqueue_event(&mut tx, topics::TRANSACTIONS, &payload).await?;

        tx.commit().await?;
        Ok(SettlementOutcome::Settled(init))
    }

    async fn finalize(&self, transaction_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'completed' \
             WHERE transaction_id = $1 AND status = 'pending' AND completed_at IS NOT NULL",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }
}

/// Applies `delta` to one account. With `floor`, the update only matches when
/// the current balance covers it.
async fn adjust_balance(
    tx: &mut SqlxTransaction<'_, Postgres>,
    account_number: &str,
    delta: &BigDecimal,
    floor: Option<&BigDecimal>,
) -> StoreResult<u64> {
    let result = match floor {
        Some(floor) => {
            sqlx::query(
                "UPDATE sub_accounts SET balance = balance + $1 \
                 WHERE account_number = $2 AND balance >= $3",
            )
            .bind(delta)
            .bind(account_number)
            .bind(floor)
            .execute(&mut **tx)
            .await?
        }
        None => {
            sqlx::query("UPDATE sub_accounts SET balance = balance + $1 WHERE account_number = $2")
                .bind(delta)
                .bind(account_number)
                .execute(&mut **tx)
                .await?
        }
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl OutboxStore for PostgresLedger {
    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM outbox WHERE published_at IS NULL ORDER BY id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_published(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE outbox SET published_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_publish_failure(&self, id: i64, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for PostgresLedger {
    async fn dead_letter(&self, entry: &DeadLetter) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, topic, message_id, payload, error_reason, attempts, moved_to_dlq_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.topic)
        .bind(&entry.message_id)
        .bind(&entry.payload)
        .bind(&entry.error_reason)
        .bind(entry.attempts)
        .bind(entry.moved_to_dlq_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT * FROM dead_letters ORDER BY moved_to_dlq_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeadLetter::from).collect())
    }

    async fn requeue(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let removed: Option<(String, String)> =
            sqlx::query_as("DELETE FROM dead_letters WHERE id = $1 RETURNING topic, payload")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((topic, payload)) = removed else {
            tx.rollback().await?;
            return Ok(false);
        };

        enqueue_event(&mut tx, &topic, &payload).await?;
        tx.commit().await?;
        Ok(true)
    }
}
