//! In-memory ledger used by tests and local runs without Postgres.
//!
//! Mirrors the Postgres adapter's atomicity: every multi-step change is
//! applied to a working copy and swapped in only when all steps succeed.
//! Supports fault injection for the credit step and for whole-store outages.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::validation::check_source;
use crate::domain::{
    ExchangeOrder, Leg, Rejection, SubAccount, Transaction, TransactionInit, TransactionStatus,
};
use crate::events::topics;
use crate::ports::{
    DeadLetter, DeadLetterStore, LedgerStore, OutboxEvent, OutboxStore, SettlementOutcome,
    StoreError, StoreResult,
};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, SubAccount>,
    exchange_orders: HashMap<Uuid, ExchangeOrder>,
    transactions: HashMap<Uuid, Transaction>,
    outbox: BTreeMap<i64, OutboxEvent>,
    next_outbox_id: i64,
    dead_letters: Vec<DeadLetter>,
}

impl LedgerState {
    fn enqueue(&mut self, topic: &str, payload: String) {
        self.next_outbox_id += 1;
        let id = self.next_outbox_id;
        self.outbox.insert(
            id,
            OutboxEvent {
                id,
                topic: topic.to_string(),
                payload,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
                published_at: None,
            },
        );
    }

    fn cancel_pending(&mut self, transaction_id: Uuid, notes: &str) {
        if let Some(tx) = self.transactions.get_mut(&transaction_id) {
            if tx.status == TransactionStatus::Pending && tx.completed_at.is_none() {
                tx.status = TransactionStatus::Cancelled;
                tx.system_notes = notes.to_string();
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    failing_credits: HashSet<String>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<Faults>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces an account without going through the store API.
    pub fn put_account(&self, account: SubAccount) {
        self.state()
            .accounts
            .insert(account.account_number.clone(), account);
    }

    pub fn balance(&self, account_number: &str) -> Option<BigDecimal> {
        self.state()
            .accounts
            .get(account_number)
            .map(|a| a.balance.clone())
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    pub fn exchange_order_count(&self) -> usize {
        self.state().exchange_orders.len()
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state().outbox.values().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    /// Every store call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    /// Credits to `account_number` fail until cleared, after the debit step ran.
    pub fn fail_credits_to(&self, account_number: &str) {
        self.faults()
            .failing_credits
            .insert(account_number.to_string());
    }

    pub fn clear_faults(&self) {
        let mut faults = self.faults();
        faults.unavailable = false;
        faults.failing_credits.clear();
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.faults().unavailable {
            return Err(StoreError::Unavailable("in-memory ledger marked unavailable".into()));
        }
        Ok(())
    }

    fn credit_fails(&self, account_number: &str) -> bool {
        self.faults().failing_credits.contains(account_number)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn find_account(&self, account_number: &str) -> StoreResult<Option<SubAccount>> {
        self.check_available()?;
        Ok(self.state().accounts.get(account_number).cloned())
    }

    async fn create_sub_account(&self, account: &SubAccount) -> StoreResult<SubAccount> {
        self.check_available()?;
        let mut state = self.state();
        if state.accounts.contains_key(&account.account_number) {
            return Err(StoreError::Duplicate(account.account_number.clone()));
        }
        state
            .accounts
            .insert(account.account_number.clone(), account.clone());
        Ok(account.clone())
    }

    async fn record_order(&self, order: &ExchangeOrder) -> StoreResult<()> {
        self.check_available()?;
        let payload = serde_json::to_string(order).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut state = self.state();
        if state.exchange_orders.contains_key(&order.transaction_id) {
            return Err(StoreError::Duplicate(order.transaction_id.to_string()));
        }
        state
            .exchange_orders
            .insert(order.transaction_id, order.clone());
        state
            .transactions
            .insert(order.transaction_id, Transaction::pending(order));
        state.enqueue(topics::EXCHANGE_ORDERS, payload);
        Ok(())
    }

    async fn settle(
        &self,
        order: &ExchangeOrder,
        completed_at: DateTime<Utc>,
        system_notes: &str,
    ) -> StoreResult<SettlementOutcome> {
        self.check_available()?;
        let credit_fails = self.credit_fails(&order.fund);
        let mut state = self.state();

        let current = state
            .transactions
            .get(&order.transaction_id)
            .ok_or(StoreError::MissingTransaction(order.transaction_id))?;
        if current.is_settled() {
            return Ok(SettlementOutcome::AlreadySettled(current.status));
        }

        if let Err(rejection) = check_source(&order.from, state.accounts.get(&order.from), &order.amt) {
            state.cancel_pending(order.transaction_id, &rejection.to_string());
            return Ok(SettlementOutcome::Rejected(rejection));
        }

        let mut accounts = state.accounts.clone();
        match accounts.get_mut(&order.from) {
            Some(source) if source.balance >= order.amt => {
                source.balance = &source.balance - &order.amt;
            }
            _ => {
                return Err(StoreError::Conflict(format!("debit of {} affected 0 rows", order.from)))
            }
        }

        if credit_fails {
            // Working copy with the debit applied is discarded.
            return Err(StoreError::Unavailable(format!(
                "credit to {} failed",
                order.fund
            )));
        }
        match accounts.get_mut(&order.fund) {
            Some(destination) => destination.balance = &destination.balance + &order.amt,
            None => {
                let rejection = Rejection::AccountNotFound {
                    leg: Leg::Fund,
                    account: order.fund.clone(),
                };
                state.cancel_pending(order.transaction_id, &rejection.to_string());
                return Ok(SettlementOutcome::Rejected(rejection));
            }
        }

        let init = TransactionInit {
            transaction_id: order.transaction_id,
            completed_at,
        };
        let payload = serde_json::to_string(&init).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        state.accounts = accounts;
        if let Some(tx) = state.transactions.get_mut(&order.transaction_id) {
            tx.completed_at = Some(completed_at);
            tx.system_notes = system_notes.to_string();
        }
        state.enqueue(topics::TRANSACTIONS, payload);
        Ok(SettlementOutcome::Settled(init))
    }

    async fn finalize(&self, transaction_id: Uuid) -> StoreResult<u64> {
        self.check_available()?;
        let mut state = self.state();
        match state.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.can_finalize() => {
                tx.status = TransactionStatus::Completed;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>> {
        self.check_available()?;
        Ok(self.state().transactions.get(&transaction_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryLedger {
    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        self.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()
            .outbox
            .values()
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: i64) -> StoreResult<()> {
        self.check_available()?;
        if let Some(event) = self.state().outbox.get_mut(&id) {
            event.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_publish_failure(&self, id: i64, error: &str) -> StoreResult<()> {
        self.check_available()?;
        if let Some(event) = self.state().outbox.get_mut(&id) {
            event.attempts += 1;
            event.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryLedger {
    async fn dead_letter(&self, entry: &DeadLetter) -> StoreResult<()> {
        self.check_available()?;
        self.state().dead_letters.push(entry.clone());
        Ok(())
    }

    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>> {
        self.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut entries = self.state().dead_letters.clone();
        entries.sort_by(|a, b| b.moved_to_dlq_at.cmp(&a.moved_to_dlq_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn requeue(&self, id: Uuid) -> StoreResult<bool> {
        self.check_available()?;
        let mut state = self.state();
        let Some(pos) = state.dead_letters.iter().position(|d| d.id == id) else {
            return Ok(false);
        };
        let entry = state.dead_letters.remove(pos);
        state.enqueue(&entry.topic, entry.payload);
        Ok(true)
    }
}
