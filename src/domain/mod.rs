//! Domain types for the transfer saga.
//! Framework-agnostic: no SQL, no HTTP, no broker types in here.

pub mod account;
pub mod order;
pub mod transaction;
pub mod validation;

pub use account::{AccountStatus, NewSubAccount, SubAccount};
pub use order::{ExchangeOrder, Order, TransactionInit};
pub use transaction::{Transaction, TransactionStatus};
pub use validation::{Leg, Rejection};
