//! Business-rule checks shared by intake and settlement.

use bigdecimal::BigDecimal;
use std::fmt;
use thiserror::Error;

use super::account::SubAccount;

/// Which side of a transfer an account plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    From,
    Fund,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::From => f.write_str("From"),
            Leg::Fund => f.write_str("Fund"),
        }
    }
}

/// A transfer refused by a business rule. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Sub account information invalid. Type: {leg}, Number: {account}")]
    AccountNotFound { leg: Leg, account: String },

    #[error("Sub account status is inactive. Type: {leg}, Number: {account}")]
    AccountInactive { leg: Leg, account: String },

    #[error("Insufficient amount in sub account. Type: {leg}, Number: {account}")]
    InsufficientFunds { leg: Leg, account: String },
}

/// Destination leg: must exist and be active. The amount is not checked.
pub fn check_destination(account_number: &str, account: Option<&SubAccount>) -> Result<(), Rejection> {
    check_exists_and_active(Leg::Fund, account_number, account).map(|_| ())
}

/// Source leg: must exist, be active and hold at least `amt`.
pub fn check_source(
    account_number: &str,
    account: Option<&SubAccount>,
    amt: &BigDecimal,
) -> Result<(), Rejection> {
    let account = check_exists_and_active(Leg::From, account_number, account)?;
    if &account.balance < amt {
        return Err(Rejection::InsufficientFunds {
            leg: Leg::From,
            account: account_number.to_string(),
        });
    }
    Ok(())
}

fn check_exists_and_active<'a>(
    leg: Leg,
    account_number: &str,
    account: Option<&'a SubAccount>,
) -> Result<&'a SubAccount, Rejection> {
    let account = account.ok_or_else(|| Rejection::AccountNotFound {
        leg,
        account: account_number.to_string(),
    })?;
    if !account.is_active() {
        return Err(Rejection::AccountInactive {
            leg,
            account: account_number.to_string(),
        });
    }
    Ok(account)
}
