//! Sub-account entity.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

/// A ledger-tracked balance holder. Transfers reference it by `account_number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubAccount {
    pub account_id: Uuid,
    pub account_number: String,
    #[schema(value_type = String)]
    pub balance: BigDecimal,
    pub status: AccountStatus,
    pub linked_accounts: Vec<String>,
    #[serde(skip_serializing, default)]
    pub credential: String,
}

impl SubAccount {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Request body for `POST /sub_account/new`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSubAccount {
    pub account_number: String,
    #[schema(value_type = String)]
    pub balance: BigDecimal,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
    #[serde(default)]
    pub linked_accounts: Vec<String>,
    #[serde(default)]
    pub credential: String,
}

fn default_status() -> AccountStatus {
    AccountStatus::Active
}

impl NewSubAccount {
    pub fn into_account(self) -> SubAccount {
        SubAccount {
            account_id: Uuid::new_v4(),
            account_number: self.account_number,
            balance: self.balance,
            status: self.status,
            linked_accounts: self.linked_accounts,
            credential: self.credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("active".parse::<AccountStatus>().unwrap(), AccountStatus::Active);
        assert_eq!(AccountStatus::Inactive.to_string(), "inactive");
        assert!("frozen".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn credential_is_never_serialized() {
        let account = NewSubAccount {
            account_number: "ACC-1".to_string(),
            balance: BigDecimal::from(10),
            status: AccountStatus::Active,
            linked_accounts: vec![],
            credential: "secret".to_string(),
        }
        .into_account();

        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("credential").is_none());
        assert_eq!(json["status"], "active");
    }
}
