//! Ledger accounts
//!
//! An account is a named balance bucket: the single main hotel account, or a
//! personal account owned by a staff member or guest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{AccountId, Currency, Money, UserId};

use crate::error::BillingError;

/// Types of ledger accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// The hotel's main revenue account
    Main,
    Current,
    /// Restricted: may never go negative
    Savings,
    PettyCash,
    /// Per-person account of a staff member or guest
    Personal,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Main => "main",
            AccountType::Current => "current",
            AccountType::Savings => "savings",
            AccountType::PettyCash => "petty_cash",
            AccountType::Personal => "personal",
        }
    }

    /// Restricted accounts reject any debit that would leave them below zero
    pub fn is_restricted(&self) -> bool {
        matches!(self, AccountType::Savings)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(AccountType::Main),
            "current" => Ok(AccountType::Current),
            "savings" => Ok(AccountType::Savings),
            "petty_cash" => Ok(AccountType::PettyCash),
            "personal" => Ok(AccountType::Personal),
            other => Err(BillingError::validation(format!("unknown account type: {}", other))),
        }
    }
}

/// A ledger account
///
/// `balance` always equals the sum of its credits minus the sum of its debits.
/// Only the store changes it, together with the transaction rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Money,
    pub owner_user_id: Option<UserId>,
    pub is_main_account: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// The main hotel account with zero balance
    pub fn main(name: impl Into<String>, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new_v7(),
            name: name.into(),
            account_type: AccountType::Main,
            balance: Money::zero(currency),
            owner_user_id: None,
            is_main_account: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// A personal account for `owner` with zero balance
    pub fn personal(owner: UserId, name: impl Into<String>, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new_v7(),
            name: name.into(),
            account_type: AccountType::Personal,
            balance: Money::zero(currency),
            owner_user_id: Some(owner),
            is_main_account: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// A plain account of the given type
    pub fn new(name: impl Into<String>, account_type: AccountType, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new_v7(),
            name: name.into(),
            account_type,
            balance: Money::zero(currency),
            owner_user_id: None,
            is_main_account: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Balance view returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub name: String,
    pub account_type: AccountType,
    pub owner_user_id: Option<UserId>,
    pub is_main_account: bool,
    pub balance: Money,
}

impl From<&Account> for AccountBalance {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            name: account.name.clone(),
            account_type: account.account_type,
            owner_user_id: account.owner_user_id,
            is_main_account: account.is_main_account,
            balance: account.balance,
        }
    }
}

/// A user known to the application, used to resolve account owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
}

/// How a staff member is identified when crediting a bill to them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffRef {
    /// Stable id captured when the money was collected
    Id(UserId),
    /// Free-text name; must match exactly one active user
    Name(String),
}

impl fmt::Display for StaffRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaffRef::Id(id) => write!(f, "{}", id),
            StaffRef::Name(name) => write!(f, "{}", name),
        }
    }
}
