//! Ledger transactions and postings
//!
//! A transaction is an immutable credit or debit on exactly one account.
//! Corrections are new transactions, never edits. Services describe what to
//! write as [`Posting`]s grouped into a [`PostingBatch`] that the store applies
//! all-or-nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::{AccountId, Money, TransactionId};

use crate::account::AccountType;
use crate::booking::StatusTransition;
use crate::category::RevenueCategory;
use crate::error::BillingError;
use crate::outbox::OutboxJob;
use crate::payment::PaymentMethod;

/// Credit (money in) or debit (money out)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(BillingError::validation(format!("unknown transaction type: {}", other))),
        }
    }
}

/// What a transaction was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    /// Recognized revenue of one category
    Revenue(RevenueCategory),
    /// Reversal of previously recognized revenue
    Refunds,
    /// Payment recorded on a guest's personal account
    PaymentReceived,
    /// Bill amount collected by a staff member
    StaffCollection,
    TransferIn,
    TransferOut,
    Deposit,
    Withdrawal,
    /// Signed correction of an earlier payment
    Adjustment,
    Expense,
}

impl TransactionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Revenue(c) => c.as_str(),
            TransactionCategory::Refunds => "refunds",
            TransactionCategory::PaymentReceived => "payment_received",
            TransactionCategory::StaffCollection => "staff_collection",
            TransactionCategory::TransferIn => "transfer_in",
            TransactionCategory::TransferOut => "transfer_out",
            TransactionCategory::Deposit => "deposit",
            TransactionCategory::Withdrawal => "withdrawal",
            TransactionCategory::Adjustment => "adjustment",
            TransactionCategory::Expense => "expense",
        }
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionCategory {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refunds" => Ok(TransactionCategory::Refunds),
            "payment_received" => Ok(TransactionCategory::PaymentReceived),
            "staff_collection" => Ok(TransactionCategory::StaffCollection),
            "transfer_in" => Ok(TransactionCategory::TransferIn),
            "transfer_out" => Ok(TransactionCategory::TransferOut),
            "deposit" => Ok(TransactionCategory::Deposit),
            "withdrawal" => Ok(TransactionCategory::Withdrawal),
            "adjustment" => Ok(TransactionCategory::Adjustment),
            "expense" => Ok(TransactionCategory::Expense),
            other => other
                .parse::<RevenueCategory>()
                .map(TransactionCategory::Revenue)
                .map_err(|_| BillingError::validation(format!("unknown transaction category: {}", other))),
        }
    }
}

/// Kind of record a transaction refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Booking,
    Invoice,
    Payment,
    Expense,
    Transfer,
    Adjustment,
    Refund,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Booking => "booking",
            ReferenceType::Invoice => "invoice",
            ReferenceType::Payment => "payment",
            ReferenceType::Expense => "expense",
            ReferenceType::Transfer => "transfer",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::Refund => "refund",
        }
    }
}

impl FromStr for ReferenceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking" => Ok(ReferenceType::Booking),
            "invoice" => Ok(ReferenceType::Invoice),
            "payment" => Ok(ReferenceType::Payment),
            "expense" => Ok(ReferenceType::Expense),
            "transfer" => Ok(ReferenceType::Transfer),
            "adjustment" => Ok(ReferenceType::Adjustment),
            "refund" => Ok(ReferenceType::Refund),
            other => Err(BillingError::validation(format!("unknown reference type: {}", other))),
        }
    }
}

/// Audit trail of a modification posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationAudit {
    pub original_amount: Money,
    pub reason: String,
}

/// An immutable ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    /// Revenue category this posting recognizes or reverses
    pub revenue_category: Option<RevenueCategory>,
    /// Always positive
    pub amount: Money,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<ReferenceType>,
    pub payment_method: Option<PaymentMethod>,
    pub processed_by: String,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub is_modification: bool,
    pub original_amount: Option<Money>,
    pub modification_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount with its effect on the balance: positive for credits
    pub fn signed_amount(&self) -> Money {
        match self.transaction_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => -self.amount,
        }
    }
}

/// What the store does when a debit would take an account below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverdraftPolicy {
    Allow,
    /// Reject only on restricted account types
    RejectIfRestricted,
    Reject,
}

impl OverdraftPolicy {
    /// Whether a debit may not take an account of `account_type` below zero
    pub fn guards(&self, account_type: AccountType) -> bool {
        match self {
            OverdraftPolicy::Allow => false,
            OverdraftPolicy::RejectIfRestricted => account_type.is_restricted(),
            OverdraftPolicy::Reject => true,
        }
    }
}

/// A transaction to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account_id: AccountId,
    pub transaction_type: TransactionType,
    pub category: TransactionCategory,
    pub revenue_category: Option<RevenueCategory>,
    pub amount: Money,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<ReferenceType>,
    pub payment_method: Option<PaymentMethod>,
    pub processed_by: String,
    pub notes: Option<String>,
    pub modification: Option<ModificationAudit>,
    pub overdraft: OverdraftPolicy,
}

impl Posting {
    fn new(
        account_id: AccountId,
        transaction_type: TransactionType,
        category: TransactionCategory,
        amount: Money,
        description: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        let revenue_category = match category {
            TransactionCategory::Revenue(c) => Some(c),
            _ => None,
        };
        Self {
            account_id,
            transaction_type,
            category,
            revenue_category,
            amount,
            description: description.into(),
            reference_id: None,
            reference_type: None,
            payment_method: None,
            processed_by: processed_by.into(),
            notes: None,
            modification: None,
            overdraft: OverdraftPolicy::RejectIfRestricted,
        }
    }

    pub fn credit(
        account_id: AccountId,
        amount: Money,
        category: TransactionCategory,
        description: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        Self::new(account_id, TransactionType::Credit, category, amount, description, processed_by)
    }

    pub fn debit(
        account_id: AccountId,
        amount: Money,
        category: TransactionCategory,
        description: impl Into<String>,
        processed_by: impl Into<String>,
    ) -> Self {
        Self::new(account_id, TransactionType::Debit, category, amount, description, processed_by)
    }

    pub fn with_reference(mut self, reference_type: ReferenceType, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type);
        self.reference_id = Some(reference_id);
        self
    }

    pub fn with_revenue_category(mut self, category: RevenueCategory) -> Self {
        self.revenue_category = Some(category);
        self
    }

    pub fn with_payment_method(mut self, method: Option<PaymentMethod>) -> Self {
        self.payment_method = method;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_modification(mut self, original_amount: Money, reason: impl Into<String>) -> Self {
        self.modification = Some(ModificationAudit {
            original_amount,
            reason: reason.into(),
        });
        self
    }

    pub fn with_overdraft(mut self, policy: OverdraftPolicy) -> Self {
        self.overdraft = policy;
        self
    }

    /// Amount with its effect on the balance: positive for credits
    pub fn signed_amount(&self) -> Money {
        match self.transaction_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => -self.amount,
        }
    }

    /// Materializes the posting as a stored transaction
    pub fn into_transaction(self, transaction_date: DateTime<Utc>) -> Transaction {
        let (is_modification, original_amount, modification_reason) = match self.modification {
            Some(audit) => (true, Some(audit.original_amount), Some(audit.reason)),
            None => (false, None, None),
        };
        Transaction {
            id: TransactionId::new_v7(),
            account_id: self.account_id,
            transaction_type: self.transaction_type,
            category: self.category,
            revenue_category: self.revenue_category,
            amount: self.amount,
            description: self.description,
            reference_id: self.reference_id,
            reference_type: self.reference_type,
            payment_method: self.payment_method,
            processed_by: self.processed_by,
            notes: self.notes,
            transaction_date,
            is_modification,
            original_amount,
            modification_reason,
            created_at: transaction_date,
        }
    }
}

/// Postings, outbox jobs and an optional booking status change committed as
/// one atomic unit
#[derive(Debug, Clone)]
pub struct PostingBatch {
    pub postings: Vec<Posting>,
    pub jobs: Vec<OutboxJob>,
    pub status: Option<StatusTransition>,
    pub transaction_date: DateTime<Utc>,
}

impl PostingBatch {
    pub fn new(transaction_date: DateTime<Utc>) -> Self {
        Self {
            postings: Vec::new(),
            jobs: Vec::new(),
            status: None,
            transaction_date,
        }
    }

    pub fn post(mut self, posting: Posting) -> Self {
        self.postings.push(posting);
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<OutboxJob>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    pub fn with_status_transition(mut self, transition: StatusTransition) -> Self {
        self.status = Some(transition);
        self
    }

    /// Every amount strictly positive and in one currency. A batch without
    /// postings must at least carry a status transition.
    pub fn validate(&self) -> Result<(), BillingError> {
        let Some(first) = self.postings.first() else {
            if self.status.is_some() {
                return Ok(());
            }
            return Err(BillingError::validation("empty posting batch"));
        };
        let currency = first.amount.currency();
        for posting in &self.postings {
            if !posting.amount.is_positive() {
                return Err(BillingError::validation(format!(
                    "posting amount must be positive, got {}",
                    posting.amount
                )));
            }
            if posting.amount.currency() != currency {
                return Err(BillingError::validation("mixed currencies in one batch"));
            }
        }
        Ok(())
    }

    /// Touched accounts in ascending id order, each once
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.postings.iter().map(|p| p.account_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_overdraft_guards() {
        assert!(!OverdraftPolicy::Allow.guards(AccountType::Savings));
        assert!(OverdraftPolicy::RejectIfRestricted.guards(AccountType::Savings));
        assert!(!OverdraftPolicy::RejectIfRestricted.guards(AccountType::Current));
        assert!(OverdraftPolicy::Reject.guards(AccountType::Main));
    }

    #[test]
    fn test_revenue_posting_carries_category() {
        let p = Posting::credit(
            AccountId::new(),
            Money::new(dec!(100), Currency::INR),
            TransactionCategory::Revenue(RevenueCategory::Spa),
            "Spa revenue",
            "system",
        );
        assert_eq!(p.revenue_category, Some(RevenueCategory::Spa));
        assert_eq!(p.signed_amount().amount(), dec!(100));
    }

    #[test]
    fn test_modification_audit_lands_on_transaction() {
        let txn = Posting::debit(
            AccountId::new(),
            Money::new(dec!(40), Currency::INR),
            TransactionCategory::Adjustment,
            "Payment corrected",
            "frontdesk",
        )
        .with_modification(Money::new(dec!(140), Currency::INR), "typo")
        .into_transaction(Utc::now());
        assert!(txn.is_modification);
        assert_eq!(txn.original_amount.unwrap().amount(), dec!(140));
        assert_eq!(txn.signed_amount().amount(), dec!(-40));
    }

    #[test]
    fn test_batch_rejects_non_positive_amounts() {
        let batch = PostingBatch::new(Utc::now()).post(Posting::credit(
            AccountId::new(),
            Money::zero(Currency::INR),
            TransactionCategory::Deposit,
            "nothing",
            "system",
        ));
        assert!(batch.validate().is_err());
        assert!(PostingBatch::new(Utc::now()).validate().is_err());
    }

    #[test]
    fn test_status_only_batch_is_valid() {
        use crate::booking::BookingPaymentStatus;
        use core_kernel::BookingId;

        let transition = StatusTransition::new(
            BookingId::new(),
            BookingPaymentStatus::PartiallyPaid,
            BookingPaymentStatus::Paid,
        );
        let batch = PostingBatch::new(Utc::now()).with_status_transition(transition);
        assert!(batch.validate().is_ok());
        assert!(batch.account_ids().is_empty());
    }

    #[test]
    fn test_category_string_round_trip() {
        let categories = [
            TransactionCategory::Revenue(RevenueCategory::FoodBeverage),
            TransactionCategory::Refunds,
            TransactionCategory::TransferOut,
            TransactionCategory::Adjustment,
        ];
        for c in categories {
            assert_eq!(c.as_str().parse::<TransactionCategory>().unwrap(), c);
        }
    }

    #[test]
    fn test_account_ids_sorted_and_unique() {
        let a = AccountId::from_uuid(Uuid::from_u128(2));
        let b = AccountId::from_uuid(Uuid::from_u128(1));
        let m = Money::new(dec!(1), Currency::INR);
        let batch = PostingBatch::new(Utc::now())
            .post(Posting::credit(a, m, TransactionCategory::Deposit, "", "t"))
            .post(Posting::debit(b, m, TransactionCategory::Withdrawal, "", "t"))
            .post(Posting::credit(a, m, TransactionCategory::Deposit, "", "t"));
        assert_eq!(batch.account_ids(), vec![b, a]);
    }
}
