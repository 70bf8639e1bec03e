//! Multi-account ledger
//!
//! The ledger keeps one main hotel account plus optional personal accounts for
//! staff and guests. Every balance change is a [`Transaction`]; services never
//! write balances. Postings are grouped into a [`PostingBatch`] and committed
//! all-or-nothing by the store, which serializes concurrent writers per account.
//!
//! Revenue recognized for a booking is posted on the main account as one credit
//! per non-zero revenue category. A reversal debits exactly what was recognized,
//! read back from those postings rather than re-derived from the current bill.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use core_kernel::{AccountId, BookingId, DateRange, Money, UserId};

use crate::account::{Account, AccountBalance, StaffRef, UserRef};
use crate::booking::StatusTransition;
use crate::category::{CategoryRevenue, RevenueCategory};
use crate::error::BillingError;
use crate::outbox::OutboxJob;
use crate::payment::PaymentMethod;
use crate::ports::{bounded, retry_on_conflict, BillingPorts, LedgerCommitError};
use crate::settings::BillingSettings;
use crate::transaction::{
    OverdraftPolicy, Posting, PostingBatch, ReferenceType, Transaction, TransactionCategory, TransactionType,
};

/// Identity recorded on postings made by the system itself
pub const SYSTEM_USER: &str = "system";

/// Result of crediting a collected bill to a staff member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffCredit {
    pub reference: String,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub transaction: Transaction,
}

/// Transactions of one account with running totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub account: AccountBalance,
    pub range: Option<DateRange>,
    /// Balance before the first listed transaction
    pub opening_balance: Money,
    pub total_credits: Money,
    pub total_debits: Money,
    /// Balance after the last listed transaction
    pub closing_balance: Money,
    pub transactions: Vec<Transaction>,
}

/// Stored balance compared with the sum of an account's transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub stored_balance: Money,
    pub computed_balance: Money,
    pub difference: Money,
    pub transaction_count: usize,
    pub is_balanced: bool,
}

/// Generates a staff collection reference: `STF-YYYYMMDD-XXXXXXXX`
pub fn staff_reference(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("STF-{}-{}", at.format("%Y%m%d"), suffix)
}

/// Ledger operations over the account and transaction ports
#[derive(Clone)]
pub struct LedgerService {
    ports: BillingPorts,
    settings: BillingSettings,
}

impl LedgerService {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self { ports, settings }
    }

    /// Returns the active main account, creating it with zero balance if absent
    pub async fn get_or_create_main_account(&self) -> Result<Account, BillingError> {
        let candidate = Account::main(&self.settings.main_account_name, self.settings.currency, Utc::now());
        bounded(
            self.settings.operation_timeout,
            "ensure_main_account",
            self.ports.ledger.ensure_main_account(&candidate),
        )
        .await
    }

    /// Returns the user's active personal account, creating it if absent
    ///
    /// # Errors
    ///
    /// `BillingError::NotFound` when the user does not exist
    #[instrument(skip(self))]
    pub async fn get_or_create_user_account(&self, user_id: UserId) -> Result<Account, BillingError> {
        let user = self.user(user_id).await?;
        self.ensure_user_account(&user).await
    }

    async fn ensure_user_account(&self, user: &UserRef) -> Result<Account, BillingError> {
        let candidate = Account::personal(
            user.id,
            format!("{} Account", user.name),
            self.settings.currency,
            Utc::now(),
        );
        bounded(
            self.settings.operation_timeout,
            "ensure_user_account",
            self.ports.ledger.ensure_user_account(&candidate),
        )
        .await
    }

    async fn user(&self, user_id: UserId) -> Result<UserRef, BillingError> {
        bounded(self.settings.operation_timeout, "get_user", self.ports.users.get_user(user_id)).await
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, BillingError> {
        bounded(
            self.settings.operation_timeout,
            "get_account",
            self.ports.ledger.get_account(account_id),
        )
        .await
    }

    /// Commits a batch, retrying store conflicts
    ///
    /// A stale booking status is not retried: the batch was built from a
    /// status that no longer holds.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for an empty or mixed-currency batch
    /// - `BillingError::InsufficientFunds` when a guarded debit would overdraw
    /// - `BillingError::Conflict` when the booking status moved on, or store
    ///   conflicts outlast `max_conflict_retries`
    pub async fn commit(&self, batch: PostingBatch) -> Result<Vec<Transaction>, BillingError> {
        batch.validate()?;
        let limit = self.settings.operation_timeout;
        let ledger = self.ports.ledger.clone();
        let outcome = retry_on_conflict(self.settings.max_conflict_retries, "commit_batch", || {
            let ledger = ledger.clone();
            let batch = batch.clone();
            async move {
                let attempt = async move {
                    match ledger.commit_batch(batch).await {
                        Err(stale @ LedgerCommitError::StaleStatus { .. }) => Ok(Err(stale)),
                        other => other.map(Ok),
                    }
                };
                bounded(limit, "commit_batch", attempt).await
            }
        })
        .await?;
        let transactions = outcome.map_err(|stale| {
            warn!(error = %stale, "posting batch rejected on stale booking status");
            BillingError::from(stale)
        })?;
        if let Some(transition) = &batch.status {
            info!(
                booking_id = %transition.booking_id,
                from = %transition.expected,
                to = %transition.next,
                "booking payment status changed"
            );
        }
        for txn in &transactions {
            info!(
                account_id = %txn.account_id,
                kind = txn.transaction_type.as_str(),
                category = %txn.category,
                amount = %txn.amount,
                "posted"
            );
        }
        Ok(transactions)
    }

    /// Posts a single transaction atomically with its balance change
    ///
    /// # Errors
    ///
    /// As [`LedgerService::commit`]
    pub async fn post_transaction(&self, posting: Posting) -> Result<Transaction, BillingError> {
        let batch = PostingBatch::new(Utc::now()).post(posting);
        self.commit(batch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::Internal("store returned no transaction".into()))
    }

    /// Recognizes a paid booking's revenue
    ///
    /// Credits the main account once per non-zero category and, when the guest
    /// has a personal account, records the payment there too. `jobs` and the
    /// booking's `transition` into `paid` are committed in the same unit. A
    /// breakdown smaller than `total_amount` has its remainder posted as
    /// `other`; a larger one is rejected.
    ///
    /// # Arguments
    ///
    /// * `breakdown` - Revenue per category; must not exceed `total_amount`
    /// * `guest_user_id` - Guest whose personal account, if any, also records the payment
    /// * `jobs` - Report jobs enqueued with the postings
    /// * `transition` - Booking status compare-and-set applied with the postings
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for a non-positive total or an oversized breakdown
    /// - `BillingError::Conflict` when `transition` no longer matches the booking
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, breakdown, jobs, transition), fields(total = %total_amount))]
    pub async fn process_payment_revenue(
        &self,
        booking_id: BookingId,
        total_amount: Money,
        breakdown: &CategoryRevenue,
        method: Option<PaymentMethod>,
        processed_by: &str,
        guest_user_id: Option<UserId>,
        jobs: Vec<OutboxJob>,
        transition: Option<StatusTransition>,
    ) -> Result<Vec<Transaction>, BillingError> {
        if !total_amount.is_positive() {
            return Err(BillingError::validation("revenue total must be positive"));
        }
        let mut breakdown = *breakdown;
        let allocated = breakdown.total();
        let remainder = total_amount.checked_sub(&allocated)?;
        if remainder.is_negative() {
            return Err(BillingError::validation(format!(
                "category breakdown {} exceeds revenue total {}",
                allocated, total_amount
            )));
        }
        if !remainder.is_zero() {
            warn!(%remainder, "unallocated revenue posted as other");
            breakdown.add(RevenueCategory::Other, remainder)?;
        }

        let main = self.get_or_create_main_account().await?;
        let mut batch = PostingBatch::new(Utc::now()).with_jobs(jobs);
        if let Some(transition) = transition {
            batch = batch.with_status_transition(transition);
        }
        for (category, amount) in breakdown.non_zero() {
            batch = batch.post(
                Posting::credit(
                    main.id,
                    amount,
                    TransactionCategory::Revenue(category),
                    format!("Booking revenue - {}", category),
                    processed_by,
                )
                .with_reference(ReferenceType::Booking, *booking_id.as_uuid())
                .with_payment_method(method),
            );
        }

        if let Some(user_id) = guest_user_id {
            let guest_account = bounded(
                self.settings.operation_timeout,
                "find_user_account",
                self.ports.ledger.find_user_account(user_id),
            )
            .await?;
            if let Some(account) = guest_account {
                batch = batch.post(
                    Posting::credit(
                        account.id,
                        total_amount,
                        TransactionCategory::PaymentReceived,
                        "Booking payment",
                        processed_by,
                    )
                    .with_reference(ReferenceType::Booking, *booking_id.as_uuid())
                    .with_payment_method(method),
                );
            }
        }

        self.commit(batch).await
    }

    /// Debits the main account with the mirror of recognized revenue
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` when `breakdown` does not sum to `total_amount`
    /// - `BillingError::Conflict` when `transition` no longer matches the booking
    #[instrument(skip(self, breakdown, jobs, transition), fields(total = %total_amount))]
    pub async fn reverse_payment_revenue(
        &self,
        booking_id: BookingId,
        total_amount: Money,
        breakdown: &CategoryRevenue,
        processed_by: &str,
        jobs: Vec<OutboxJob>,
        transition: Option<StatusTransition>,
    ) -> Result<Vec<Transaction>, BillingError> {
        if breakdown.total() != total_amount {
            return Err(BillingError::validation(format!(
                "reversal breakdown {} does not match total {}",
                breakdown.total(),
                total_amount
            )));
        }
        let main = self.get_or_create_main_account().await?;
        let mut batch = PostingBatch::new(Utc::now()).with_jobs(jobs);
        if let Some(transition) = transition {
            batch = batch.with_status_transition(transition);
        }
        for (category, amount) in breakdown.non_zero() {
            batch = batch.post(
                Posting::debit(
                    main.id,
                    amount,
                    TransactionCategory::Refunds,
                    format!("Revenue reversal - {}", category),
                    processed_by,
                )
                .with_revenue_category(category)
                .with_reference(ReferenceType::Booking, *booking_id.as_uuid()),
            );
        }
        self.commit(batch).await
    }

    /// Posts the signed difference of a corrected payment
    ///
    /// No-op when the amounts are equal. The posting lands on the main account
    /// and, if present, the guest's personal account, with the original amount
    /// and reason kept for audit.
    ///
    /// # Errors
    ///
    /// `BillingError::Validation` when the amounts differ in currency; otherwise
    /// as [`LedgerService::commit`]
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, reason, jobs))]
    pub async fn process_payment_modification(
        &self,
        booking_id: BookingId,
        original_amount: Money,
        new_amount: Money,
        reason: &str,
        processed_by: &str,
        guest_user_id: Option<UserId>,
        jobs: Vec<OutboxJob>,
    ) -> Result<Vec<Transaction>, BillingError> {
        let delta = new_amount.checked_sub(&original_amount)?;
        if delta.is_zero() {
            return Ok(Vec::new());
        }
        let magnitude = delta.abs();
        let posting = |account_id: AccountId, description: &str| {
            let base = if delta.is_positive() {
                Posting::credit(account_id, magnitude, TransactionCategory::Adjustment, description, processed_by)
            } else {
                Posting::debit(account_id, magnitude, TransactionCategory::Adjustment, description, processed_by)
            };
            base.with_reference(ReferenceType::Booking, *booking_id.as_uuid())
                .with_modification(original_amount, reason)
                .with_overdraft(OverdraftPolicy::Allow)
        };

        let main = self.get_or_create_main_account().await?;
        let mut batch = PostingBatch::new(Utc::now())
            .with_jobs(jobs)
            .post(posting(main.id, "Payment modification"));
        if let Some(user_id) = guest_user_id {
            let guest_account = bounded(
                self.settings.operation_timeout,
                "find_user_account",
                self.ports.ledger.find_user_account(user_id),
            )
            .await?;
            if let Some(account) = guest_account {
                batch = batch.post(posting(account.id, "Payment modification"));
            }
        }
        self.commit(batch).await
    }

    /// Moves money between two accounts; both sides or neither
    ///
    /// # Arguments
    ///
    /// * `from` - Account debited; its balance may not go negative
    /// * `to` - Account credited
    /// * `amount` - Positive amount in the accounts' currency
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for a self-transfer or a non-positive amount
    /// - `BillingError::NotFound` when either account is missing or inactive
    /// - `BillingError::InsufficientFunds` when `from` cannot cover `amount`
    #[instrument(skip(self, description))]
    pub async fn transfer_between_accounts(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
        description: &str,
        processed_by: &str,
    ) -> Result<Vec<Transaction>, BillingError> {
        if from == to {
            return Err(BillingError::validation("cannot transfer to the same account"));
        }
        if !amount.is_positive() {
            return Err(BillingError::validation("transfer amount must be positive"));
        }
        let source = self.account(from).await?;
        let target = self.account(to).await?;
        let transfer_id = Uuid::now_v7();
        let batch = PostingBatch::new(Utc::now())
            .post(
                Posting::debit(
                    source.id,
                    amount,
                    TransactionCategory::TransferOut,
                    format!("Transfer to {}: {}", target.name, description),
                    processed_by,
                )
                .with_reference(ReferenceType::Transfer, transfer_id)
                .with_overdraft(OverdraftPolicy::Reject),
            )
            .post(
                Posting::credit(
                    target.id,
                    amount,
                    TransactionCategory::TransferIn,
                    format!("Transfer from {}: {}", source.name, description),
                    processed_by,
                )
                .with_reference(ReferenceType::Transfer, transfer_id),
            );
        self.commit(batch).await
    }

    /// Credits a collected bill to the staff member who collected it
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for a non-positive amount, or a name shared
    ///   by several active users
    /// - `BillingError::NotFound` when no user matches `staff`
    #[instrument(skip(self, staff, reference), fields(staff = %staff))]
    pub async fn credit_bill_to_staff(
        &self,
        amount: Money,
        staff: StaffRef,
        booking_id: BookingId,
        method: Option<PaymentMethod>,
        reference: Option<String>,
    ) -> Result<StaffCredit, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation("credited amount must be positive"));
        }
        let user = match staff {
            StaffRef::Id(id) => self.user(id).await?,
            StaffRef::Name(name) => {
                let mut matches = bounded(
                    self.settings.operation_timeout,
                    "find_users_by_name",
                    self.ports.users.find_users_by_name(&name),
                )
                .await?;
                match matches.len() {
                    0 => return Err(BillingError::not_found("User", name)),
                    1 => matches.remove(0),
                    n => {
                        return Err(BillingError::validation(format!(
                            "staff name '{}' matches {} users; identify the staff member by id",
                            name, n
                        )))
                    }
                }
            }
        };
        let account = self.ensure_user_account(&user).await?;
        let now = Utc::now();
        let reference = reference.unwrap_or_else(|| staff_reference(now));
        let transaction = self
            .post_transaction(
                Posting::credit(
                    account.id,
                    amount,
                    TransactionCategory::StaffCollection,
                    format!("Bill collected for booking {}", booking_id),
                    user.name.as_str(),
                )
                .with_reference(ReferenceType::Booking, *booking_id.as_uuid())
                .with_payment_method(method)
                .with_notes(Some(format!("Reference: {}", reference))),
            )
            .await?;
        Ok(StaffCredit {
            reference,
            account_id: account.id,
            user_id: user.id,
            transaction,
        })
    }

    /// Staff-initiated credit
    pub async fn manual_deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
        processed_by: &str,
    ) -> Result<Transaction, BillingError> {
        self.post_transaction(Posting::credit(
            account_id,
            amount,
            TransactionCategory::Deposit,
            description,
            processed_by,
        ))
        .await
    }

    /// Staff-initiated debit; never takes the account below zero
    ///
    /// # Errors
    ///
    /// `BillingError::InsufficientFunds` when the balance does not cover `amount`
    pub async fn manual_withdrawal(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
        processed_by: &str,
    ) -> Result<Transaction, BillingError> {
        self.post_transaction(
            Posting::debit(
                account_id,
                amount,
                TransactionCategory::Withdrawal,
                description,
                processed_by,
            )
            .with_overdraft(OverdraftPolicy::Reject),
        )
        .await
    }

    /// Balances of every active account, main account first
    pub async fn get_all_account_balances(&self) -> Result<Vec<AccountBalance>, BillingError> {
        let mut accounts = bounded(
            self.settings.operation_timeout,
            "list_accounts",
            self.ports.ledger.list_accounts(true),
        )
        .await?;
        accounts.sort_by(|a, b| {
            b.is_main_account
                .cmp(&a.is_main_account)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(accounts.iter().map(AccountBalance::from).collect())
    }

    /// Balance of a user's personal account; `None` if they have none yet
    pub async fn get_user_account_balance(&self, user_id: UserId) -> Result<Option<AccountBalance>, BillingError> {
        self.user(user_id).await?;
        let account = bounded(
            self.settings.operation_timeout,
            "find_user_account",
            self.ports.ledger.find_user_account(user_id),
        )
        .await?;
        Ok(account.as_ref().map(AccountBalance::from))
    }

    /// Transactions of an account, optionally limited to local dates in `range`
    pub async fn account_statement(
        &self,
        account_id: AccountId,
        range: Option<DateRange>,
    ) -> Result<AccountStatement, BillingError> {
        let account = self.account(account_id).await?;
        let all = bounded(
            self.settings.operation_timeout,
            "account_transactions",
            self.ports.ledger.account_transactions(account_id),
        )
        .await?;
        let currency = account.balance.currency();
        let tz = &self.settings.timezone;

        let mut opening_balance = Money::zero(currency);
        let mut total_credits = Money::zero(currency);
        let mut total_debits = Money::zero(currency);
        let mut transactions = Vec::new();
        for txn in all {
            let date = tz.local_date(txn.transaction_date);
            match range {
                Some(r) if date < r.start => {
                    opening_balance = opening_balance.checked_add(&txn.signed_amount())?;
                    continue;
                }
                Some(r) if date > r.end => continue,
                _ => {}
            }
            match txn.transaction_type {
                TransactionType::Credit => total_credits = total_credits.checked_add(&txn.amount)?,
                TransactionType::Debit => total_debits = total_debits.checked_add(&txn.amount)?,
            }
            transactions.push(txn);
        }
        let closing_balance = opening_balance
            .checked_add(&total_credits)?
            .checked_sub(&total_debits)?;
        Ok(AccountStatement {
            account: AccountBalance::from(&account),
            range,
            opening_balance,
            total_credits,
            total_debits,
            closing_balance,
            transactions,
        })
    }

    /// Net revenue recognized for a booking on the main account, per category
    pub async fn recognized_revenue(&self, booking_id: BookingId) -> Result<CategoryRevenue, BillingError> {
        let limit = self.settings.operation_timeout;
        let mut recognized = CategoryRevenue::zero(self.settings.currency);
        let main = bounded(limit, "find_main_account", self.ports.ledger.find_main_account()).await?;
        let Some(main) = main else {
            return Ok(recognized);
        };
        let transactions = bounded(
            limit,
            "reference_transactions",
            self.ports.ledger.reference_transactions(main.id, *booking_id.as_uuid()),
        )
        .await?;
        for txn in transactions {
            if let Some(category) = txn.revenue_category {
                recognized.add(category, txn.signed_amount())?;
            }
        }
        for category in RevenueCategory::ALL {
            let slot = recognized.get_mut(category);
            if slot.is_negative() {
                warn!(%category, amount = %slot, "more revenue reversed than recognized");
                *slot = Money::zero(slot.currency());
            }
        }
        Ok(recognized)
    }

    /// Audits the balance invariant of one account
    ///
    /// A mismatch is reported in the returned [`Reconciliation`], not as an error.
    ///
    /// # Errors
    ///
    /// `BillingError::NotFound` when the account does not exist
    #[instrument(skip(self))]
    pub async fn reconcile_account(&self, account_id: AccountId) -> Result<Reconciliation, BillingError> {
        let account = self.account(account_id).await?;
        let transactions = bounded(
            self.settings.operation_timeout,
            "account_transactions",
            self.ports.ledger.account_transactions(account_id),
        )
        .await?;
        let mut computed_balance = Money::zero(account.balance.currency());
        for txn in &transactions {
            computed_balance = computed_balance.checked_add(&txn.signed_amount())?;
        }
        let difference = account.balance.checked_sub(&computed_balance)?;
        let is_balanced = difference.is_zero();
        if !is_balanced {
            warn!(stored = %account.balance, computed = %computed_balance, "account balance drifted");
        }
        Ok(Reconciliation {
            account_id,
            stored_balance: account.balance,
            computed_balance,
            difference,
            transaction_count: transactions.len(),
            is_balanced,
        })
    }
}
