//! Ledger repository implementation
//!
//! This module provides database access for the hotel's internal accounts and
//! their transactions. Balances are stored on the account row and changed only
//! by [`LedgerRepository::commit_batch`], which writes the transactions and the
//! new balances in one database transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use core_kernel::{AccountId, Money, PortError, TransactionId, UserId};
use domain_billing::{Account, LedgerCommitError, PostingBatch, Transaction, TransactionType};

use super::bookings::{BookingRepository, TransitionOutcome};
use super::outbox::OutboxRepository;
use super::{currency, money, optional_money, parse_column, parse_optional};
use crate::error::DatabaseError;

const ACCOUNT_COLUMNS: &str = r#"
    account_id, name, account_type, balance, currency, owner_user_id,
    is_main_account, is_active, created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, account_id, transaction_type, category, revenue_category, amount, currency,
    description, reference_id, reference_type, payment_method, processed_by, notes,
    transaction_date, is_modification, original_amount, modification_reason, created_at
"#;

/// Database row for an account
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub name: String,
    pub account_type: String,
    pub balance: Decimal,
    pub currency: String,
    pub owner_user_id: Option<Uuid>,
    pub is_main_account: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = DatabaseError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::from(row.account_id),
            name: row.name,
            account_type: parse_column("account_type", &row.account_type)?,
            balance: money(row.balance, currency(&row.currency)?),
            owner_user_id: row.owner_user_id.map(UserId::from),
            is_main_account: row.is_main_account,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for a ledger transaction
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: String,
    pub category: String,
    pub revenue_category: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub payment_method: Option<String>,
    pub processed_by: String,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub is_modification: bool,
    pub original_amount: Option<Decimal>,
    pub modification_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let ccy = currency(&row.currency)?;
        Ok(Transaction {
            id: TransactionId::from(row.transaction_id),
            account_id: AccountId::from(row.account_id),
            transaction_type: parse_column("transaction_type", &row.transaction_type)?,
            category: parse_column("category", &row.category)?,
            revenue_category: parse_optional("revenue_category", row.revenue_category.as_deref())?,
            amount: money(row.amount, ccy),
            description: row.description,
            reference_id: row.reference_id,
            reference_type: parse_optional("reference_type", row.reference_type.as_deref())?,
            payment_method: parse_optional("payment_method", row.payment_method.as_deref())?,
            processed_by: row.processed_by,
            notes: row.notes,
            transaction_date: row.transaction_date,
            is_modification: row.is_modification,
            original_amount: optional_money(row.original_amount, ccy),
            modification_reason: row.modification_reason,
            created_at: row.created_at,
        })
    }
}

fn commit_error(e: impl Into<DatabaseError>) -> LedgerCommitError {
    LedgerCommitError::Port(PortError::from(e.into()))
}

/// Repository for accounts and their transactions
///
/// The LedgerRepository keeps every balance equal to the signed sum of its
/// account's transactions by changing both in the same database transaction.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository with the given connection pool
    ///
    /// # Arguments
    ///
    /// * `pool` - The PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_account(conn: &mut PgConnection, account: &Account, on_conflict: &str) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) {on_conflict}"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(account.id))
            .bind(&account.name)
            .bind(account.account_type.as_str())
            .bind(account.balance.amount())
            .bind(account.balance.currency().code())
            .bind(account.owner_user_id.map(Uuid::from))
            .bind(account.is_main_account)
            .bind(account.is_active)
            .bind(account.created_at)
            .bind(account.updated_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Inserts an account
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::DuplicateEntry` when it would be a second active
    /// main account or a second active account of the same owner
    pub async fn create_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_account(&mut conn, account, "").await
    }

    /// Returns the active main account, inserting `candidate` if there is none
    ///
    /// Concurrent callers all get the same account: the partial unique index
    /// on active main accounts lets only one insert through.
    pub async fn ensure_main_account(&self, candidate: &Account) -> Result<Account, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_account(
            &mut conn,
            candidate,
            "ON CONFLICT (is_main_account) WHERE is_main_account AND is_active DO NOTHING",
        )
        .await?;
        self.find_main_account()
            .await?
            .ok_or_else(|| DatabaseError::not_found("Account", "main"))
    }

    /// Returns the owner's active account, inserting `candidate` if there is none
    pub async fn ensure_user_account(&self, candidate: &Account) -> Result<Account, DatabaseError> {
        let owner = candidate
            .owner_user_id
            .ok_or_else(|| DatabaseError::ConstraintViolation("personal account needs an owner".to_string()))?;
        let mut conn = self.pool.acquire().await?;
        Self::insert_account(
            &mut conn,
            candidate,
            "ON CONFLICT (owner_user_id) WHERE owner_user_id IS NOT NULL AND is_active DO NOTHING",
        )
        .await?;
        self.find_user_account(owner)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Account", owner))
    }

    pub async fn find_main_account(&self) -> Result<Option<Account>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_main_account AND is_active");
        sqlx::query_as::<_, AccountRow>(&sql)
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    pub async fn find_user_account(&self, user_id: UserId) -> Result<Option<Account>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_user_id = $1 AND is_active");
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1");
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Account", id))?
            .try_into()
    }

    pub async fn list_accounts(&self, active_only: bool) -> Result<Vec<Account>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_active OR NOT $1 ORDER BY account_id");
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    /// Applies a posting batch atomically
    ///
    /// Applies the batch's booking status transition first, which holds the
    /// booking row until commit. Then locks every touched account in ascending
    /// id order, checks each debit against the posting's overdraft policy, and
    /// writes the transactions, the new balances and the batch's outbox jobs
    /// before committing.
    ///
    /// # Errors
    ///
    /// - `LedgerCommitError::StaleStatus` when the booking left the expected status
    /// - `LedgerCommitError::InsufficientFunds` when a guarded debit would go below zero
    /// - `PortError::NotFound` when an account is missing or inactive
    /// - `PortError::Conflict` on a serialization failure or deadlock
    pub async fn commit_batch(&self, batch: PostingBatch) -> Result<Vec<Transaction>, LedgerCommitError> {
        let mut tx = self.pool.begin().await.map_err(commit_error)?;

        if let Some(transition) = &batch.status {
            match BookingRepository::transition_status(&mut tx, transition)
                .await
                .map_err(commit_error)?
            {
                TransitionOutcome::Applied => {}
                TransitionOutcome::Missing => {
                    return Err(PortError::not_found("Booking", transition.booking_id).into());
                }
                TransitionOutcome::Stale(actual) => {
                    return Err(LedgerCommitError::StaleStatus {
                        booking_id: transition.booking_id,
                        expected: transition.expected,
                        actual,
                    });
                }
            }
        }

        let ids: Vec<Uuid> = batch.account_ids().into_iter().map(Uuid::from).collect();
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE account_id = ANY($1) AND is_active
             ORDER BY account_id
             FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(commit_error)?;

        let mut accounts: BTreeMap<AccountId, Account> = BTreeMap::new();
        for row in rows {
            let account = Account::try_from(row).map_err(commit_error)?;
            accounts.insert(account.id, account);
        }

        let mut balances: BTreeMap<AccountId, Money> = BTreeMap::new();
        for posting in &batch.postings {
            let account = accounts
                .get(&posting.account_id)
                .ok_or_else(|| PortError::not_found("Account", posting.account_id))?;
            let current = balances.get(&posting.account_id).copied().unwrap_or(account.balance);
            let next = current
                .checked_add(&posting.signed_amount())
                .map_err(|e| PortError::validation(e.to_string()))?;
            if posting.transaction_type == TransactionType::Debit
                && posting.overdraft.guards(account.account_type)
                && next.is_negative()
            {
                return Err(LedgerCommitError::InsufficientFunds {
                    account_id: posting.account_id,
                    balance: current,
                    requested: posting.amount,
                });
            }
            balances.insert(posting.account_id, next);
        }

        let date = batch.transaction_date;
        let transactions: Vec<Transaction> = batch.postings.into_iter().map(|p| p.into_transaction(date)).collect();
        for txn in &transactions {
            Self::insert_transaction(&mut tx, txn).await.map_err(commit_error)?;
        }
        for (id, balance) in &balances {
            sqlx::query("UPDATE accounts SET balance = $2, updated_at = now() WHERE account_id = $1")
                .bind(Uuid::from(*id))
                .bind(balance.amount())
                .execute(&mut *tx)
                .await
                .map_err(commit_error)?;
        }
        OutboxRepository::insert_jobs(&mut tx, &batch.jobs)
            .await
            .map_err(commit_error)?;

        tx.commit().await.map_err(commit_error)?;
        debug!(
            transactions = transactions.len(),
            accounts = balances.len(),
            jobs = batch.jobs.len(),
            "posting batch committed"
        );
        Ok(transactions)
    }

    async fn insert_transaction(conn: &mut PgConnection, txn: &Transaction) -> Result<(), DatabaseError> {
        let sql = format!(
            "INSERT INTO account_transactions ({TRANSACTION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(txn.id))
            .bind(Uuid::from(txn.account_id))
            .bind(txn.transaction_type.as_str())
            .bind(txn.category.as_str())
            .bind(txn.revenue_category.map(|c| c.as_str()))
            .bind(txn.amount.amount())
            .bind(txn.amount.currency().code())
            .bind(&txn.description)
            .bind(txn.reference_id)
            .bind(txn.reference_type.map(|r| r.as_str()))
            .bind(txn.payment_method.map(|m| m.as_str()))
            .bind(&txn.processed_by)
            .bind(&txn.notes)
            .bind(txn.transaction_date)
            .bind(txn.is_modification)
            .bind(txn.original_amount.map(|m| m.amount()))
            .bind(&txn.modification_reason)
            .bind(txn.created_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// All transactions of an account, oldest first
    pub async fn account_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM account_transactions
             WHERE account_id = $1 ORDER BY transaction_date, transaction_id"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    /// Transactions of an account that refer to one payment, booking or transfer
    pub async fn reference_transactions(
        &self,
        account_id: AccountId,
        reference_id: Uuid,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM account_transactions
             WHERE account_id = $1 AND reference_id = $2 ORDER BY transaction_date, transaction_id"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(account_id))
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }
}
