//! Database Test Utilities
//!
//! Provides helpers for database testing including testcontainer management
//! and a migrated billing store for integration tests.

use std::sync::Arc;
use std::time::Duration;

use core_kernel::Currency;
use infra_db::{run_migrations, DatabaseConfig, PostgresBillingStore};
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "hotel_billing_test";

/// Tables truncated between tests, children first
const BILLING_TABLES: &[&str] = &[
    "guest_billing_access",
    "payments",
    "invoices",
    "outbox_jobs",
    "revenue_reports",
    "account_transactions",
    "accounts",
    "bill_items",
    "hotel_services",
    "bookings",
    "users",
    "tax_settings",
    "hotel_profile",
];

/// Configuration for test database
#[derive(Debug, Clone)]
pub struct TestDatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl Default for TestDatabaseConfig {
    fn default() -> Self {
        Self {
            user: POSTGRES_USER.to_string(),
            password: POSTGRES_PASSWORD.to_string(),
            database: POSTGRES_DB.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

impl TestDatabaseConfig {
    /// Creates the database connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// A wrapper around a PostgreSQL test container
pub struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    pub config: TestDatabaseConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a new PostgreSQL container for testing
    ///
    /// # Returns
    ///
    /// A new TestDatabase instance with all migrations applied
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to start or a migration fails
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let container = Postgres::default()
            .with_user(POSTGRES_USER)
            .with_password(POSTGRES_PASSWORD)
            .with_db_name(POSTGRES_DB)
            .start()
            .await?;

        let port = container.get_host_port_ipv4(5432).await?;
        let host = container.get_host().await?.to_string();

        let config = TestDatabaseConfig {
            host,
            port,
            ..TestDatabaseConfig::default()
        };

        let db_config = DatabaseConfig::new(config.connection_url())
            .max_connections(5)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(30));
        let pool = infra_db::create_pool(db_config).await?;
        run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            config,
            pool,
        })
    }

    /// Returns a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A billing store over this database that books in INR
    pub fn store(&self) -> PostgresBillingStore {
        PostgresBillingStore::new(self.pool.clone(), Currency::INR)
    }

    /// Clears all data from the database while preserving the schema
    ///
    /// Useful for resetting state between tests
    pub async fn clear_data(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for table in BILLING_TABLES {
            sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

/// Global test database for shared integration tests
static SHARED_TEST_DB: OnceCell<Arc<TestDatabase>> = OnceCell::const_new();

/// Gets or creates a shared test database instance
///
/// # Panics
///
/// Panics if the database fails to initialize
pub async fn get_shared_test_database() -> Arc<TestDatabase> {
    SHARED_TEST_DB
        .get_or_init(|| async {
            Arc::new(
                TestDatabase::new()
                    .await
                    .expect("Failed to create shared test database"),
            )
        })
        .await
        .clone()
}

/// Creates an isolated test database for a single test
///
/// Use this when tests need to modify data and isolation is required
pub async fn create_isolated_test_database() -> Result<TestDatabase, Box<dyn std::error::Error + Send + Sync>> {
    TestDatabase::new().await
}

/// Helper trait for test assertions on database results
pub trait DatabaseTestAssertions {
    /// Asserts that a specific number of rows were affected
    fn assert_rows_affected(&self, expected: u64);
}

impl DatabaseTestAssertions for sqlx::postgres::PgQueryResult {
    fn assert_rows_affected(&self, expected: u64) {
        assert_eq!(
            self.rows_affected(),
            expected,
            "Expected {} rows affected, got {}",
            expected,
            self.rows_affected()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_connection_url() {
        let config = TestDatabaseConfig::default();
        let url = config.connection_url();

        assert!(url.starts_with("postgres://"));
        assert!(url.contains(POSTGRES_USER));
        assert!(url.contains(POSTGRES_DB));
    }

    #[test]
    fn test_every_billing_table_is_cleared() {
        assert!(BILLING_TABLES.contains(&"account_transactions"));
        assert!(BILLING_TABLES.contains(&"outbox_jobs"));
        assert_eq!(BILLING_TABLES.len(), 13);
    }
}
