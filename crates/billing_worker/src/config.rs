//! Worker configuration

use std::str::FromStr;
use std::time::Duration;

use core_kernel::{Currency, Timezone};
use domain_billing::BillingSettings;
use infra_db::DatabaseConfig;
use serde::Deserialize;

use crate::error::WorkerError;

/// Worker configuration, read from `WORKER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Database URL
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connect_timeout_secs: u64,
    /// Pause between outbox passes
    pub poll_interval_ms: u64,
    /// Jobs claimed per pass
    pub batch_size: u32,
    /// Also mark checked-out unpaid bookings overdue on every pass
    pub refresh_overdue: bool,
    /// ISO code of the hotel currency
    pub currency: String,
    /// IANA name of the hotel timezone
    pub timezone: String,
    pub operation_timeout_secs: u64,
    pub outbox_max_attempts: u32,
    pub outbox_backoff_secs: u64,
    /// Log level
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let settings = BillingSettings::default();
        Self {
            database_url: "postgres://localhost/hotel_billing".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 30,
            poll_interval_ms: 2_000,
            batch_size: 50,
            refresh_overdue: true,
            currency: settings.currency.code().to_string(),
            timezone: settings.timezone.to_string(),
            operation_timeout_secs: settings.operation_timeout.as_secs(),
            outbox_max_attempts: settings.outbox_max_attempts,
            outbox_backoff_secs: settings.outbox_backoff_base.as_secs(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from environment
    ///
    /// Unset variables keep their defaults. `DATABASE_URL` is honoured when
    /// `WORKER_DATABASE_URL` is absent.
    pub fn from_env() -> Result<Self, WorkerError> {
        let mut config: WorkerConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix("WORKER").try_parsing(true))
            .build()?
            .try_deserialize()?;

        if std::env::var("WORKER_DATABASE_URL").is_err() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                config.database_url = url;
            }
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Billing settings for the services the worker drives
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Config` for an unknown currency or timezone and
    /// when the resulting settings do not validate
    pub fn billing_settings(&self) -> Result<BillingSettings, WorkerError> {
        let currency = Currency::from_str(&self.currency)
            .map_err(|e| WorkerError::config(format!("WORKER_CURRENCY: {}", e)))?;
        let timezone = Timezone::from_str(&self.timezone)
            .map_err(|e| WorkerError::config(format!("WORKER_TIMEZONE: {}", e)))?;

        let settings = BillingSettings {
            currency,
            timezone,
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            outbox_max_attempts: self.outbox_max_attempts,
            outbox_backoff_base: Duration::from_secs(self.outbox_backoff_secs),
            ..BillingSettings::default()
        };
        settings
            .validate()
            .map_err(|e| WorkerError::config(e.to_string()))?;
        Ok(settings)
    }

    /// Pool configuration for the worker's connections
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }

    /// Options of the polling loop
    pub fn worker_options(&self) -> crate::worker::WorkerOptions {
        crate::worker::WorkerOptions {
            poll_interval: self.poll_interval(),
            batch_size: self.batch_size,
            refresh_overdue: self.refresh_overdue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert_to_valid_settings() {
        let config = WorkerConfig::default();
        let settings = config.billing_settings().unwrap();
        assert_eq!(settings.currency, Currency::INR);
        assert_eq!(settings.outbox_max_attempts, 8);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let config = WorkerConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..WorkerConfig::default()
        };
        let err = config.billing_settings().unwrap_err();
        assert!(err.to_string().contains("WORKER_TIMEZONE"));
    }

    #[test]
    fn test_unknown_currency_is_rejected() {
        let config = WorkerConfig {
            currency: "XYZ".to_string(),
            ..WorkerConfig::default()
        };
        assert!(matches!(config.billing_settings(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let config = WorkerConfig {
            operation_timeout_secs: 0,
            ..WorkerConfig::default()
        };
        assert!(config.billing_settings().is_err());
    }

    #[test]
    fn test_worker_options_follow_config() {
        let config = WorkerConfig {
            batch_size: 7,
            refresh_overdue: false,
            ..WorkerConfig::default()
        };
        let options = config.worker_options();
        assert_eq!(options.batch_size, 7);
        assert!(!options.refresh_overdue);
    }
}
