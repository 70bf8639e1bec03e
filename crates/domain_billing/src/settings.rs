//! Billing settings
//!
//! Plain settings struct handed to every billing service. Binaries build it
//! from their own configuration layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use core_kernel::{Currency, Timezone};

use crate::error::BillingError;

/// Longest a single store round-trip may block a caller
pub const MAX_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings shared by the billing services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSettings {
    /// Currency of every amount the hotel books
    pub currency: Currency,
    /// Hotel timezone; report periods are local calendar days
    pub timezone: Timezone,
    /// Prefix of generated invoice numbers
    pub invoice_prefix: String,
    /// Days between invoice date and due date
    pub invoice_due_days: u32,
    /// Upper bound for each store round-trip
    pub operation_timeout: Duration,
    /// Attempts made again after a store conflict before giving up
    pub max_conflict_retries: u32,
    /// Lifetime of a guest billing token
    pub guest_token_ttl: Duration,
    /// Apply revenue jobs right after the payment commits
    pub apply_revenue_inline: bool,
    /// Failures after which an outbox job is dead-lettered
    pub outbox_max_attempts: u32,
    /// First retry delay of a failed outbox job
    pub outbox_backoff_base: Duration,
    /// Bill IGST instead of CGST + SGST
    pub inter_state_supply: bool,
    /// Name given to the main hotel account when it is created
    pub main_account_name: String,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            currency: Currency::INR,
            timezone: Timezone::default(),
            invoice_prefix: "HTL".to_string(),
            invoice_due_days: 0,
            operation_timeout: Duration::from_secs(10),
            max_conflict_retries: 3,
            guest_token_ttl: Duration::from_secs(72 * 3600),
            apply_revenue_inline: true,
            outbox_max_attempts: 8,
            outbox_backoff_base: Duration::from_secs(5),
            inter_state_supply: false,
            main_account_name: "Hotel Main Account".to_string(),
        }
    }
}

impl BillingSettings {
    /// Checks the settings before services are built from them
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.operation_timeout.is_zero() || self.operation_timeout > MAX_OPERATION_TIMEOUT {
            return Err(BillingError::validation(format!(
                "operation_timeout must be between 1ms and {}s",
                MAX_OPERATION_TIMEOUT.as_secs()
            )));
        }
        let prefix_ok = !self.invoice_prefix.is_empty()
            && self.invoice_prefix.chars().all(|c| c.is_ascii_alphanumeric());
        if !prefix_ok {
            return Err(BillingError::validation(
                "invoice_prefix must be non-empty and alphanumeric",
            ));
        }
        if self.outbox_max_attempts == 0 {
            return Err(BillingError::validation("outbox_max_attempts must be at least 1"));
        }
        if self.guest_token_ttl.is_zero() {
            return Err(BillingError::validation("guest_token_ttl must be positive"));
        }
        Ok(())
    }

    /// Guest token lifetime as a chrono duration
    pub fn guest_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.guest_token_ttl).unwrap_or(chrono::Duration::hours(72))
    }
}
