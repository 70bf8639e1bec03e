//! Tax calculation
//!
//! Turns a base amount and the hotel's tax configuration into an itemized
//! breakdown. Every tax line is rounded once from the exact product; totals are
//! sums of rounded lines.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::Money;

use crate::error::BillingError;

pub const GST_LABEL: &str = "GST";
pub const SERVICE_TAX_LABEL: &str = "Service Tax";

/// An additional named tax levied on top of GST and service tax
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherTax {
    pub name: String,
    pub percentage: Decimal,
    pub description: Option<String>,
}

/// Snapshot of the hotel's tax rates used for one calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxConfig {
    pub gst_percentage: Decimal,
    pub service_tax_percentage: Decimal,
    pub other_taxes: Vec<OtherTax>,
    pub enabled: bool,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            gst_percentage: dec!(18),
            service_tax_percentage: Decimal::ZERO,
            other_taxes: Vec::new(),
            enabled: true,
        }
    }
}

impl TaxConfig {
    /// Configuration that levies nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// GST-only configuration
    pub fn gst_only(percentage: Decimal) -> Self {
        Self {
            gst_percentage: percentage,
            ..Default::default()
        }
    }

    /// Rejects negative rates, rates above 100% and unnamed other taxes
    pub fn validate(&self) -> Result<(), BillingError> {
        check_rate(GST_LABEL, self.gst_percentage)?;
        check_rate(SERVICE_TAX_LABEL, self.service_tax_percentage)?;
        for tax in &self.other_taxes {
            if tax.name.trim().is_empty() {
                return Err(BillingError::validation("other tax without a name"));
            }
            check_rate(&tax.name, tax.percentage)?;
        }
        Ok(())
    }
}

fn check_rate(name: &str, pct: Decimal) -> Result<(), BillingError> {
    if pct < Decimal::ZERO || pct > dec!(100) {
        return Err(BillingError::validation(format!(
            "{} percentage {} outside 0..=100",
            name, pct
        )));
    }
    Ok(())
}

/// One non-zero-rate tax in a breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLine {
    pub name: String,
    pub percentage: Decimal,
    pub amount: Money,
}

/// Result of a tax calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub base_amount: Money,
    pub gst_amount: Money,
    pub service_tax_amount: Money,
    pub other_tax_amount: Money,
    pub total_tax_amount: Money,
    pub total_amount: Money,
    /// Only taxes with a rate above zero are listed
    pub taxes: Vec<TaxLine>,
}

impl TaxBreakdown {
    /// Breakdown that levies nothing on `base`
    pub fn untaxed(base: Money) -> Self {
        let zero = Money::zero(base.currency());
        Self {
            base_amount: base,
            gst_amount: zero,
            service_tax_amount: zero,
            other_tax_amount: zero,
            total_tax_amount: zero,
            total_amount: base,
            taxes: Vec::new(),
        }
    }
}

/// Stateless tax calculator
pub struct TaxCalculator;

impl TaxCalculator {
    /// Computes the itemized taxes on `base`
    ///
    /// A disabled configuration yields all-zero taxes and `total = base`.
    pub fn calculate_taxes(base: Money, config: &TaxConfig) -> TaxBreakdown {
        if !config.enabled {
            return TaxBreakdown::untaxed(base);
        }

        let zero = Money::zero(base.currency());
        let mut taxes = Vec::new();

        let gst_amount = levy(base, GST_LABEL, config.gst_percentage, &mut taxes).unwrap_or(zero);
        let service_tax_amount =
            levy(base, SERVICE_TAX_LABEL, config.service_tax_percentage, &mut taxes).unwrap_or(zero);
        let other_tax_amount = config
            .other_taxes
            .iter()
            .filter_map(|t| levy(base, &t.name, t.percentage, &mut taxes))
            .fold(zero, |acc, m| acc + m);

        let total_tax_amount = gst_amount + service_tax_amount + other_tax_amount;
        TaxBreakdown {
            base_amount: base,
            gst_amount,
            service_tax_amount,
            other_tax_amount,
            total_tax_amount,
            total_amount: base + total_tax_amount,
            taxes,
        }
    }
}

fn levy(base: Money, name: &str, pct: Decimal, lines: &mut Vec<TaxLine>) -> Option<Money> {
    if pct <= Decimal::ZERO {
        return None;
    }
    let amount = base.percentage(pct);
    lines.push(TaxLine {
        name: name.to_string(),
        percentage: pct,
        amount,
    });
    Some(amount)
}
