//! Money types with precise decimal arithmetic
//!
//! This module provides a type-safe representation of monetary values
//! using rust_decimal for precise calculations without floating-point errors.
//!
//! # Rounding
//!
//! Every `Money` value is held at its currency's minor unit. [`Money::new`]
//! rounds half away from zero ("round-half-up" for positive amounts), and it is
//! the only place rounding happens. A computed field (a tax line, a percentage
//! of a base) is produced by a single `Money::new` over the unrounded product,
//! so the rule is applied exactly once per field. Sums of rounded values are
//! exact and never re-rounded.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Currency codes following ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    INR,
    USD,
    EUR,
    GBP,
    AED,
    JPY,
}

impl Currency {
    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Returns the currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::INR => "₹",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::AED => "AED",
            Currency::JPY => "¥",
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
            Currency::JPY => "JPY",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::INR
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INR" => Ok(Currency::INR),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "AED" => Ok(Currency::AED),
            "JPY" => Ok(Currency::JPY),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: cannot operate on {0} and {1}")]
    CurrencyMismatch(String, String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Division by zero")]
    DivisionByZero,
}

/// A monetary amount with associated currency
///
/// The amount is always stored rounded to the currency's minor unit
/// (paise for INR), so two equal-looking values always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value, rounding half away from zero to the minor unit
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: amount.round_dp_with_strategy(
                currency.decimal_places(),
                RoundingStrategy::MidpointAwayFromZero,
            ),
            currency,
        }
    }

    /// Creates Money from an integer amount in minor units (e.g., paise)
    pub fn from_minor(minor_units: i64, currency: Currency) -> Self {
        Self {
            amount: Decimal::new(minor_units, currency.decimal_places()),
            currency,
        }
    }

    /// Creates a zero amount in the specified currency
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: dec!(0),
            currency,
        }
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns the amount in minor units
    pub fn minor_units(&self) -> i128 {
        let mut scaled = self.amount;
        scaled.rescale(self.currency.decimal_places());
        scaled.mantissa()
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is positive
    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Returns true if the amount is negative
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
            currency: self.currency,
        }
    }

    /// Checked addition that returns an error on currency mismatch
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self {
            amount: self.amount + other.amount,
            currency: self.currency,
        })
    }

    /// Checked subtraction that returns an error on currency mismatch
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self {
            amount: self.amount - other.amount,
            currency: self.currency,
        })
    }

    /// Subtracts `other`, flooring the result at zero
    pub fn saturating_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        let result = self.checked_sub(other)?;
        if result.is_negative() {
            Ok(Money::zero(self.currency))
        } else {
            Ok(result)
        }
    }

    /// Multiplies by a scalar (e.g., a quantity); rounds once
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.amount * factor, self.currency)
    }

    /// Returns `percentage`% of this amount; rounds once
    pub fn percentage(&self, percentage: Decimal) -> Self {
        Self::new(self.amount * percentage / dec!(100), self.currency)
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        Ok(Self::new(self.amount / divisor, self.currency))
    }

    /// Allocates the money into n equal parts, handling remainders
    /// The remainder is distributed among the first allocations
    pub fn allocate(&self, n: u32) -> Result<Vec<Money>, MoneyError> {
        if n == 0 {
            return Err(MoneyError::InvalidAmount("Cannot allocate to zero parts".to_string()));
        }

        let total_minor = self.minor_units();
        let base_amount = total_minor / n as i128;
        let remainder = total_minor % n as i128;

        let mut allocations = Vec::with_capacity(n as usize);
        for i in 0..n as i128 {
            let minor = if i < remainder.abs() {
                base_amount + remainder.signum()
            } else {
                base_amount
            };
            allocations.push(Self::from_minor_i128(minor, self.currency)?);
        }

        Ok(allocations)
    }

    /// Allocates money according to given ratios
    /// Returns allocations in the same order as the ratios
    pub fn allocate_by_ratios(&self, ratios: &[Decimal]) -> Result<Vec<Money>, MoneyError> {
        if ratios.is_empty() {
            return Err(MoneyError::InvalidAmount("Empty ratios".to_string()));
        }

        let total_ratio: Decimal = ratios.iter().sum();
        if total_ratio.is_zero() {
            return Err(MoneyError::InvalidAmount("Total ratio is zero".to_string()));
        }

        let mut allocated = Money::zero(self.currency);
        let mut allocations = Vec::with_capacity(ratios.len());

        for (i, ratio) in ratios.iter().enumerate() {
            if i == ratios.len() - 1 {
                // Last allocation gets the remainder to ensure sum equals original
                allocations.push(self.checked_sub(&allocated)?);
            } else {
                let allocation = Self::new(self.amount * *ratio / total_ratio, self.currency);
                allocated = allocated.checked_add(&allocation)?;
                allocations.push(allocation);
            }
        }

        Ok(allocations)
    }

    fn from_minor_i128(minor: i128, currency: Currency) -> Result<Self, MoneyError> {
        let minor = i64::try_from(minor)
            .map_err(|_| MoneyError::InvalidAmount(format!("{} minor units out of range", minor)))?;
        Ok(Self::from_minor(minor, currency))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.decimal_places();
        write!(
            f,
            "{} {:.dp$}",
            self.currency.symbol(),
            self.amount,
            dp = dp as usize
        )
    }
}

/// # Panics
///
/// Panics on currency mismatch; use [`Money::checked_add`] for untrusted input.
impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.checked_add(&other)
            .expect("Currency mismatch in Money::add")
    }
}

/// # Panics
///
/// Panics on currency mismatch; use [`Money::checked_sub`] for untrusted input.
impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self.checked_sub(&other)
            .expect("Currency mismatch in Money::sub")
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            amount: -self.amount,
            currency: self.currency,
        }
    }
}

/// Sums a non-empty sequence in its own currency. An empty sequence sums to
/// zero INR; prefer folding from `Money::zero(currency)` when that matters.
impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        let mut iter = iter.peekable();
        let currency = iter.peek().map(|m| m.currency).unwrap_or_default();
        iter.fold(Money::zero(currency), |acc, m| acc + m)
    }
}

/// Represents a percentage rate (e.g., a GST rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// The rate as a decimal (e.g., 0.18 for 18%)
    value: Decimal,
}

impl Rate {
    /// Creates a rate from a decimal value (e.g., 0.18 for 18%)
    pub fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Creates a rate from a percentage (e.g., 18 for 18%)
    pub fn from_percentage(percentage: Decimal) -> Self {
        Self {
            value: percentage / dec!(100),
        }
    }

    /// Returns the rate as a decimal
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    /// Returns the rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.value * dec!(100)
    }

    /// Returns true if the rate is zero
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Applies this rate to a money amount; rounds once
    pub fn apply(&self, money: &Money) -> Money {
        money.multiply(self.value)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_creation() {
        let m = Money::new(dec!(100.50), Currency::INR);
        assert_eq!(m.amount(), dec!(100.50));
        assert_eq!(m.currency(), Currency::INR);
    }

    #[test]
    fn test_money_rounds_half_up_once() {
        assert_eq!(Money::new(dec!(10.005), Currency::INR).amount(), dec!(10.01));
        assert_eq!(Money::new(dec!(10.004), Currency::INR).amount(), dec!(10.00));
        assert_eq!(Money::new(dec!(-10.005), Currency::INR).amount(), dec!(-10.01));
    }

    #[test]
    fn test_money_from_minor() {
        let m = Money::from_minor(10050, Currency::INR);
        assert_eq!(m.amount(), dec!(100.50));
        assert_eq!(m.minor_units(), 10050);
    }

    #[test]
    fn test_currency_mismatch() {
        let inr = Money::new(dec!(100.00), Currency::INR);
        let usd = Money::new(dec!(100.00), Currency::USD);

        let result = inr.checked_add(&usd);
        assert!(matches!(result, Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Money::new(dec!(50), Currency::INR);
        let b = Money::new(dec!(80), Currency::INR);
        assert!(a.saturating_sub(&b).unwrap().is_zero());
        assert_eq!(b.saturating_sub(&a).unwrap().amount(), dec!(30));
    }

    #[test]
    fn test_percentage() {
        let base = Money::new(dec!(2000), Currency::INR);
        assert_eq!(base.percentage(dec!(18)).amount(), dec!(360));
        let odd = Money::new(dec!(333.33), Currency::INR);
        assert_eq!(odd.percentage(dec!(9)).amount(), dec!(30.00));
    }

    #[test]
    fn test_money_allocation_halves() {
        let m = Money::new(dec!(100.01), Currency::INR);
        let parts = m.allocate(2).unwrap();

        assert_eq!(parts[0].amount(), dec!(50.01));
        assert_eq!(parts[1].amount(), dec!(50.00));
    }

    #[test]
    fn test_rate_application() {
        let rate = Rate::from_percentage(dec!(18));
        let amount = Money::new(dec!(1000.00), Currency::INR);

        assert_eq!(rate.apply(&amount).amount(), dec!(180.00));
        assert_eq!(rate.to_string(), "18%");
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("inr".parse::<Currency>().unwrap(), Currency::INR);
        assert!("XYZ".parse::<Currency>().is_err());
    }
}
