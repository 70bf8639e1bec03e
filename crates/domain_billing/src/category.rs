//! Revenue and service categories
//!
//! Categories are closed enums; each fan-out (service to revenue category,
//! category to report column) is an exhaustive match.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{Currency, Money, MoneyError};

use crate::error::BillingError;

/// Classification of income used in ledger postings and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueCategory {
    Accommodation,
    FoodBeverage,
    Spa,
    Transport,
    Laundry,
    Minibar,
    Conference,
    Other,
}

impl RevenueCategory {
    pub const ALL: [RevenueCategory; 8] = [
        RevenueCategory::Accommodation,
        RevenueCategory::FoodBeverage,
        RevenueCategory::Spa,
        RevenueCategory::Transport,
        RevenueCategory::Laundry,
        RevenueCategory::Minibar,
        RevenueCategory::Conference,
        RevenueCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueCategory::Accommodation => "accommodation",
            RevenueCategory::FoodBeverage => "food_beverage",
            RevenueCategory::Spa => "spa",
            RevenueCategory::Transport => "transport",
            RevenueCategory::Laundry => "laundry",
            RevenueCategory::Minibar => "minibar",
            RevenueCategory::Conference => "conference",
            RevenueCategory::Other => "other",
        }
    }
}

impl fmt::Display for RevenueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevenueCategory {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RevenueCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BillingError::validation(format!("unknown revenue category: {}", s)))
    }
}

/// Category of a billable hotel service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Restaurant,
    RoomService,
    Bar,
    Spa,
    Transport,
    Laundry,
    Minibar,
    Conference,
    Other,
}

impl ServiceCategory {
    pub fn revenue_category(&self) -> RevenueCategory {
        match self {
            ServiceCategory::Restaurant | ServiceCategory::RoomService | ServiceCategory::Bar => {
                RevenueCategory::FoodBeverage
            }
            ServiceCategory::Spa => RevenueCategory::Spa,
            ServiceCategory::Transport => RevenueCategory::Transport,
            ServiceCategory::Laundry => RevenueCategory::Laundry,
            ServiceCategory::Minibar => RevenueCategory::Minibar,
            ServiceCategory::Conference => RevenueCategory::Conference,
            ServiceCategory::Other => RevenueCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Restaurant => "restaurant",
            ServiceCategory::RoomService => "room_service",
            ServiceCategory::Bar => "bar",
            ServiceCategory::Spa => "spa",
            ServiceCategory::Transport => "transport",
            ServiceCategory::Laundry => "laundry",
            ServiceCategory::Minibar => "minibar",
            ServiceCategory::Conference => "conference",
            ServiceCategory::Other => "other",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restaurant" => Ok(ServiceCategory::Restaurant),
            "room_service" => Ok(ServiceCategory::RoomService),
            "bar" => Ok(ServiceCategory::Bar),
            "spa" => Ok(ServiceCategory::Spa),
            "transport" => Ok(ServiceCategory::Transport),
            "laundry" => Ok(ServiceCategory::Laundry),
            "minibar" => Ok(ServiceCategory::Minibar),
            "conference" => Ok(ServiceCategory::Conference),
            "other" => Ok(ServiceCategory::Other),
            other => Err(BillingError::validation(format!("unknown service category: {}", other))),
        }
    }
}

/// Amounts per revenue category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRevenue {
    pub accommodation: Money,
    pub food_beverage: Money,
    pub spa: Money,
    pub transport: Money,
    pub laundry: Money,
    pub minibar: Money,
    pub conference: Money,
    pub other: Money,
}

impl CategoryRevenue {
    pub fn zero(currency: Currency) -> Self {
        let z = Money::zero(currency);
        Self {
            accommodation: z,
            food_beverage: z,
            spa: z,
            transport: z,
            laundry: z,
            minibar: z,
            conference: z,
            other: z,
        }
    }

    /// Breakdown with a single non-zero category
    pub fn single(category: RevenueCategory, amount: Money) -> Self {
        let mut breakdown = Self::zero(amount.currency());
        *breakdown.get_mut(category) = amount;
        breakdown
    }

    pub fn currency(&self) -> Currency {
        self.accommodation.currency()
    }

    pub fn get(&self, category: RevenueCategory) -> Money {
        match category {
            RevenueCategory::Accommodation => self.accommodation,
            RevenueCategory::FoodBeverage => self.food_beverage,
            RevenueCategory::Spa => self.spa,
            RevenueCategory::Transport => self.transport,
            RevenueCategory::Laundry => self.laundry,
            RevenueCategory::Minibar => self.minibar,
            RevenueCategory::Conference => self.conference,
            RevenueCategory::Other => self.other,
        }
    }

    pub fn get_mut(&mut self, category: RevenueCategory) -> &mut Money {
        match category {
            RevenueCategory::Accommodation => &mut self.accommodation,
            RevenueCategory::FoodBeverage => &mut self.food_beverage,
            RevenueCategory::Spa => &mut self.spa,
            RevenueCategory::Transport => &mut self.transport,
            RevenueCategory::Laundry => &mut self.laundry,
            RevenueCategory::Minibar => &mut self.minibar,
            RevenueCategory::Conference => &mut self.conference,
            RevenueCategory::Other => &mut self.other,
        }
    }

    /// Adds `amount` to one category
    pub fn add(&mut self, category: RevenueCategory, amount: Money) -> Result<(), MoneyError> {
        let slot = self.get_mut(category);
        *slot = slot.checked_add(&amount)?;
        Ok(())
    }

    /// Category-wise sum
    pub fn merge(&mut self, other: &CategoryRevenue) -> Result<(), MoneyError> {
        for (category, amount) in other.iter() {
            self.add(category, amount)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (RevenueCategory, Money)> + '_ {
        RevenueCategory::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    /// Categories with a non-zero amount, in declaration order
    pub fn non_zero(&self) -> Vec<(RevenueCategory, Money)> {
        self.iter().filter(|(_, m)| !m.is_zero()).collect()
    }

    pub fn total(&self) -> Money {
        self.iter()
            .fold(Money::zero(self.currency()), |acc, (_, m)| acc + m)
    }

    pub fn is_zero(&self) -> bool {
        self.iter().all(|(_, m)| m.is_zero())
    }

    /// Splits `total` into categories: each item's amount goes to its own
    /// category and whatever is left is accommodation (floored at zero).
    pub fn allocate<I>(total: Money, items: I) -> Result<Self, MoneyError>
    where
        I: IntoIterator<Item = (RevenueCategory, Money)>,
    {
        let mut breakdown = Self::zero(total.currency());
        let mut items_total = Money::zero(total.currency());
        for (category, amount) in items {
            breakdown.add(category, amount)?;
            items_total = items_total.checked_add(&amount)?;
        }
        let room_share = total.saturating_sub(&items_total)?;
        breakdown.add(RevenueCategory::Accommodation, room_share)?;
        Ok(breakdown)
    }
}
