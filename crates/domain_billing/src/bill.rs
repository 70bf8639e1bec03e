//! Bill items and bill calculation
//!
//! A bill is the room charge for the stay plus every live bill item, net of
//! discounts, plus tax. [`BillCalculator`] owns bill-item mutations and is the
//! only writer of a booking's persisted totals: every mutation ends in
//! [`BillCalculator::recalculate_booking_total`].
//!
//! # Item tax
//!
//! An item tagged with its own GST percentage keeps that rate for good; it is
//! never re-priced when the hotel's default rates change. Untagged taxable items
//! go through [`TaxCalculator`] with the hotel's current configuration.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use core_kernel::{BillItemId, BookingId, Currency, Money, ServiceId, Timezone};

use crate::booking::{Booking, BookingTotals};
use crate::category::{CategoryRevenue, RevenueCategory, ServiceCategory};
use crate::error::BillingError;
use crate::ports::{bounded, BillingPorts};
use crate::settings::BillingSettings;
use crate::tax::{TaxBreakdown, TaxCalculator, TaxConfig};

/// A billable hotel service from the catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelService {
    pub id: ServiceId,
    pub name: String,
    pub category: ServiceCategory,
    pub hsn_code: Option<String>,
    pub is_active: bool,
}

/// Tax on one item, split the way the booking totals are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemTax {
    pub gst: Money,
    pub service_tax: Money,
    pub other_tax: Money,
    pub total: Money,
}

impl ItemTax {
    fn zero(currency: core_kernel::Currency) -> Self {
        let z = Money::zero(currency);
        Self {
            gst: z,
            service_tax: z,
            other_tax: z,
            total: z,
        }
    }
}

/// An extra charge on a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItem {
    pub id: BillItemId,
    pub booking_id: BookingId,
    pub service_id: Option<ServiceId>,
    pub service_category: Option<ServiceCategory>,
    pub item_name: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub discount: Money,
    pub gst_applicable: bool,
    /// Fixed rate for this item; bypasses the hotel default when present
    pub gst_percentage: Option<Decimal>,
    pub hsn_code: Option<String>,
    /// `unit_price * quantity`
    pub total_price: Money,
    pub tax_amount: Money,
    /// `total_price - discount + tax_amount`
    pub final_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillItem {
    /// Revenue category of the linked service, `Other` when there is none
    pub fn revenue_category(&self) -> RevenueCategory {
        self.service_category
            .map(|c| c.revenue_category())
            .unwrap_or(RevenueCategory::Other)
    }

    /// Discount actually applied, never more than the gross price
    pub fn applied_discount(&self) -> Money {
        if self.discount.amount() > self.total_price.amount() {
            self.total_price
        } else {
            self.discount
        }
    }

    /// Price after discount
    pub fn net_amount(&self) -> Money {
        self.total_price - self.applied_discount()
    }

    /// Tax on the net amount under the item's own or the hotel's rates
    pub fn item_tax(&self, config: &TaxConfig) -> ItemTax {
        let net = self.net_amount();
        if !self.gst_applicable {
            return ItemTax::zero(net.currency());
        }
        match self.gst_percentage {
            Some(pct) => {
                let gst = net.percentage(pct);
                let zero = Money::zero(net.currency());
                ItemTax {
                    gst,
                    service_tax: zero,
                    other_tax: zero,
                    total: gst,
                }
            }
            None => {
                let breakdown = TaxCalculator::calculate_taxes(net, config);
                ItemTax {
                    gst: breakdown.gst_amount,
                    service_tax: breakdown.service_tax_amount,
                    other_tax: breakdown.other_tax_amount,
                    total: breakdown.total_tax_amount,
                }
            }
        }
    }

    /// Recomputes the derived price fields
    pub fn priced(mut self, config: &TaxConfig) -> Self {
        self.total_price = self.unit_price.multiply(self.quantity);
        let tax = self.item_tax(config);
        self.tax_amount = tax.total;
        self.final_amount = self.net_amount() + tax.total;
        self
    }
}

/// Request to add a bill item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewBillItem {
    pub item_name: String,
    pub quantity: Decimal,
    pub unit_price: Option<Money>,
    pub discount: Option<Money>,
    pub gst_applicable: bool,
    pub gst_percentage: Option<Decimal>,
    pub service_id: Option<ServiceId>,
    pub hsn_code: Option<String>,
}

/// Partial update of a bill item; `None` leaves a field unchanged
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BillItemUpdate {
    pub item_name: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Money>,
    pub discount: Option<Money>,
    pub gst_applicable: Option<bool>,
    pub gst_percentage: Option<Option<Decimal>>,
    pub hsn_code: Option<Option<String>>,
}

/// Full bill of a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillCalculation {
    pub booking_id: BookingId,
    pub nights: u32,
    pub room_rate: Money,
    /// Persisted room amount, or nightly rate times nights
    pub room_charge: Money,
    pub room_discount: Money,
    /// Hotel-default tax on the discounted room charge
    pub room_tax: TaxBreakdown,
    pub items: Vec<BillItem>,
    /// Room charge plus every item's gross price
    pub base_amount: Money,
    pub total_discount: Money,
    pub subtotal: Money,
    pub gst_amount: Money,
    pub service_tax_amount: Money,
    pub other_tax_amount: Money,
    pub total_tax: Money,
    pub total_amount: Money,
}

impl BillCalculation {
    /// Pure bill computation over a booking and its live items
    pub fn compute(
        booking: &Booking,
        items: Vec<BillItem>,
        config: &TaxConfig,
        tz: &Timezone,
    ) -> Result<Self, BillingError> {
        let currency = booking.room_price.currency();
        let room_charge = booking.room_charge(tz);
        let room_discount = if booking.room_discount.amount() > room_charge.amount() {
            room_charge
        } else {
            booking.room_discount
        };
        let room_net = room_charge.checked_sub(&room_discount)?;
        let room_tax = TaxCalculator::calculate_taxes(room_net, config);

        let mut items: Vec<BillItem> = items.into_iter().map(|i| i.priced(config)).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut base_amount = room_charge;
        let mut total_discount = room_discount;
        let mut gst_amount = room_tax.gst_amount;
        let mut service_tax_amount = room_tax.service_tax_amount;
        let mut other_tax_amount = room_tax.other_tax_amount;
        for item in &items {
            if item.total_price.currency() != currency {
                return Err(BillingError::validation(format!(
                    "bill item {} is priced in {}, booking in {}",
                    item.id,
                    item.total_price.currency(),
                    currency
                )));
            }
            let tax = item.item_tax(config);
            base_amount = base_amount + item.total_price;
            total_discount = total_discount + item.applied_discount();
            gst_amount = gst_amount + tax.gst;
            service_tax_amount = service_tax_amount + tax.service_tax;
            other_tax_amount = other_tax_amount + tax.other_tax;
        }

        let subtotal = base_amount - total_discount;
        let total_tax = gst_amount + service_tax_amount + other_tax_amount;
        Ok(Self {
            booking_id: booking.id,
            nights: booking.nights(tz),
            room_rate: booking.room_price,
            room_charge,
            room_discount,
            room_tax,
            items,
            base_amount,
            total_discount,
            subtotal,
            gst_amount,
            service_tax_amount,
            other_tax_amount,
            total_tax,
            total_amount: subtotal + total_tax,
        })
    }

    /// The fields persisted on the booking
    pub fn totals(&self) -> BookingTotals {
        BookingTotals {
            base_amount: self.base_amount,
            discount_amount: self.total_discount,
            subtotal: self.subtotal,
            gst_amount: self.gst_amount,
            service_tax_amount: self.service_tax_amount,
            other_tax_amount: self.other_tax_amount,
            total_tax_amount: self.total_tax,
            total_amount: self.total_amount,
        }
    }

    /// Revenue per category; sums exactly to `total_amount`
    pub fn category_breakdown(&self) -> Result<CategoryRevenue, BillingError> {
        Ok(CategoryRevenue::allocate(
            self.total_amount,
            self.items.iter().map(|i| (i.revenue_category(), i.final_amount)),
        )?)
    }
}

fn check_gst_percentage(pct: Option<Decimal>) -> Result<(), BillingError> {
    match pct {
        Some(p) if p < Decimal::ZERO || p > dec!(100) => Err(BillingError::validation(format!(
            "GST percentage {} outside 0..=100",
            p
        ))),
        _ => Ok(()),
    }
}

/// Items are priced in the booking's currency; anything else cannot be added up
fn check_currency(field: &str, amount: Option<Money>, currency: Currency) -> Result<(), BillingError> {
    match amount {
        Some(m) if m.currency() != currency => Err(BillingError::validation(format!(
            "{} in {} for a booking billed in {}",
            field,
            m.currency(),
            currency
        ))),
        _ => Ok(()),
    }
}

/// Owns bill items and the booking totals derived from them
#[derive(Clone)]
pub struct BillCalculator {
    ports: BillingPorts,
    settings: BillingSettings,
}

impl BillCalculator {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self { ports, settings }
    }

    /// Adds an item to a booking and recalculates the booking total
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for a missing unit price, a GST rate outside
    ///   0..=100, or a price or discount in another currency than the booking's
    /// - `BillingError::NotFound` when the booking or the referenced service does not exist
    #[instrument(skip(self, request), fields(item = %request.item_name))]
    pub async fn add_bill_item(&self, booking_id: BookingId, request: NewBillItem) -> Result<BillItem, BillingError> {
        check_gst_percentage(request.gst_percentage)?;
        let limit = self.settings.operation_timeout;
        let booking = bounded(limit, "get_booking", self.ports.bookings.get_booking(booking_id)).await?;
        let currency = booking.room_price.currency();
        check_currency("unit price", request.unit_price, currency)?;
        check_currency("discount", request.discount, currency)?;

        let service = match request.service_id {
            Some(id) => Some(bounded(limit, "get_service", self.ports.bill_items.get_service(id)).await?),
            None => None,
        };
        let unit_price = request
            .unit_price
            .ok_or_else(|| BillingError::validation("unit price is required"))?;
        let config = bounded(limit, "tax_config", self.ports.hotel.tax_config()).await?;

        let now = Utc::now();
        let item = BillItem {
            id: BillItemId::new_v7(),
            booking_id,
            service_id: request.service_id,
            service_category: service.as_ref().map(|s| s.category),
            item_name: request.item_name,
            quantity: request.quantity,
            unit_price,
            discount: request.discount.unwrap_or_else(|| Money::zero(currency)),
            gst_applicable: request.gst_applicable,
            gst_percentage: request.gst_percentage,
            hsn_code: request
                .hsn_code
                .or_else(|| service.and_then(|s| s.hsn_code)),
            total_price: Money::zero(currency),
            tax_amount: Money::zero(currency),
            final_amount: Money::zero(currency),
            created_at: now,
            updated_at: now,
        }
        .priced(&config);

        bounded(limit, "insert_bill_item", self.ports.bill_items.insert_bill_item(&item)).await?;
        info!(item_id = %item.id, final_amount = %item.final_amount, "bill item added");
        self.recalculate_booking_total(booking_id).await?;
        Ok(item)
    }

    /// Applies a partial update to an item and recalculates the booking total
    ///
    /// # Errors
    ///
    /// Same validation as [`BillCalculator::add_bill_item`]; `BillingError::NotFound`
    /// when the item does not exist
    #[instrument(skip(self, update))]
    pub async fn update_bill_item(&self, item_id: BillItemId, update: BillItemUpdate) -> Result<BillItem, BillingError> {
        if let Some(pct) = update.gst_percentage {
            check_gst_percentage(pct)?;
        }
        let limit = self.settings.operation_timeout;
        let mut item = bounded(limit, "get_bill_item", self.ports.bill_items.get_bill_item(item_id)).await?;
        let booking = bounded(limit, "get_booking", self.ports.bookings.get_booking(item.booking_id)).await?;
        let currency = booking.room_price.currency();
        check_currency("unit price", update.unit_price, currency)?;
        check_currency("discount", update.discount, currency)?;
        let config = bounded(limit, "tax_config", self.ports.hotel.tax_config()).await?;

        if let Some(name) = update.item_name {
            item.item_name = name;
        }
        if let Some(quantity) = update.quantity {
            item.quantity = quantity;
        }
        if let Some(price) = update.unit_price {
            item.unit_price = price;
        }
        if let Some(discount) = update.discount {
            item.discount = discount;
        }
        if let Some(applicable) = update.gst_applicable {
            item.gst_applicable = applicable;
        }
        if let Some(pct) = update.gst_percentage {
            item.gst_percentage = pct;
        }
        if let Some(code) = update.hsn_code {
            item.hsn_code = code;
        }
        item.updated_at = Utc::now();
        let item = item.priced(&config);

        bounded(limit, "update_bill_item", self.ports.bill_items.update_bill_item(&item)).await?;
        info!(booking_id = %item.booking_id, final_amount = %item.final_amount, "bill item updated");
        self.recalculate_booking_total(item.booking_id).await?;
        Ok(item)
    }

    /// Deletes an item and recalculates the booking total
    #[instrument(skip(self))]
    pub async fn remove_bill_item(&self, item_id: BillItemId) -> Result<(), BillingError> {
        let limit = self.settings.operation_timeout;
        let item = bounded(limit, "get_bill_item", self.ports.bill_items.get_bill_item(item_id)).await?;
        bounded(limit, "delete_bill_item", self.ports.bill_items.delete_bill_item(item_id)).await?;
        info!(booking_id = %item.booking_id, "bill item removed");
        self.recalculate_booking_total(item.booking_id).await?;
        Ok(())
    }

    /// Stored items of a booking
    pub async fn get_bill_items(&self, booking_id: BookingId) -> Result<Vec<BillItem>, BillingError> {
        let limit = self.settings.operation_timeout;
        bounded(limit, "get_booking", self.ports.bookings.get_booking(booking_id)).await?;
        bounded(limit, "list_bill_items", self.ports.bill_items.list_bill_items(booking_id)).await
    }

    /// Computes the bill from the booking, its items and the hotel's tax rates
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` when the booking does not exist
    /// - `BillingError::Validation` when the hotel's tax configuration is invalid
    /// - `BillingError::UpstreamUnavailable` when the configuration cannot be read
    #[instrument(skip(self))]
    pub async fn calculate_bill(&self, booking_id: BookingId) -> Result<BillCalculation, BillingError> {
        let limit = self.settings.operation_timeout;
        let booking = bounded(limit, "get_booking", self.ports.bookings.get_booking(booking_id)).await?;
        let items = bounded(limit, "list_bill_items", self.ports.bill_items.list_bill_items(booking_id)).await?;
        let config = bounded(limit, "tax_config", self.ports.hotel.tax_config()).await?;
        config.validate()?;
        let bill = BillCalculation::compute(&booking, items, &config, &self.settings.timezone)?;
        debug!(total = %bill.total_amount, items = bill.items.len(), "bill calculated");
        Ok(bill)
    }

    /// Recomputes the bill and persists its totals on the booking
    #[instrument(skip(self))]
    pub async fn recalculate_booking_total(&self, booking_id: BookingId) -> Result<BillCalculation, BillingError> {
        let bill = self.calculate_bill(booking_id).await?;
        bounded(
            self.settings.operation_timeout,
            "update_booking_totals",
            self.ports.bookings.update_booking_totals(booking_id, &bill.totals()),
        )
        .await?;
        info!(total = %bill.total_amount, tax = %bill.total_tax, "booking total recalculated");
        Ok(bill)
    }
}
