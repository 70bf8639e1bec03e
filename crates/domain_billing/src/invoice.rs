//! Invoice management
//!
//! One invoice per booking, stamped with the hotel profile and itemized with
//! the GST split required for compliance: CGST + SGST for intra-state supply,
//! IGST for inter-state supply. Numbers have the form `PREFIX-YYYYMM-NNNN` and
//! are allocated by [`InvoiceNumberGenerator`]; a unique constraint in the store
//! turns concurrent allocations of the same number into a retry.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use core_kernel::{BookingId, InvoiceId, Money};

use crate::bill::{BillCalculation, BillCalculator};
use crate::booking::Booking;
use crate::error::BillingError;
use crate::ports::{bounded, BillingPorts, InvoicePort};
use crate::settings::BillingSettings;
use crate::tax::TaxConfig;

/// SAC code for hotel accommodation services
pub const ACCOMMODATION_SAC: &str = "996311";

/// Hotel details stamped on every invoice
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HotelProfile {
    pub name: String,
    pub gst_number: Option<String>,
    pub address: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Refunded => "refunded",
        }
    }

    /// Forward transitions; anything else needs an administrative override
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, next),
            (Pending, Sent | PartiallyPaid | Paid | Overdue | Cancelled)
                | (Sent, PartiallyPaid | Paid | Overdue | Cancelled)
                | (PartiallyPaid, Paid | Overdue | Cancelled)
                | (Overdue, PartiallyPaid | Paid | Cancelled)
                | (Paid, Refunded)
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "sent" => Ok(InvoiceStatus::Sent),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            "refunded" => Ok(InvoiceStatus::Refunded),
            other => Err(BillingError::validation(format!("unknown invoice status: {}", other))),
        }
    }
}

/// GST of one line split by supply type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GstSplit {
    pub cgst: Money,
    pub sgst: Money,
    pub igst: Money,
}

impl GstSplit {
    /// Halves for intra-state supply (first half takes the odd paisa), all IGST otherwise
    pub fn of(gst: Money, inter_state: bool) -> Result<Self, BillingError> {
        let zero = Money::zero(gst.currency());
        if inter_state {
            return Ok(Self {
                cgst: zero,
                sgst: zero,
                igst: gst,
            });
        }
        let halves = gst.allocate(2)?;
        match halves.as_slice() {
            [cgst, sgst] => Ok(Self {
                cgst: *cgst,
                sgst: *sgst,
                igst: zero,
            }),
            _ => Err(BillingError::Internal("GST split produced wrong part count".into())),
        }
    }

    pub fn total(&self) -> Money {
        self.cgst + self.sgst + self.igst
    }
}

/// One invoice line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    /// HSN/SAC classification
    pub hsn_code: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub discount: Money,
    pub taxable_amount: Money,
    pub gst_rate: Decimal,
    pub gst: GstSplit,
    /// Service and other taxes of the line
    pub other_tax: Money,
    pub total_tax: Money,
    pub total: Money,
}

/// An issued invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub booking_id: BookingId,
    pub hotel: HotelProfile,
    pub guest_name: String,
    pub room_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceItem>,
    pub base_amount: Money,
    pub discount_amount: Money,
    pub cgst_amount: Money,
    pub sgst_amount: Money,
    pub igst_amount: Money,
    pub service_tax_amount: Money,
    pub other_tax_amount: Money,
    pub total_tax_amount: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub status: InvoiceStatus,
    /// Set exactly when the status enters `paid`
    pub paid_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Builds an unnumbered invoice from a bill
    #[allow(clippy::too_many_arguments)]
    pub fn from_bill(
        booking: &Booking,
        bill: &BillCalculation,
        config: &TaxConfig,
        hotel: HotelProfile,
        inter_state: bool,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        let currency = bill.total_amount.currency();
        let default_rate = if config.enabled {
            config.gst_percentage
        } else {
            Decimal::ZERO
        };

        let mut items = Vec::with_capacity(bill.items.len() + 1);
        let room_gst = GstSplit::of(bill.room_tax.gst_amount, inter_state)?;
        let room_taxable = bill.room_charge - bill.room_discount;
        items.push(InvoiceItem {
            description: format!(
                "Room {} ({}) - {} night(s)",
                booking.room_number, booking.room_type, bill.nights
            ),
            hsn_code: Some(ACCOMMODATION_SAC.to_string()),
            quantity: Decimal::from(bill.nights),
            unit_price: bill.room_rate,
            discount: bill.room_discount,
            taxable_amount: room_taxable,
            gst_rate: default_rate,
            gst: room_gst,
            other_tax: bill.room_tax.service_tax_amount + bill.room_tax.other_tax_amount,
            total_tax: bill.room_tax.total_tax_amount,
            total: room_taxable + bill.room_tax.total_tax_amount,
        });
        for item in &bill.items {
            let tax = item.item_tax(config);
            let gst_rate = match (item.gst_applicable, item.gst_percentage) {
                (false, _) => Decimal::ZERO,
                (true, Some(pct)) => pct,
                (true, None) => default_rate,
            };
            items.push(InvoiceItem {
                description: item.item_name.clone(),
                hsn_code: item.hsn_code.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.applied_discount(),
                taxable_amount: item.net_amount(),
                gst_rate,
                gst: GstSplit::of(tax.gst, inter_state)?,
                other_tax: tax.service_tax + tax.other_tax,
                total_tax: tax.total,
                total: item.final_amount,
            });
        }

        let zero = Money::zero(currency);
        let (mut cgst, mut sgst, mut igst) = (zero, zero, zero);
        for item in &items {
            cgst = cgst + item.gst.cgst;
            sgst = sgst + item.gst.sgst;
            igst = igst + item.gst.igst;
        }

        Ok(Self {
            id: InvoiceId::new_v7(),
            invoice_number: String::new(),
            booking_id: booking.id,
            hotel,
            guest_name: booking.guest_name.clone(),
            room_number: booking.room_number.clone(),
            issue_date,
            due_date,
            items,
            base_amount: bill.base_amount,
            discount_amount: bill.total_discount,
            cgst_amount: cgst,
            sgst_amount: sgst,
            igst_amount: igst,
            service_tax_amount: bill.service_tax_amount,
            other_tax_amount: bill.other_tax_amount,
            total_tax_amount: bill.total_tax,
            total_amount: bill.total_amount,
            amount_paid: zero,
            status: InvoiceStatus::Pending,
            paid_date: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves to `next`, stamping or clearing `paid_date`
    pub fn transition(&mut self, next: InvoiceStatus, override_rules: bool, at: DateTime<Utc>) -> Result<(), BillingError> {
        if next == self.status {
            return Ok(());
        }
        if !override_rules && !self.status.can_transition_to(next) {
            return Err(BillingError::transition(self.status, next));
        }
        if next == InvoiceStatus::Paid {
            self.paid_date = Some(at);
        } else if self.status == InvoiceStatus::Paid && next != InvoiceStatus::Refunded {
            self.paid_date = None;
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    pub fn balance_due(&self) -> Result<Money, BillingError> {
        Ok(self.total_amount.saturating_sub(&self.amount_paid)?)
    }
}

/// Parsed form of `PREFIX-YYYYMM-NNNN`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvoiceNumber {
    pub prefix: String,
    pub year: i32,
    pub month: u32,
    pub sequence: u32,
}

impl InvoiceNumber {
    /// The `YYYYMM` segment
    pub fn year_month(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{:04}", self.prefix, self.year_month(), self.sequence)
    }
}

/// Allocates sequential invoice numbers per prefix and month
#[derive(Clone)]
pub struct InvoiceNumberGenerator {
    invoices: Arc<dyn InvoicePort>,
    settings: BillingSettings,
}

impl InvoiceNumberGenerator {
    pub fn new(invoices: Arc<dyn InvoicePort>, settings: BillingSettings) -> Self {
        Self { invoices, settings }
    }

    /// Formats a number; sequences start at 1
    pub fn format(prefix: &str, date: NaiveDate, sequence: u32) -> String {
        InvoiceNumber {
            prefix: prefix.to_string(),
            year: date.year(),
            month: date.month(),
            sequence,
        }
        .to_string()
    }

    /// Inverse of [`InvoiceNumberGenerator::format`]
    pub fn parse(number: &str) -> Result<InvoiceNumber, BillingError> {
        let invalid = || BillingError::validation(format!("malformed invoice number: {}", number));
        let mut parts = number.rsplitn(3, '-');
        let (Some(sequence), Some(year_month), Some(prefix)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if prefix.is_empty()
            || year_month.len() != 6
            || sequence.len() < 4
            || !year_month.chars().all(|c| c.is_ascii_digit())
            || !sequence.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year: i32 = year_month[..4].parse().map_err(|_| invalid())?;
        let month: u32 = year_month[4..].parse().map_err(|_| invalid())?;
        let sequence: u32 = sequence.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) || sequence == 0 {
            return Err(invalid());
        }
        Ok(InvoiceNumber {
            prefix: prefix.to_string(),
            year,
            month,
            sequence,
        })
    }

    /// Next number for `prefix` in the month of `date`: highest issued plus one
    pub async fn next(&self, prefix: &str, date: NaiveDate) -> Result<InvoiceNumber, BillingError> {
        let year_month = format!("{:04}{:02}", date.year(), date.month());
        let highest = bounded(
            self.settings.operation_timeout,
            "max_invoice_sequence",
            self.invoices.max_invoice_sequence(prefix, &year_month),
        )
        .await?;
        let sequence = highest
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| BillingError::validation("invoice sequence exhausted for the month"))?;
        Ok(InvoiceNumber {
            prefix: prefix.to_string(),
            year: date.year(),
            month: date.month(),
            sequence,
        })
    }
}

/// Creates invoices and tracks their status
#[derive(Clone)]
pub struct InvoiceService {
    ports: BillingPorts,
    settings: BillingSettings,
    bills: BillCalculator,
    numbers: InvoiceNumberGenerator,
}

impl InvoiceService {
    pub fn new(ports: BillingPorts, settings: BillingSettings) -> Self {
        Self {
            bills: BillCalculator::new(ports.clone(), settings.clone()),
            numbers: InvoiceNumberGenerator::new(ports.invoices.clone(), settings.clone()),
            ports,
            settings,
        }
    }

    async fn existing(&self, booking_id: BookingId) -> Result<Option<Invoice>, BillingError> {
        bounded(
            self.settings.operation_timeout,
            "find_invoice_by_booking",
            self.ports.invoices.find_invoice_by_booking(booking_id),
        )
        .await
    }

    /// Returns the booking's invoice, creating and numbering it on first call
    #[instrument(skip(self))]
    pub async fn create_invoice(&self, booking_id: BookingId, created_by: &str) -> Result<Invoice, BillingError> {
        if let Some(invoice) = self.existing(booking_id).await? {
            return Ok(invoice);
        }
        let limit = self.settings.operation_timeout;
        let booking = bounded(limit, "get_booking", self.ports.bookings.get_booking(booking_id)).await?;
        let bill = self.bills.calculate_bill(booking_id).await?;
        let config = bounded(limit, "tax_config", self.ports.hotel.tax_config()).await?;
        let hotel = bounded(limit, "hotel_profile", self.ports.hotel.hotel_profile()).await?;

        let now = Utc::now();
        let issue_date = self.settings.timezone.local_date(now);
        let due_date = issue_date + chrono::Duration::days(i64::from(self.settings.invoice_due_days));
        let mut invoice = Invoice::from_bill(
            &booking,
            &bill,
            &config,
            hotel,
            self.settings.inter_state_supply,
            issue_date,
            due_date,
            created_by,
            now,
        )?;

        let mut attempt = 0;
        loop {
            let number = self.numbers.next(&self.settings.invoice_prefix, issue_date).await?;
            invoice.invoice_number = number.to_string();
            match bounded(limit, "insert_invoice", self.ports.invoices.insert_invoice(&invoice)).await {
                Ok(()) => {
                    info!(invoice_number = %invoice.invoice_number, total = %invoice.total_amount, "invoice created");
                    return Ok(invoice);
                }
                Err(BillingError::Conflict(message)) => {
                    if let Some(existing) = self.existing(booking_id).await? {
                        return Ok(existing);
                    }
                    if attempt >= self.settings.max_conflict_retries {
                        return Err(BillingError::Conflict(message));
                    }
                    attempt += 1;
                    warn!(number = %invoice.invoice_number, attempt, "invoice number taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Changes an invoice's status; `override_rules` allows any transition
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        invoice_id: InvoiceId,
        status: InvoiceStatus,
        override_rules: bool,
    ) -> Result<Invoice, BillingError> {
        let limit = self.settings.operation_timeout;
        let mut invoice = bounded(limit, "get_invoice", self.ports.invoices.get_invoice(invoice_id)).await?;
        let from = invoice.status;
        invoice.transition(status, override_rules, Utc::now())?;
        bounded(limit, "update_invoice", self.ports.invoices.update_invoice(&invoice)).await?;
        if override_rules && !from.can_transition_to(status) && from != status {
            warn!(%from, to = %status, "invoice status overridden");
        }
        Ok(invoice)
    }

    /// Adds a payment to the invoice and advances it to `partially_paid` or `paid`
    #[instrument(skip(self))]
    pub async fn record_payment(&self, invoice_id: InvoiceId, amount: Money) -> Result<Invoice, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation("payment amount must be positive"));
        }
        let limit = self.settings.operation_timeout;
        let mut invoice = bounded(limit, "get_invoice", self.ports.invoices.get_invoice(invoice_id)).await?;
        invoice.amount_paid = invoice.amount_paid.checked_add(&amount)?;
        let next = if invoice.amount_paid.amount() >= invoice.total_amount.amount() {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };
        invoice.transition(next, false, Utc::now())?;
        bounded(limit, "update_invoice", self.ports.invoices.update_invoice(&invoice)).await?;
        info!(paid = %invoice.amount_paid, status = %invoice.status, "invoice payment recorded");
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_number_format_and_parse() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 17).unwrap();
        let number = InvoiceNumberGenerator::format("HTL", date, 1);
        assert_eq!(number, "HTL-202406-0001");
        let parsed = InvoiceNumberGenerator::parse(&number).unwrap();
        assert_eq!(parsed.sequence, 1);
        assert_eq!(parsed.year_month(), "202406");
        assert_eq!(parsed.to_string(), number);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "HTL", "HTL-2024-0001", "HTL-202413-0001", "HTL-202406-01", "-202406-0001", "HTL-202406-0000"] {
            assert!(InvoiceNumberGenerator::parse(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_gst_split_intra_state_sums_exactly() {
        let gst = Money::new(dec!(180.05), Currency::INR);
        let split = GstSplit::of(gst, false).unwrap();
        assert_eq!(split.cgst.amount(), dec!(90.03));
        assert_eq!(split.sgst.amount(), dec!(90.02));
        assert_eq!(split.total(), gst);
    }

    #[test]
    fn test_gst_split_inter_state() {
        let gst = Money::new(dec!(360), Currency::INR);
        let split = GstSplit::of(gst, true).unwrap();
        assert_eq!(split.igst, gst);
        assert!(split.cgst.is_zero());
    }

    #[test]
    fn test_status_rules() {
        use InvoiceStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Paid));
    }
}
