//! Test Data Builders
//!
//! Provides builder patterns for constructing test data with sensible defaults.
//! These builders allow tests to specify only the relevant fields while using
//! defaults for everything else.

use chrono::{DateTime, Duration, Utc};
use core_kernel::{BillItemId, BookingId, Money, PaymentId, RoomId, ServiceId, UserId};
use domain_billing::{
    BillItem, Booking, BookingPaymentStatus, BookingSource, Payment, PaymentMethod, PaymentStatus, ServiceCategory,
    TaxConfig, UserRef,
};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal::Decimal;

use crate::fixtures::{MoneyFixtures, StringFixtures, TemporalFixtures};

/// Builder for constructing test bookings
pub struct TestBookingBuilder {
    id: BookingId,
    room_number: String,
    room_type: String,
    room_price: Money,
    guest_name: String,
    guest_user_id: Option<UserId>,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    source: BookingSource,
    room_base_amount: Option<Money>,
    room_discount: Option<Money>,
    payment_status: BookingPaymentStatus,
}

impl Default for TestBookingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBookingBuilder {
    /// Creates a new builder for a two-night pending stay
    pub fn new() -> Self {
        Self {
            id: BookingId::new_v7(),
            room_number: StringFixtures::room_number().to_string(),
            room_type: StringFixtures::room_type().to_string(),
            room_price: MoneyFixtures::nightly_rate(),
            guest_name: StringFixtures::guest_name().to_string(),
            guest_user_id: None,
            check_in: TemporalFixtures::check_in(),
            check_out: TemporalFixtures::check_out(),
            source: BookingSource::Website,
            room_base_amount: None,
            room_discount: None,
            payment_status: BookingPaymentStatus::Pending,
        }
    }

    pub fn with_id(mut self, id: BookingId) -> Self {
        self.id = id;
        self
    }

    pub fn with_room_number(mut self, number: impl Into<String>) -> Self {
        self.room_number = number.into();
        self
    }

    /// Sets the nightly rate
    pub fn with_room_price(mut self, price: Money) -> Self {
        self.room_price = price;
        self
    }

    /// Uses a generated guest name
    pub fn with_random_guest(mut self) -> Self {
        self.guest_name = Name().fake();
        self
    }

    pub fn with_guest_name(mut self, name: impl Into<String>) -> Self {
        self.guest_name = name.into();
        self
    }

    pub fn with_guest_user(mut self, user: UserId) -> Self {
        self.guest_user_id = Some(user);
        self
    }

    /// Sets check-in and a check-out `nights` days later
    pub fn staying(mut self, check_in: DateTime<Utc>, nights: i64) -> Self {
        self.check_in = check_in;
        self.check_out = check_in + Duration::days(nights);
        self
    }

    pub fn with_source(mut self, source: BookingSource) -> Self {
        self.source = source;
        self
    }

    /// Sets a negotiated room charge that replaces rate times nights
    pub fn with_room_base_amount(mut self, amount: Money) -> Self {
        self.room_base_amount = Some(amount);
        self
    }

    pub fn with_room_discount(mut self, discount: Money) -> Self {
        self.room_discount = Some(discount);
        self
    }

    pub fn with_payment_status(mut self, status: BookingPaymentStatus) -> Self {
        self.payment_status = status;
        self
    }

    /// Builds the booking without stored totals
    pub fn build(self) -> Booking {
        let currency = self.room_price.currency();
        Booking {
            id: self.id,
            room_id: RoomId::new(),
            room_number: self.room_number,
            room_type: self.room_type,
            room_price: self.room_price,
            guest_name: self.guest_name,
            guest_user_id: self.guest_user_id,
            check_in: self.check_in,
            check_out: self.check_out,
            source: self.source,
            room_base_amount: self.room_base_amount,
            room_discount: self.room_discount.unwrap_or_else(|| Money::zero(currency)),
            totals: None,
            payment_status: self.payment_status,
            paid_at: None,
            created_at: self.check_in,
            updated_at: self.check_in,
        }
    }
}

/// Builder for constructing test bill items
pub struct TestBillItemBuilder {
    booking_id: BookingId,
    service_id: Option<ServiceId>,
    service_category: Option<ServiceCategory>,
    item_name: String,
    quantity: Decimal,
    unit_price: Money,
    discount: Option<Money>,
    gst_applicable: bool,
    gst_percentage: Option<Decimal>,
}

impl TestBillItemBuilder {
    /// Creates a new builder for one taxable item on `booking_id`
    pub fn new(booking_id: BookingId) -> Self {
        Self {
            booking_id,
            service_id: None,
            service_category: None,
            item_name: "Dinner".to_string(),
            quantity: Decimal::ONE,
            unit_price: MoneyFixtures::dinner(),
            discount: None,
            gst_applicable: true,
            gst_percentage: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.item_name = name.into();
        self
    }

    /// Links the item to a service of the given category
    pub fn for_service(mut self, service_id: ServiceId, category: ServiceCategory) -> Self {
        self.service_id = Some(service_id);
        self.service_category = Some(category);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_unit_price(mut self, price: Money) -> Self {
        self.unit_price = price;
        self
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = Some(discount);
        self
    }

    pub fn tax_exempt(mut self) -> Self {
        self.gst_applicable = false;
        self
    }

    /// Fixes the GST rate of this item
    pub fn with_gst_percentage(mut self, percentage: Decimal) -> Self {
        self.gst_percentage = Some(percentage);
        self
    }

    /// Builds the item priced under `config`
    pub fn build(self, config: &TaxConfig) -> BillItem {
        let zero = Money::zero(self.unit_price.currency());
        let now = TemporalFixtures::check_in();
        BillItem {
            id: BillItemId::new_v7(),
            booking_id: self.booking_id,
            service_id: self.service_id,
            service_category: self.service_category,
            item_name: self.item_name,
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount: self.discount.unwrap_or(zero),
            gst_applicable: self.gst_applicable,
            gst_percentage: self.gst_percentage,
            hsn_code: None,
            total_price: zero,
            tax_amount: zero,
            final_amount: zero,
            created_at: now,
            updated_at: now,
        }
        .priced(config)
    }
}

/// Builder for constructing recorded payments
pub struct TestPaymentBuilder {
    booking_id: BookingId,
    amount: Money,
    method: PaymentMethod,
    status: PaymentStatus,
    received_by: Option<String>,
    paid_at: DateTime<Utc>,
}

impl TestPaymentBuilder {
    /// A completed cash payment
    pub fn new(booking_id: BookingId, amount: Money) -> Self {
        Self {
            booking_id,
            amount,
            method: PaymentMethod::Cash,
            status: PaymentStatus::Completed,
            received_by: None,
            paid_at: TemporalFixtures::evening_of_checkout(),
        }
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn received_by(mut self, staff: impl Into<String>) -> Self {
        self.received_by = Some(staff.into());
        self
    }

    pub fn paid_at(mut self, at: DateTime<Utc>) -> Self {
        self.paid_at = at;
        self
    }

    pub fn build(self) -> Payment {
        Payment {
            id: PaymentId::new_v7(),
            booking_id: self.booking_id,
            amount: self.amount,
            method: self.method,
            reference: None,
            received_by: self.received_by,
            notes: None,
            status: self.status,
            paid_at: self.paid_at,
            original_amount: None,
            modification_reason: None,
            created_at: self.paid_at,
            updated_at: self.paid_at,
        }
    }
}

/// Builder for staff users
pub struct TestUserBuilder {
    name: String,
    email: Option<String>,
    is_active: bool,
}

impl Default for TestUserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestUserBuilder {
    /// An active user with a generated name and email
    pub fn new() -> Self {
        Self {
            name: Name().fake(),
            email: Some(SafeEmail().fake()),
            is_active: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn build(self) -> UserRef {
        UserRef {
            id: UserId::new_v7(),
            name: self.name,
            email: self.email,
            is_active: self.is_active,
        }
    }
}
