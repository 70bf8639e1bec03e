//! Strongly-typed identifiers for domain entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Stay and booking identifiers
define_id!(BookingId, "BKG");
define_id!(RoomId, "RM");
define_id!(UserId, "USR");

// Folio identifiers
define_id!(BillItemId, "BIL");
define_id!(ServiceId, "SVC");
define_id!(InvoiceId, "INV");
define_id!(PaymentId, "PAY");

// Ledger identifiers
define_id!(AccountId, "ACC");
define_id!(TransactionId, "TXN");

// Reporting and background identifiers
define_id!(ReportId, "RPT");
define_id!(GuestAccessId, "GBA");
define_id!(OutboxJobId, "JOB");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_id_display() {
        let id = BookingId::new();
        let display = id.to_string();
        assert!(display.starts_with("BKG-"));
    }

    #[test]
    fn test_id_parsing() {
        let original = AccountId::new();
        let parsed: AccountId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);

        let bare: AccountId = original.as_uuid().to_string().parse().unwrap();
        assert_eq!(original, bare);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let booking_id = BookingId::from(uuid);
        let back: Uuid = booking_id.into();
        assert_eq!(uuid, back);
    }

    #[test]
    fn test_ids_order_by_uuid() {
        let a = AccountId::from_uuid(Uuid::from_u128(1));
        let b = AccountId::from_uuid(Uuid::from_u128(2));
        assert!(a < b);
    }
}
