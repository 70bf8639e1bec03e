//! Tests for strongly-typed identifiers

use core_kernel::{AccountId, BookingId, InvoiceId, OutboxJobId, UserId};
use std::collections::HashSet;
use uuid::Uuid;

#[test]
fn test_prefixes() {
    assert_eq!(BookingId::prefix(), "BKG");
    assert_eq!(AccountId::prefix(), "ACC");
    assert_eq!(InvoiceId::prefix(), "INV");
    assert_eq!(UserId::prefix(), "USR");
    assert_eq!(OutboxJobId::prefix(), "JOB");
}

#[test]
fn test_new_ids_are_unique() {
    let ids: HashSet<BookingId> = (0..1000).map(|_| BookingId::new()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn test_v7_ids_are_time_ordered() {
    let first = OutboxJobId::new_v7();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = OutboxJobId::new_v7();
    assert!(first < second);
}

#[test]
fn test_parse_with_and_without_prefix() {
    let uuid = Uuid::new_v4();
    let with_prefix: AccountId = format!("ACC-{}", uuid).parse().unwrap();
    let without: AccountId = uuid.to_string().parse().unwrap();
    assert_eq!(with_prefix, without);
    assert_eq!(*with_prefix.as_uuid(), uuid);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!("ACC-not-a-uuid".parse::<AccountId>().is_err());
}

#[test]
fn test_serde_is_transparent() {
    let uuid = Uuid::new_v4();
    let id = UserId::from_uuid(uuid);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", uuid));
    let back: UserId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
