//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for billing types that give
//! more meaningful error messages than standard assertions.

use core_kernel::Money;
use domain_billing::{Account, BillCalculation, Transaction, TransactionType};
use rust_decimal::Decimal;

/// Asserts that two Money values are approximately equal within a tolerance
///
/// # Arguments
///
/// * `actual` - The actual Money value
/// * `expected` - The expected Money value
/// * `tolerance` - The allowed difference in the amount
///
/// # Panics
///
/// Panics if the currencies don't match or the amounts differ by more than tolerance
pub fn assert_money_approx_eq(actual: &Money, expected: &Money, tolerance: Decimal) {
    assert_eq!(
        actual.currency(),
        expected.currency(),
        "Currency mismatch: actual={}, expected={}",
        actual.currency(),
        expected.currency()
    );

    let diff = (actual.amount() - expected.amount()).abs();
    assert!(
        diff <= tolerance,
        "Money amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual.amount(),
        expected.amount(),
        diff,
        tolerance
    );
}

/// Asserts that a Money value carries exactly `expected` in its currency
pub fn assert_money_eq(actual: &Money, expected: Decimal) {
    assert_eq!(
        actual.amount(),
        expected,
        "Expected {} {}, got {} {}",
        actual.currency().symbol(),
        expected,
        actual.currency().symbol(),
        actual.amount()
    );
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(
        money.is_zero(),
        "Expected zero money, got {} {}",
        money.currency().symbol(),
        money.amount()
    );
}

/// Asserts that money values sum to a total
///
/// # Panics
///
/// Panics if the sum doesn't equal the total
pub fn assert_money_sum_equals(parts: &[Money], total: &Money) {
    let sum = parts.iter().fold(Money::zero(total.currency()), |acc, m| {
        acc.checked_add(m).expect("Currency mismatch in sum")
    });

    assert_eq!(
        sum.amount(),
        total.amount(),
        "Sum of parts ({}) doesn't equal total ({})",
        sum.amount(),
        total.amount()
    );
}

/// Asserts the arithmetic that ties a bill's figures together
///
/// `subtotal = base - discount`, `total_tax` is the sum of its components and
/// `total = subtotal + total_tax`.
pub fn assert_bill_consistent(bill: &BillCalculation) {
    let subtotal = bill.base_amount.checked_sub(&bill.total_discount).expect("Currency mismatch in bill");
    assert_eq!(
        bill.subtotal, subtotal,
        "Subtotal {} is not base {} minus discount {}",
        bill.subtotal, bill.base_amount, bill.total_discount
    );

    assert_money_sum_equals(
        &[bill.gst_amount, bill.service_tax_amount, bill.other_tax_amount],
        &bill.total_tax,
    );
    assert_money_sum_equals(&[bill.subtotal, bill.total_tax], &bill.total_amount);
}

/// Asserts that an account balance equals its credits minus its debits
pub fn assert_balance_matches_transactions(account: &Account, transactions: &[Transaction]) {
    let currency = account.balance.currency();
    let net = transactions
        .iter()
        .filter(|t| t.account_id == account.id)
        .fold(Decimal::ZERO, |acc, t| match t.transaction_type {
            TransactionType::Credit => acc + t.amount.amount(),
            TransactionType::Debit => acc - t.amount.amount(),
        });

    assert_eq!(
        account.balance.amount(),
        net,
        "Balance of {} is {} {} but its transactions net to {}",
        account.name,
        currency.symbol(),
        account.balance.amount(),
        net
    );
}

/// Asserts that a decimal value is approximately equal to another
pub fn assert_decimal_approx_eq(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "Decimals differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual,
        expected,
        diff,
        tolerance
    );
}

/// Asserts that a result is Ok and returns the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Asserts that a result is Err and returns the error
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => panic!("{}: got Ok({:?})", $msg, value),
            Err(e) => e,
        }
    };
}

/// Asserts that an error matches a specific variant
#[macro_export]
macro_rules! assert_err_variant {
    ($result:expr, $pattern:pat) => {
        match $result {
            Ok(value) => panic!("Expected Err matching {}, got Ok({:?})", stringify!($pattern), value),
            Err(ref e) => {
                assert!(
                    matches!(e, $pattern),
                    "Error {:?} does not match pattern {}",
                    e,
                    stringify!($pattern)
                );
            }
        }
    };
}
