//! # Payment Reconciliation Rules
//!
//! Pure transitions of a sale's paid/outstanding/status triple. The store
//! runs these inside the transaction that reads the sale, so the numbers fed
//! in are always the committed ones.
//!
//! ```text
//! apply_payment(sale, total, paid, amount) incremental, at payment creation
//! recompute(current, total, amounts)       from the full payment set
//! settle(current, total, paid)             shared status rule
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::PaymentStatus;

/// What changed on a sale, used to pick the real-time event sent to tills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleChange {
    /// Outstanding reached zero.
    Paid,
    /// Money received, balance remains.
    PartiallyPaid,
    /// Marked to be paid another day.
    Deferred,
    /// Any other mutation (corrections, edits).
    Updated,
}

/// New balance of a sale after a reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub paid_cents: i64,
    pub outstanding_cents: i64,
    pub status: PaymentStatus,
}

impl Reconciled {
    /// Event kind for an incremental payment.
    pub fn change(&self) -> SaleChange {
        match self.status {
            PaymentStatus::FullyPaid => SaleChange::Paid,
            _ => SaleChange::PartiallyPaid,
        }
    }
}

/// Status implied by a balance, without resetting decisions nobody reversed.
///
/// - something paid and nothing owed → `FullyPaid`
/// - something paid → `PartiallyPaid`
/// - nothing paid → `Pending`, `Deferred` and `CreditAccount` are kept,
///   payment-derived statuses fall back to `Pending`
pub fn settle(current: PaymentStatus, total: Money, paid: Money) -> PaymentStatus {
    if paid.is_positive() {
        if total.outstanding_after(paid).is_zero() {
            PaymentStatus::FullyPaid
        } else {
            PaymentStatus::PartiallyPaid
        }
    } else {
        match current {
            PaymentStatus::Pending | PaymentStatus::Deferred | PaymentStatus::CreditAccount => {
                current
            }
            PaymentStatus::FullyPaid | PaymentStatus::PartiallyPaid => PaymentStatus::Pending,
        }
    }
}

/// Applies one new payment.
///
/// The amount must be positive and no larger than the current outstanding
/// balance.
pub fn apply_payment(
    sale_id: i64,
    total_cents: i64,
    paid_cents: i64,
    amount_cents: i64,
) -> CoreResult<Reconciled> {
    if amount_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into());
    }

    let total = Money::from_cents(total_cents);
    let outstanding = total.outstanding_after(Money::from_cents(paid_cents));
    if amount_cents > outstanding.cents() {
        return Err(CoreError::PaymentExceedsOutstanding {
            sale_id,
            amount: amount_cents,
            outstanding: outstanding.cents(),
        });
    }

    let new_paid = Money::from_cents(paid_cents + amount_cents);
    let new_outstanding = total.outstanding_after(new_paid);
    let status = if new_outstanding.is_zero() {
        PaymentStatus::FullyPaid
    } else {
        PaymentStatus::PartiallyPaid
    };

    Ok(Reconciled {
        paid_cents: new_paid.cents(),
        outstanding_cents: new_outstanding.cents(),
        status,
    })
}

/// Rebuilds the balance from every payment currently recorded for the sale.
///
/// Used after corrections and deletions; never derives `paid` from a delta.
pub fn recompute<I>(current: PaymentStatus, total_cents: i64, amounts: I) -> Reconciled
where
    I: IntoIterator<Item = i64>,
{
    let total = Money::from_cents(total_cents);
    let paid: Money = amounts.into_iter().map(Money::from_cents).sum();
    Reconciled {
        paid_cents: paid.cents(),
        outstanding_cents: total.outstanding_after(paid).cents(),
        status: settle(current, total, paid),
    }
}

/// Marks an open sale to be paid another day.
pub fn defer(sale_id: i64, current: PaymentStatus) -> CoreResult<PaymentStatus> {
    if current.is_open() {
        Ok(PaymentStatus::Deferred)
    } else {
        Err(CoreError::InvalidSaleStatus {
            sale_id,
            status: current.to_string(),
        })
    }
}
