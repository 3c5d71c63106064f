//! # Domain Types
//!
//! Core domain types of the till ledger.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Register     │◄──│      Sale       │◄──│    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  sale_number    │   │  sale_id (opt)  │       │
//! │  │  name           │   │  lines          │   │  amount_cents   │       │
//! │  └────────┬────────┘   │  total / paid   │   │  method         │       │
//! │           │            │  outstanding    │   │  sequence_number│       │
//! │           │            │  payment_status │   └─────────────────┘       │
//! │           │            └─────────────────┘                              │
//! │           │                                                             │
//! │           │            ┌─────────────────┐   ┌─────────────────┐       │
//! │           └───────────►│  ClosingRecord  │──►│  MethodTotal    │       │
//! │                        │  status         │   │  (breakdown)    │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are store-assigned integers; tills select their register by
//! that number when they connect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::totals::MethodTotal;

// =============================================================================
// Payment Status
// =============================================================================

/// Where a sale stands against the money received for it.
///
/// ## Transitions
/// ```text
///                  payment < outstanding
///   PENDING ─────────────────────────────► PARTIALLY_PAID
///     │  │                                    │      ▲
///     │  │ payment == outstanding             │      │ more payments
///     │  └──────────────┐                     │      │
///     │                 ▼                     ▼      │
///     │            FULLY_PAID ◄───────────────┴──────┘
///     │
///     │ defer                 credit-account business
///     ▼                       (initial status)
///   DEFERRED                  CREDIT_ACCOUNT
/// ```
/// The legacy numeric codes 1..5 are kept for data exchanged with older tills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Nothing received yet.
    Pending,
    /// Outstanding reached zero.
    FullyPaid,
    /// Customer will pay another day.
    Deferred,
    /// Sale of a credit-account business, billed on account.
    CreditAccount,
    /// Some money received, some still owed.
    PartiallyPaid,
}

impl PaymentStatus {
    /// All statuses that still carry an outstanding balance.
    pub const OPEN: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Deferred,
        PaymentStatus::CreditAccount,
        PaymentStatus::PartiallyPaid,
    ];

    /// Non-final statuses.
    #[inline]
    pub fn is_open(&self) -> bool {
        !matches!(self, PaymentStatus::FullyPaid)
    }

    /// Numeric code used by older tills.
    pub const fn legacy_code(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 1,
            PaymentStatus::FullyPaid => 2,
            PaymentStatus::Deferred => 3,
            PaymentStatus::CreditAccount => 4,
            PaymentStatus::PartiallyPaid => 5,
        }
    }

    /// Parses a numeric code used by older tills.
    pub const fn from_legacy_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PaymentStatus::Pending),
            2 => Some(PaymentStatus::FullyPaid),
            3 => Some(PaymentStatus::Deferred),
            4 => Some(PaymentStatus::CreditAccount),
            5 => Some(PaymentStatus::PartiallyPaid),
            _ => None,
        }
    }

    /// Stored representation (matches the serde and sqlx encoding).
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::FullyPaid => "FULLY_PAID",
            PaymentStatus::Deferred => "DEFERRED",
            PaymentStatus::CreditAccount => "CREDIT_ACCOUNT",
            PaymentStatus::PartiallyPaid => "PARTIALLY_PAID",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A recorded transaction with line items and a running payment status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: i64,

    /// Human-readable number printed on the ticket.
    pub sale_number: String,

    pub business_id: i64,

    /// Register that owns the sale; `None` until assigned.
    pub register_id: Option<i64>,

    pub lines: Vec<SaleLine>,

    pub total_cents: i64,

    pub paid_cents: i64,

    /// Always `max(0, total - paid)`.
    pub outstanding_cents: i64,

    pub payment_status: PaymentStatus,

    /// Free-text note, stored uppercased.
    pub note: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn paid(&self) -> Money {
        Money::from_cents(self.paid_cents)
    }

    #[inline]
    pub fn outstanding(&self) -> Money {
        Money::from_cents(self.outstanding_cents)
    }

    /// Still carries a balance or an undecided status.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.payment_status.is_open()
    }
}

/// One line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    pub id: i64,
    pub product_id: i64,
    /// Product name at the time of sale.
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// `quantity * unit_price_cents`.
    pub subtotal_cents: i64,
}

/// Line item as submitted by a till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSaleLine {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl NewSaleLine {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Input for creating a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSale {
    pub sale_number: String,
    pub business_id: i64,
    pub register_id: Option<i64>,
    pub lines: Vec<NewSaleLine>,
    pub note: Option<String>,
}

/// Direct edit of an existing sale. Lines are replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEdit {
    pub business_id: i64,
    pub register_id: Option<i64>,
    pub lines: Vec<NewSaleLine>,
    pub note: Option<String>,
}

/// Sum of line subtotals.
pub fn lines_total(lines: &[NewSaleLine]) -> Money {
    lines.iter().map(NewSaleLine::subtotal).sum()
}

/// Notes are stored trimmed and uppercased; blank notes are dropped.
pub fn normalize_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_uppercase)
}

// =============================================================================
// Payment
// =============================================================================

/// Money applied toward a sale or recorded on its own (general deposit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub sale_id: Option<i64>,
    pub amount_cents: i64,
    pub method_id: i64,
    /// Method name as stored in the catalog.
    pub method_name: String,
    pub register_id: i64,
    pub business_id: i64,
    /// `YYYYMMDD-NNNN`, unique per local day.
    pub sequence_number: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub sale_id: Option<i64>,
    pub amount_cents: i64,
    pub method_id: i64,
    pub register_id: i64,
    pub business_id: i64,
}

/// Authorized correction of a recorded payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCorrection {
    pub amount_cents: i64,
    /// Keeps the current method when `None`.
    pub method_id: Option<i64>,
}

/// A payment method from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: i64,
    pub name: String,
}

// =============================================================================
// Register, Business, Expense
// =============================================================================

/// A point-of-sale till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: i64,
    pub name: String,
}

/// A counterparty sales are made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: i64,
    pub name: String,
    /// Sales default to `CREDIT_ACCOUNT` instead of `PENDING`.
    pub credit_account: bool,
}

impl Business {
    /// Status a new sale for this business starts in.
    pub fn initial_sale_status(&self) -> PaymentStatus {
        if self.credit_account {
            PaymentStatus::CreditAccount
        } else {
            PaymentStatus::Pending
        }
    }
}

/// Cash taken out of a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: i64,
    pub register_id: i64,
    pub amount_cents: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an expense.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub register_id: i64,
    pub amount_cents: i64,
    pub description: String,
}

// =============================================================================
// Closing
// =============================================================================

/// Lifecycle of a closing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "kebab-case"))]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum ClosingStatus {
    /// Written by the scheduler, waiting for an operator to confirm.
    AutomaticPending,
    /// Definitive; its payments are immutable.
    Closed,
}

impl ClosingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClosingStatus::AutomaticPending => "automatic-pending",
            ClosingStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ClosingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-day snapshot of a register's totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ClosingRecord {
    pub id: i64,
    pub register_id: i64,
    pub operator_id: Option<i64>,
    /// The cutoff: activity at or before this instant belongs to the record.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    /// When an operator promoted the record to closed.
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    /// `collected + credit_account`.
    pub total_sales_cents: i64,
    pub collected_cents: i64,
    pub cash_cents: i64,
    pub credit_account_cents: i64,
    pub expenses_cents: i64,
    pub net_cash_income_cents: i64,
    pub status: ClosingStatus,
    /// Per-method amounts; sums to `collected_cents`.
    pub breakdown: Vec<MethodTotal>,
}

impl ClosingRecord {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status == ClosingStatus::Closed
    }

    #[inline]
    pub fn collected(&self) -> Money {
        Money::from_cents(self.collected_cents)
    }
}

/// Result of a closing attempt that may be skipped by the idempotency guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosingOutcome {
    /// A new record was written.
    Created(ClosingRecord),
    /// The register already had a record today; nothing was written.
    Skipped { register_id: i64, existing_id: i64 },
}

impl ClosingOutcome {
    pub fn register_id(&self) -> i64 {
        match self {
            ClosingOutcome::Created(record) => record.register_id,
            ClosingOutcome::Skipped { register_id, .. } => *register_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_codes_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::FullyPaid,
            PaymentStatus::Deferred,
            PaymentStatus::CreditAccount,
            PaymentStatus::PartiallyPaid,
        ] {
            assert_eq!(PaymentStatus::from_legacy_code(status.legacy_code()), Some(status));
        }
        assert_eq!(PaymentStatus::from_legacy_code(0), None);
        assert_eq!(PaymentStatus::from_legacy_code(6), None);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&PaymentStatus::PartiallyPaid).unwrap();
        assert_eq!(json, "\"PARTIALLY_PAID\"");
        let json = serde_json::to_string(&ClosingStatus::AutomaticPending).unwrap();
        assert_eq!(json, "\"automatic-pending\"");
    }

    #[test]
    fn test_open_statuses() {
        assert!(PaymentStatus::OPEN.iter().all(PaymentStatus::is_open));
        assert!(!PaymentStatus::FullyPaid.is_open());
    }

    #[test]
    fn test_initial_status_by_business() {
        let retail = Business {
            id: 1,
            name: "Mostrador".into(),
            credit_account: false,
        };
        let account = Business {
            id: 2,
            name: "Hotel".into(),
            credit_account: true,
        };
        assert_eq!(retail.initial_sale_status(), PaymentStatus::Pending);
        assert_eq!(account.initial_sale_status(), PaymentStatus::CreditAccount);
    }

    #[test]
    fn test_lines_total_and_note() {
        let lines = vec![
            NewSaleLine {
                product_id: 1,
                product_name: "Pan".into(),
                quantity: 3,
                unit_price_cents: 250,
            },
            NewSaleLine {
                product_id: 2,
                product_name: "Leche".into(),
                quantity: 1,
                unit_price_cents: 400,
            },
        ];
        assert_eq!(lines_total(&lines).cents(), 1150);

        assert_eq!(normalize_note(Some("  sin sal ")), Some("SIN SAL".to_string()));
        assert_eq!(normalize_note(Some("   ")), None);
        assert_eq!(normalize_note(None), None);
    }
}
