//! # till-core: Pure Ledger Logic
//!
//! Business rules of the till ledger as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till Ledger Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              till-sync (engines, scheduler, hub)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ reconcile │  │    day    │  │  totals   │  │   │
//! │  │   │   Sale    │  │  status   │  │ Business  │  │ Register  │  │   │
//! │  │   │  Payment  │  │  machine  │  │   Day     │  │  Totals   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    till-db (Ledger Store)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, Payment, ClosingRecord, ...)
//! - [`money`] - Money type with integer arithmetic
//! - [`reconcile`] - Payment status transitions
//! - [`day`] - Local business-day boundaries
//! - [`totals`] - Folding aggregate rows into per-register totals
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::{reconcile, PaymentStatus};
//!
//! let outcome = reconcile::apply_payment(7, 1000, 0, 400).unwrap();
//! assert_eq!(outcome.status, PaymentStatus::PartiallyPaid);
//! assert_eq!(outcome.outstanding_cents, 600);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod day;
pub mod error;
pub mod money;
pub mod reconcile;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use day::BusinessDay;
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use totals::{MethodTotal, RegisterTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Timezone used when no deployment timezone is configured.
pub const DEFAULT_TIMEZONE: &str = "America/Argentina/Cordoba";

/// Maximum line items accepted on a single sale.
pub const MAX_SALE_LINES: usize = 500;

/// Width of the numeric suffix of a payment sequence number (`YYYYMMDD-NNNN`).
pub const SEQUENCE_DIGITS: usize = 4;
