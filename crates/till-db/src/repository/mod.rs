//! # Repository Module
//!
//! Repositories of the ledger store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Engine (till-sync)                                                     │
//! │       │                                                                 │
//! │       │  db.payments().record(&new, now)                               │
//! │       ▼                                                                 │
//! │  PaymentRepository                                                     │
//! │  └── one transaction:                                                  │
//! │        BEGIN IMMEDIATE (takes the write lock)                          │
//! │        read committed balance                                          │
//! │        till_core::reconcile::apply_payment                             │
//! │        insert payment + update sale                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every read-modify-write opens with `BEGIN IMMEDIATE` ([`begin_write`]),
//! so it holds the write lock before its first read. SQLite grants one
//! writer at a time: two payments on the same sale commit one after the
//! other, each seeing the other's result, and a deferred read never has to
//! be upgraded while another connection commits (which SQLite refuses with
//! "database is locked" instead of waiting).
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Registers, businesses, payment methods
//! - [`sale::SaleRepository`] - Sales, lines, deferral, snapshots
//! - [`payment::PaymentRepository`] - Payments and sale reconciliation
//! - [`expense::ExpenseRepository`] - Register expenses
//! - [`closing::ClosingRepository`] - Closing records and promotion
//! - [`totals::TotalsRepository`] - Unclosed per-register totals

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::DbResult;

pub mod catalog;
pub mod closing;
pub mod expense;
pub mod payment;
pub mod sale;
pub mod totals;

#[cfg(test)]
pub(crate) mod fixtures;

/// Opens a transaction that takes the write lock up front. Waits up to the
/// pool's busy timeout for another writer to finish.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
