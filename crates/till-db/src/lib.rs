//! # till-db: Ledger Store
//!
//! Persistence of sales, payments, expenses and closing records on SQLite
//! with sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till Ledger Data Flow                            │
//! │                                                                         │
//! │  Engine call (record payment, close register, snapshot)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ SaleRepo      │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ PaymentRepo   │    │   _schema    │  │   │
//! │  │   │ + timezone    │    │ ClosingRepo   │    │              │  │   │
//! │  │   │               │    │ TotalsRepo .. │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("till.db").timezone(tz)).await?;
//! let write = db.payments().record(&new_payment, Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::closing::{ClosingGuard, ClosingRepository};
pub use repository::expense::ExpenseRepository;
pub use repository::payment::{PaymentRepository, PaymentWrite};
pub use repository::sale::{SaleRepository, SaleUpdate};
pub use repository::totals::TotalsRepository;
