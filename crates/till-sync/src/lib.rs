//! # till-sync: Ledger Engines and Real-Time Hub
//!
//! Everything that runs on top of the ledger store: payment reconciliation,
//! register totals, closings, the daily closing scheduler and the WebSocket
//! hub that keeps every till's sale list current.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till Ledger Engines                              │
//! │                                                                         │
//! │  back office / till API                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │PaymentReconciler│ │   SaleDesk     │  │  ClosingEngine         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ record/correct │  │ create/edit/   │  │ create, promote,       │    │
//! │  │ defer/remove   │  │ remove sales   │  │ expenses, history      │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │ SaleEvent (after commit)                  │                  │
//! │          ▼                   ▼                       │                  │
//! │  ┌─────────────────────────────────────┐  ┌──────────┴─────────────┐   │
//! │  │ SyncHub actor                       │  │ RegisterTotalsAggregator│  │
//! │  │  per-register subscribers           │  │  unclosed totals       │   │
//! │  │  per-register snapshot cache        │  └──────────┬─────────────┘   │
//! │  └──────────────┬──────────────────────┘             │                  │
//! │                 │                        ┌───────────┴────────────┐    │
//! │  ┌──────────────▼──────────────────────┐ │ ClosingScheduler       │    │
//! │  │ HubServer (axum)                    │ │  daily timer, run_now  │    │
//! │  │  GET /ws?register_id=N  GET /health │ │  bounded retries       │    │
//! │  └─────────────────────────────────────┘ └────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engines
//! - [`reconciliation`] - Payments against sales, closed-period protection
//! - [`sales`] - Direct sale edits from the back office
//! - [`aggregator`] - Per-register totals since the last closed record
//! - [`closing`] - Closing records and promotion
//! - [`scheduler`] - Daily automatic closing
//!
//! ### Real-Time
//! - [`hub`] - Per-register WebSocket distribution
//! - [`protocol`] - Messages sent to tills
//!
//! ### Support
//! - [`config`] - TOML configuration with env overrides
//! - [`schedule`] - Daily trigger time in the business timezone
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_sync::{HubServer, PaymentReconciler, SyncHub, TillConfig};
//!
//! let config = TillConfig::load_or_default(None);
//! let hub = SyncHub::new(Arc::new(db.clone()), config.timezone()?).start();
//! let server = HubServer::new(config.hub.clone(), hub.clone()).start().await?;
//!
//! let reconciler = PaymentReconciler::new(db, hub);
//! reconciler.record_payment(&new_payment, Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod schedule;

pub mod aggregator;
pub mod closing;
pub mod reconciliation;
pub mod sales;
pub mod scheduler;

pub mod hub;
pub mod protocol;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ClosingSettings, HubSettings, LedgerSettings, TillConfig};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use schedule::DailySchedule;

pub use aggregator::RegisterTotalsAggregator;
pub use closing::{ClosingEngine, ClosingTrigger};
pub use reconciliation::{PaymentOutcome, PaymentReconciler, PaymentRequest};
pub use sales::SaleDesk;
pub use scheduler::{
    ClosingBackend, ClosingScheduler, RegisterFailure, RunSummary, SchedulerHandle, SchedulerOptions,
    SchedulerState,
};

pub use hub::{HubHandle, HubServer, HubServerHandle, SnapshotSource, SyncHub};
pub use protocol::{HubMessage, SaleEvent};
