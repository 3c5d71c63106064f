//! # Hub Wire Protocol
//!
//! Messages pushed from the hub to tills. Tills never send commands over
//! the socket; they only answer liveness pings.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Hub → Till Messages                               │
//! │                                                                         │
//! │  ON CONNECT (exactly once, always first)                               │
//! │  ──────────                                                            │
//! │  initial-snapshot   Sale[]   today's sales + open sales of prior days  │
//! │                                                                         │
//! │  AFTER A COMMITTED MUTATION                                            │
//! │  ──────────────────────────                                            │
//! │  sale-created       Sale     new sale, or moved in from another till   │
//! │  sale-updated       Sale     edits and payment corrections             │
//! │  paid               Sale     outstanding reached zero                  │
//! │  partially-paid     Sale     money received, balance remains           │
//! │  deferred           Sale     to be paid another day                    │
//! │  sale-removed       {id}     deleted, or moved out to another till     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "partially-paid", "data": { "id": 7, "outstandingCents": 600, ... } }
//! { "type": "sale-removed", "data": { "id": 7 } }
//! ```

use serde::{Deserialize, Serialize};
use till_core::reconcile::SaleChange;
use till_core::Sale;
use ts_rs::TS;

/// Every message a till can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum HubMessage {
    InitialSnapshot(Vec<Sale>),
    SaleCreated(Sale),
    SaleUpdated(Sale),
    Paid(Sale),
    PartiallyPaid(Sale),
    Deferred(Sale),
    SaleRemoved { id: i64 },
}

impl HubMessage {
    /// Message announcing a mutation of an existing sale.
    pub fn for_change(change: SaleChange, sale: Sale) -> Self {
        match change {
            SaleChange::Paid => HubMessage::Paid(sale),
            SaleChange::PartiallyPaid => HubMessage::PartiallyPaid(sale),
            SaleChange::Deferred => HubMessage::Deferred(sale),
            SaleChange::Updated => HubMessage::SaleUpdated(sale),
        }
    }

    /// Wire tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::InitialSnapshot(_) => "initial-snapshot",
            HubMessage::SaleCreated(_) => "sale-created",
            HubMessage::SaleUpdated(_) => "sale-updated",
            HubMessage::Paid(_) => "paid",
            HubMessage::PartiallyPaid(_) => "partially-paid",
            HubMessage::Deferred(_) => "deferred",
            HubMessage::SaleRemoved { .. } => "sale-removed",
        }
    }
}

/// A committed ledger mutation, as reported by the engines to the hub.
#[derive(Debug, Clone)]
pub enum SaleEvent {
    Created(Sale),
    Changed {
        sale: Sale,
        change: SaleChange,
        /// Register the sale belonged to before the mutation.
        previous_register_id: Option<i64>,
    },
    Removed {
        id: i64,
        register_id: Option<i64>,
    },
}

impl SaleEvent {
    /// A mutation that did not move the sale between registers.
    pub fn changed(sale: Sale, change: SaleChange) -> Self {
        let previous_register_id = sale.register_id;
        SaleEvent::Changed {
            sale,
            change,
            previous_register_id,
        }
    }
}
