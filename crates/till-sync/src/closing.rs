//! # Closing Engine
//!
//! Writes end-of-day closing records and promotes them to closed.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Closing Record Lifecycle                          │
//! │                                                                         │
//! │   scheduler ──► automatic-pending ──promote_to_closed──► closed         │
//! │                 (skipped if the register                 (immutable,    │
//! │                  already has any record today)            cutoff for    │
//! │                                                           payments)     │
//! │   operator ──────────────────────────────────────────►  closed         │
//! │                 (manual: no skip, but never two closed per day)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregator::RegisterTotalsAggregator;
use crate::error::{SyncError, SyncResult};
use till_core::{ClosingOutcome, ClosingRecord, ClosingStatus, Expense, NewExpense, RegisterTotals};
use till_db::{ClosingGuard, Database};

/// Who asked for a closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingTrigger {
    /// An operator; always written.
    Manual,
    /// The scheduler; skipped when the register already has a record today.
    Automatic,
}

impl ClosingTrigger {
    fn guard(self) -> ClosingGuard {
        match self {
            ClosingTrigger::Manual => ClosingGuard::None,
            ClosingTrigger::Automatic => ClosingGuard::SkipIfAnyToday,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClosingEngine {
    db: Database,
    aggregator: RegisterTotalsAggregator,
}

impl ClosingEngine {
    pub fn new(db: Database, aggregator: RegisterTotalsAggregator) -> Self {
        ClosingEngine { db, aggregator }
    }

    pub fn aggregator(&self) -> &RegisterTotalsAggregator {
        &self.aggregator
    }

    /// Writes a closing record with its method breakdown.
    ///
    /// The breakdown is merged by method name first. Automatic closings
    /// return [`ClosingOutcome::Skipped`] when the register already has a
    /// record of any status today.
    pub async fn create_closing(
        &self,
        totals: &RegisterTotals,
        operator_id: Option<i64>,
        status: ClosingStatus,
        trigger: ClosingTrigger,
        now: DateTime<Utc>,
    ) -> SyncResult<ClosingOutcome> {
        let outcome = self
            .db
            .closings()
            .create(totals, operator_id, status, trigger.guard(), now)
            .await?;

        match &outcome {
            ClosingOutcome::Created(record) => info!(
                closing_id = record.id,
                register_id = record.register_id,
                status = %record.status,
                collected = record.collected_cents,
                ?trigger,
                "Closing created"
            ),
            ClosingOutcome::Skipped {
                register_id,
                existing_id,
            } => info!(register_id, existing_id, "Register already closed today, skipped"),
        }
        Ok(outcome)
    }

    /// Operator closing of one register with its current totals.
    pub async fn close_register(
        &self,
        register_id: i64,
        operator_id: i64,
        now: DateTime<Utc>,
    ) -> SyncResult<ClosingRecord> {
        let totals = self.aggregator.totals_for_register(register_id, now).await?;
        match self
            .create_closing(&totals, Some(operator_id), ClosingStatus::Closed, ClosingTrigger::Manual, now)
            .await?
        {
            ClosingOutcome::Created(record) => Ok(record),
            // Manual closings are written without the skip guard.
            ClosingOutcome::Skipped { existing_id, .. } => Err(SyncError::Internal(format!(
                "manual closing of register {register_id} skipped in favour of {existing_id}"
            ))),
        }
    }

    /// Confirms a pending record with the operator's counted total.
    pub async fn promote_to_closed(
        &self,
        closing_id: i64,
        operator_id: i64,
        corrected_total_paid: i64,
        now: DateTime<Utc>,
    ) -> SyncResult<ClosingRecord> {
        let record = self
            .db
            .closings()
            .promote(closing_id, operator_id, corrected_total_paid, now)
            .await?;
        info!(
            closing_id,
            operator_id,
            net_cash_income = record.net_cash_income_cents,
            "Closing promoted to closed"
        );
        Ok(record)
    }

    /// Id of any record (pending or closed) of the register today.
    pub async fn has_closing_today(&self, register_id: i64, now: DateTime<Utc>) -> SyncResult<Option<i64>> {
        Ok(self.db.closings().has_closing_today(register_id, now).await?)
    }

    pub async fn get(&self, closing_id: i64) -> SyncResult<Option<ClosingRecord>> {
        Ok(self.db.closings().get(closing_id).await?)
    }

    /// Most recent records of a register, newest first.
    pub async fn history(&self, register_id: i64, limit: i64) -> SyncResult<Vec<ClosingRecord>> {
        Ok(self.db.closings().list_for_register(register_id, limit).await?)
    }

    /// Cash taken out of a register; lowers its next net cash income.
    pub async fn record_expense(&self, new: &NewExpense, now: DateTime<Utc>) -> SyncResult<Expense> {
        Ok(self.db.expenses().record(new, now).await?)
    }
}
