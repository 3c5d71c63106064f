//! # Register Totals Aggregator
//!
//! Computes what each register collected since its last closed record
//! of the day.
//!
//! ## Cutoff
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  local day (configured timezone)                                       │
//! │  00:00 ─────────────────── 14:00 ──────────────────────────── 24:00   │
//! │        payments, sales,      ▲      payments, sales, expenses         │
//! │        expenses              │      ───────────────────────────        │
//! │        (already closed)   closed      counted by totals_for_today     │
//! │                           record                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! A register can be closed and keep selling on the same day, so the
//! cutoff is the latest closed record's timestamp, never a flag.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::SyncResult;
use till_core::{BusinessDay, RegisterTotals};
use till_db::Database;

/// Per-register unclosed totals.
#[derive(Debug, Clone)]
pub struct RegisterTotalsAggregator {
    db: Database,
    timezone: Tz,
    cash_method: String,
}

impl RegisterTotalsAggregator {
    pub fn new(db: Database, cash_method: impl Into<String>) -> Self {
        let timezone = db.timezone();
        RegisterTotalsAggregator {
            db,
            timezone,
            cash_method: cash_method.into(),
        }
    }

    /// Totals of every register with activity in the local day of `now`.
    /// Registers without activity are absent.
    pub async fn totals_for_today(&self, now: DateTime<Utc>) -> SyncResult<Vec<RegisterTotals>> {
        self.totals_for_day(&BusinessDay::containing(now, self.timezone)).await
    }

    /// Same as [`Self::totals_for_today`] for an arbitrary local date.
    pub async fn totals_for_date(&self, date: NaiveDate) -> SyncResult<Vec<RegisterTotals>> {
        self.totals_for_day(&BusinessDay::of(date, self.timezone)).await
    }

    /// Totals of one register today; empty totals when it had no activity.
    pub async fn totals_for_register(&self, register_id: i64, now: DateTime<Utc>) -> SyncResult<RegisterTotals> {
        let totals = self.totals_for_today(now).await?;
        Ok(totals
            .into_iter()
            .find(|t| t.register_id == register_id)
            .unwrap_or_else(|| RegisterTotals::empty(register_id)))
    }

    async fn totals_for_day(&self, day: &BusinessDay) -> SyncResult<Vec<RegisterTotals>> {
        let totals = self.db.totals().totals_for_day(day, &self.cash_method).await?;
        debug!(date = %day.date, registers = totals.len(), "Register totals computed");
        Ok(totals)
    }
}
