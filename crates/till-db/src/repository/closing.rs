//! # Closing Repository
//!
//! Closing records and their per-method breakdown rows.
//!
//! ## Guards
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create(.., guard, now)                                                 │
//! │                                                                         │
//! │  INSERT ... SELECT ... WHERE NOT EXISTS (record of this register       │
//! │                                          in today's [start, end))       │
//! │       │                                                                 │
//! │       ├── SkipIfAnyToday   any status blocks      → Skipped            │
//! │       ├── None + closed    a closed record blocks → DuplicateClosed    │
//! │       └── None + pending   nothing blocks                              │
//! │                                                                         │
//! │  Check and insert are one statement, so a restart or a second          │
//! │  scheduler tick can never slip a duplicate in between.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are never deleted (a trigger aborts any DELETE).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use till_core::totals::merge_breakdown;
use till_core::validation::{validate_closing_totals, validate_corrected_total};
use till_core::{
    BusinessDay, ClosingOutcome, ClosingRecord, ClosingStatus, CoreError, MethodTotal,
    RegisterTotals,
};

/// Which existing records prevent a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingGuard {
    /// Skip when the register already has any record today (automatic runs).
    SkipIfAnyToday,
    /// Operator action: only the one-closed-per-day rule applies.
    None,
}

#[derive(Debug, sqlx::FromRow)]
struct ClosingRow {
    id: i64,
    register_id: i64,
    operator_id: Option<i64>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    total_sales_cents: i64,
    collected_cents: i64,
    cash_cents: i64,
    credit_account_cents: i64,
    expenses_cents: i64,
    net_cash_income_cents: i64,
    status: ClosingStatus,
}

impl ClosingRow {
    fn into_record(self, breakdown: Vec<MethodTotal>) -> ClosingRecord {
        ClosingRecord {
            id: self.id,
            register_id: self.register_id,
            operator_id: self.operator_id,
            created_at: self.created_at,
            closed_at: self.closed_at,
            total_sales_cents: self.total_sales_cents,
            collected_cents: self.collected_cents,
            cash_cents: self.cash_cents,
            credit_account_cents: self.credit_account_cents,
            expenses_cents: self.expenses_cents,
            net_cash_income_cents: self.net_cash_income_cents,
            status: self.status,
            breakdown,
        }
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// The closed record covering activity at `created_at` on a register.
///
/// Takes the latest closed record created before the end of that local
/// day; the activity is covered when it happened at or before the record.
pub(crate) async fn covering_closing(
    conn: &mut SqliteConnection,
    tz: Tz,
    register_id: i64,
    created_at: DateTime<Utc>,
) -> DbResult<Option<i64>> {
    let day = BusinessDay::containing(created_at, tz);
    let latest: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT id, created_at
        FROM closings
        WHERE register_id = ? AND status = 'closed' AND created_at < ?
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(register_id)
    .bind(day.end)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(latest
        .filter(|(_, cutoff)| created_at <= *cutoff)
        .map(|(id, _)| id))
}

async fn load_closing(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<ClosingRecord>> {
    let row: Option<ClosingRow> = sqlx::query_as(
        r#"
        SELECT id, register_id, operator_id, created_at, closed_at,
               total_sales_cents, collected_cents, cash_cents, credit_account_cents,
               expenses_cents, net_cash_income_cents, status
        FROM closings
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let breakdown = load_breakdown(conn, row.id).await?;
            Ok(Some(row.into_record(breakdown)))
        }
        None => Ok(None),
    }
}

async fn load_breakdown(conn: &mut SqliteConnection, closing_id: i64) -> DbResult<Vec<MethodTotal>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT method, amount_cents FROM closing_methods WHERE closing_id = ? ORDER BY method",
    )
    .bind(closing_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(method, amount_cents)| MethodTotal { method, amount_cents })
        .collect())
}

async fn require_closing(conn: &mut SqliteConnection, id: i64) -> DbResult<ClosingRecord> {
    load_closing(conn, id)
        .await?
        .ok_or_else(|| DbError::from(CoreError::ClosingNotFound(id)))
}

/// First record of a register inside `day`; closed ones only unless
/// `any_status`.
async fn blocking_record(
    conn: &mut SqliteConnection,
    register_id: i64,
    day: &BusinessDay,
    any_status: bool,
    except_id: Option<i64>,
) -> DbResult<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM closings
        WHERE register_id = ?1 AND created_at >= ?2 AND created_at < ?3
          AND (?4 OR status = 'closed')
          AND (?5 IS NULL OR id != ?5)
        ORDER BY created_at, id
        LIMIT 1
        "#,
    )
    .bind(register_id)
    .bind(day.start)
    .bind(day.end)
    .bind(any_status)
    .bind(except_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for closing records.
#[derive(Debug, Clone)]
pub struct ClosingRepository {
    pool: SqlitePool,
    tz: Tz,
}

impl ClosingRepository {
    pub fn new(pool: SqlitePool, tz: Tz) -> Self {
        ClosingRepository { pool, tz }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<ClosingRecord>> {
        let mut conn = self.pool.acquire().await?;
        load_closing(&mut conn, id).await
    }

    /// Most recent records of a register, newest first.
    pub async fn list_for_register(&self, register_id: i64, limit: i64) -> DbResult<Vec<ClosingRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<ClosingRow> = sqlx::query_as(
            r#"
            SELECT id, register_id, operator_id, created_at, closed_at,
                   total_sales_cents, collected_cents, cash_cents, credit_account_cents,
                   expenses_cents, net_cash_income_cents, status
            FROM closings
            WHERE register_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(register_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let breakdown = load_breakdown(&mut conn, row.id).await?;
            records.push(row.into_record(breakdown));
        }
        Ok(records)
    }

    /// Any record (regardless of status) of the register in the local day
    /// containing `now`.
    pub async fn has_closing_today(&self, register_id: i64, now: DateTime<Utc>) -> DbResult<Option<i64>> {
        let day = BusinessDay::containing(now, self.tz);
        let mut conn = self.pool.acquire().await?;
        blocking_record(&mut conn, register_id, &day, true, None).await
    }

    /// Writes a closing record and its breakdown rows.
    ///
    /// `created_at` is `now` and becomes the register's cutoff once the
    /// record is closed. Amounts are validated before anything is written.
    pub async fn create(
        &self,
        totals: &RegisterTotals,
        operator_id: Option<i64>,
        status: ClosingStatus,
        guard: ClosingGuard,
        now: DateTime<Utc>,
    ) -> DbResult<ClosingOutcome> {
        validate_closing_totals(totals).map_err(CoreError::from)?;

        let register_id = totals.register_id;
        let day = BusinessDay::containing(now, self.tz);
        let any_status = guard == ClosingGuard::SkipIfAnyToday;
        let closed_at = (status == ClosingStatus::Closed).then_some(now);

        let mut tx = begin_write(&self.pool).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO closings (
                register_id, operator_id, created_at, closed_at,
                total_sales_cents, collected_cents, cash_cents, credit_account_cents,
                expenses_cents, net_cash_income_cents, status
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE ?12 = 0 OR NOT EXISTS (
                SELECT 1 FROM closings
                WHERE register_id = ?1 AND created_at >= ?13 AND created_at < ?14
                  AND (?15 OR status = 'closed')
            )
            "#,
        )
        .bind(register_id)
        .bind(operator_id)
        .bind(now)
        .bind(closed_at)
        .bind(totals.total_sales().cents())
        .bind(totals.collected_total)
        .bind(totals.cash_total)
        .bind(totals.credit_account_total)
        .bind(totals.expenses_total)
        .bind(totals.net_cash_income().cents())
        .bind(status.as_str())
        .bind(any_status || status == ClosingStatus::Closed)
        .bind(day.start)
        .bind(day.end)
        .bind(any_status)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let existing_id = blocking_record(&mut tx, register_id, &day, any_status, None)
                .await?
                .unwrap_or_default();
            tx.rollback().await?;

            if any_status {
                info!(register_id, existing_id, "Register already closed today, skipping");
                return Ok(ClosingOutcome::Skipped {
                    register_id,
                    existing_id,
                });
            }
            return Err(CoreError::DuplicateClosedRecord {
                register_id,
                existing_id,
                date: day.date.to_string(),
            }
            .into());
        }

        let id = inserted.last_insert_rowid();
        for entry in merge_breakdown(totals.method_breakdown.iter().cloned()) {
            sqlx::query("INSERT INTO closing_methods (closing_id, method, amount_cents) VALUES (?, ?, ?)")
                .bind(id)
                .bind(&entry.method)
                .bind(entry.amount_cents)
                .execute(&mut *tx)
                .await?;
        }

        let record = require_closing(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            id,
            register_id,
            status = %status,
            collected = record.collected_cents,
            "Closing record created"
        );
        Ok(ClosingOutcome::Created(record))
    }

    /// Promotes a pending record to closed with the operator's corrected
    /// collected total.
    ///
    /// `net_cash_income` becomes `corrected_total_paid - expenses`; the
    /// record keeps its `created_at` and gets `closed_at = now`.
    pub async fn promote(
        &self,
        id: i64,
        operator_id: i64,
        corrected_total_paid: i64,
        now: DateTime<Utc>,
    ) -> DbResult<ClosingRecord> {
        validate_corrected_total(corrected_total_paid).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;

        let affected = sqlx::query("UPDATE closings SET id = id WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(CoreError::ClosingNotFound(id).into());
        }

        let record = require_closing(&mut tx, id).await?;
        if record.is_closed() {
            return Err(CoreError::ClosingAlreadyClosed(id).into());
        }

        let day = BusinessDay::containing(record.created_at, self.tz);
        if let Some(existing_id) = blocking_record(&mut tx, record.register_id, &day, false, Some(id)).await? {
            return Err(CoreError::DuplicateClosedRecord {
                register_id: record.register_id,
                existing_id,
                date: day.date.to_string(),
            }
            .into());
        }

        let net = corrected_total_paid - record.expenses_cents;
        sqlx::query(
            r#"
            UPDATE closings
            SET status = 'closed', operator_id = ?, closed_at = ?, net_cash_income_cents = ?
            WHERE id = ?
            "#,
        )
        .bind(operator_id)
        .bind(now)
        .bind(net)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let promoted = require_closing(&mut tx, id).await?;
        tx.commit().await?;

        debug!(id, operator_id, net, "Closing record promoted");
        Ok(promoted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{at, Fixture};

    fn totals(register_id: i64) -> RegisterTotals {
        RegisterTotals {
            register_id,
            cash_total: 1500,
            other_total: 500,
            collected_total: 2000,
            credit_account_total: 300,
            expenses_total: 200,
            method_breakdown: vec![
                MethodTotal { method: "efectivo".into(), amount_cents: 1000 },
                MethodTotal { method: "EFECTIVO".into(), amount_cents: 500 },
                MethodTotal { method: "Tarjeta".into(), amount_cents: 500 },
            ],
        }
    }

    #[tokio::test]
    async fn test_create_merges_breakdown_and_derives_figures() {
        let fx = Fixture::new().await;
        let outcome = fx
            .db
            .closings()
            .create(&totals(fx.register), Some(7), ClosingStatus::AutomaticPending, ClosingGuard::None, at(23, 59))
            .await
            .unwrap();

        let ClosingOutcome::Created(record) = outcome else {
            panic!("expected a new record");
        };
        assert_eq!(record.total_sales_cents, 2300);
        assert_eq!(record.net_cash_income_cents, 1300);
        assert_eq!(record.operator_id, Some(7));
        assert_eq!(record.closed_at, None);
        assert_eq!(
            record.breakdown,
            vec![
                MethodTotal { method: "EFECTIVO".into(), amount_cents: 1500 },
                MethodTotal { method: "TARJETA".into(), amount_cents: 500 },
            ]
        );
        let sum: i64 = record.breakdown.iter().map(|m| m.amount_cents).sum();
        assert_eq!(sum, record.collected_cents);
    }

    #[tokio::test]
    async fn test_breakdown_mismatch_is_rejected() {
        let fx = Fixture::new().await;
        let mut bad = totals(fx.register);
        bad.method_breakdown.pop();

        let err = fx
            .db
            .closings()
            .create(&bad, None, ClosingStatus::AutomaticPending, ClosingGuard::None, at(23, 59))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Validation(_))));
        assert!(fx.db.closings().list_for_register(fx.register, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guard_skips_second_automatic_record() {
        let fx = Fixture::new().await;
        let repo = fx.db.closings();

        let first = repo
            .create(&totals(fx.register), None, ClosingStatus::AutomaticPending, ClosingGuard::SkipIfAnyToday, at(23, 0))
            .await
            .unwrap();
        let ClosingOutcome::Created(first) = first else {
            panic!("expected a new record");
        };

        let second = repo
            .create(&totals(fx.register), None, ClosingStatus::AutomaticPending, ClosingGuard::SkipIfAnyToday, at(23, 30))
            .await
            .unwrap();
        assert_eq!(
            second,
            ClosingOutcome::Skipped {
                register_id: fx.register,
                existing_id: first.id
            }
        );
        assert_eq!(repo.has_closing_today(fx.register, at(23, 45)).await.unwrap(), Some(first.id));
        assert_eq!(repo.has_closing_today(fx.other_register, at(23, 45)).await.unwrap(), None);

        // Next local day is a fresh start
        let tomorrow = at(23, 0) + chrono::TimeDelta::days(1);
        let third = repo
            .create(&totals(fx.register), None, ClosingStatus::AutomaticPending, ClosingGuard::SkipIfAnyToday, tomorrow)
            .await
            .unwrap();
        assert!(matches!(third, ClosingOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_manual_records_bypass_guard_but_not_closed_rule() {
        let fx = Fixture::new().await;
        let repo = fx.db.closings();

        fx.closing(fx.register, ClosingStatus::AutomaticPending, at(12, 0)).await;
        fx.closing(fx.register, ClosingStatus::AutomaticPending, at(13, 0)).await;
        let closed = fx.closing(fx.register, ClosingStatus::Closed, at(14, 0)).await;
        assert!(closed.closed_at.is_some());

        let err = repo
            .create(&RegisterTotals::empty(fx.register), None, ClosingStatus::Closed, ClosingGuard::None, at(18, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::DuplicateClosedRecord { existing_id, .. }) if existing_id == closed.id
        ));
    }

    #[tokio::test]
    async fn test_promote_pending_record() {
        let fx = Fixture::new().await;
        let created = fx
            .db
            .closings()
            .create(&totals(fx.register), None, ClosingStatus::AutomaticPending, ClosingGuard::SkipIfAnyToday, at(23, 59))
            .await
            .unwrap();
        let ClosingOutcome::Created(pending) = created else {
            panic!("expected a new record");
        };

        let next_morning = at(8, 0) + chrono::TimeDelta::days(1);
        let promoted = fx.db.closings().promote(pending.id, 3, 2100, next_morning).await.unwrap();
        assert!(promoted.is_closed());
        assert_eq!(promoted.operator_id, Some(3));
        assert_eq!(promoted.net_cash_income_cents, 1900);
        assert_eq!(promoted.created_at, pending.created_at);
        assert_eq!(promoted.closed_at, Some(next_morning));

        let err = fx.db.closings().promote(pending.id, 3, 2100, next_morning).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ClosingAlreadyClosed(_))));

        let err = fx.db.closings().promote(999, 3, 0, next_morning).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ClosingNotFound(999))));
    }

    #[tokio::test]
    async fn test_promote_refuses_second_closed_record_same_day() {
        let fx = Fixture::new().await;
        let pending = fx.closing(fx.register, ClosingStatus::AutomaticPending, at(12, 0)).await;
        fx.closing(fx.register, ClosingStatus::Closed, at(13, 0)).await;

        let err = fx.db.closings().promote(pending.id, 1, 0, at(14, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::DuplicateClosedRecord { .. })));
    }

    #[tokio::test]
    async fn test_records_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let record = fx.closing(fx.register, ClosingStatus::Closed, at(12, 0)).await;

        let result = sqlx::query("DELETE FROM closings WHERE id = ?")
            .bind(record.id)
            .execute(fx.db.pool())
            .await;
        assert!(result.is_err());
        assert!(fx.db.closings().get(record.id).await.unwrap().is_some());
    }
}
