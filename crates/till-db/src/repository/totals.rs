//! # Totals Repository
//!
//! Read-only aggregate queries behind the register totals.
//!
//! ## Cutoff Per Register
//! ```text
//!   day.start                    cutoff (latest closed record today)      day.end
//!      │────── already closed ──────│──────────── counted ──────────────────│
//! ```
//! Registers without a closed record today count the whole day. The three
//! sums run in one read transaction so they see the same snapshot; the
//! folding into cash/other buckets happens in `till_core::totals`.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use till_core::totals::{fold_register_totals, MethodSum, RegisterAmount};
use till_core::{BusinessDay, RegisterTotals};

#[derive(Debug, sqlx::FromRow)]
struct MethodSumRow {
    register_id: i64,
    method_name: String,
    amount_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AmountRow {
    register_id: i64,
    amount_cents: i64,
}

impl From<AmountRow> for RegisterAmount {
    fn from(row: AmountRow) -> Self {
        RegisterAmount {
            register_id: row.register_id,
            amount_cents: row.amount_cents,
        }
    }
}

/// Repository for per-register aggregates.
#[derive(Debug, Clone)]
pub struct TotalsRepository {
    pool: SqlitePool,
}

impl TotalsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TotalsRepository { pool }
    }

    /// Unclosed totals of every register with activity in `day`.
    ///
    /// - payments after the cutoff, summed per method name
    /// - outstanding of open sales created after the cutoff
    /// - expenses after the cutoff
    pub async fn totals_for_day(&self, day: &BusinessDay, cash_method: &str) -> DbResult<Vec<RegisterTotals>> {
        let mut tx = self.pool.begin().await?;

        let methods: Vec<MethodSumRow> = sqlx::query_as(
            r#"
            WITH cutoffs AS (
                SELECT register_id, MAX(created_at) AS cutoff
                FROM closings
                WHERE status = 'closed' AND created_at >= ?1 AND created_at < ?2
                GROUP BY register_id
            )
            SELECT p.register_id AS register_id,
                   m.name AS method_name,
                   SUM(p.amount_cents) AS amount_cents
            FROM payments p
            JOIN payment_methods m ON m.id = p.method_id
            LEFT JOIN cutoffs c ON c.register_id = p.register_id
            WHERE p.created_at >= ?1 AND p.created_at < ?2
              AND (c.cutoff IS NULL OR p.created_at > c.cutoff)
            GROUP BY p.register_id, m.name
            ORDER BY p.register_id, m.name
            "#,
        )
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&mut *tx)
        .await?;

        let credit: Vec<AmountRow> = sqlx::query_as(
            r#"
            WITH cutoffs AS (
                SELECT register_id, MAX(created_at) AS cutoff
                FROM closings
                WHERE status = 'closed' AND created_at >= ?1 AND created_at < ?2
                GROUP BY register_id
            )
            SELECT s.register_id AS register_id,
                   SUM(s.outstanding_cents) AS amount_cents
            FROM sales s
            LEFT JOIN cutoffs c ON c.register_id = s.register_id
            WHERE s.register_id IS NOT NULL
              AND s.payment_status IN ('PENDING', 'DEFERRED', 'CREDIT_ACCOUNT', 'PARTIALLY_PAID')
              AND s.created_at >= ?1 AND s.created_at < ?2
              AND (c.cutoff IS NULL OR s.created_at > c.cutoff)
            GROUP BY s.register_id
            HAVING SUM(s.outstanding_cents) > 0
            ORDER BY s.register_id
            "#,
        )
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&mut *tx)
        .await?;

        let expenses: Vec<AmountRow> = sqlx::query_as(
            r#"
            WITH cutoffs AS (
                SELECT register_id, MAX(created_at) AS cutoff
                FROM closings
                WHERE status = 'closed' AND created_at >= ?1 AND created_at < ?2
                GROUP BY register_id
            )
            SELECT e.register_id AS register_id,
                   SUM(e.amount_cents) AS amount_cents
            FROM expenses e
            LEFT JOIN cutoffs c ON c.register_id = e.register_id
            WHERE e.created_at >= ?1 AND e.created_at < ?2
              AND (c.cutoff IS NULL OR e.created_at > c.cutoff)
            GROUP BY e.register_id
            ORDER BY e.register_id
            "#,
        )
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let methods: Vec<MethodSum> = methods
            .into_iter()
            .map(|row| MethodSum {
                register_id: row.register_id,
                method_name: row.method_name,
                amount_cents: row.amount_cents,
            })
            .collect();
        let credit: Vec<RegisterAmount> = credit.into_iter().map(RegisterAmount::from).collect();
        let expenses: Vec<RegisterAmount> = expenses.into_iter().map(RegisterAmount::from).collect();

        debug!(
            date = %day.date,
            method_rows = methods.len(),
            credit_rows = credit.len(),
            expense_rows = expenses.len(),
            "Aggregated register activity"
        );
        Ok(fold_register_totals(&methods, &credit, &expenses, cash_method))
    }
}
