//! # Payment Repository
//!
//! Payments and the sale balance they move, always written together.
//!
//! ## Write Paths
//! Each path runs in one `BEGIN IMMEDIATE` transaction.
//! ```text
//! record   ── read balance ─► apply_payment ─► insert payment
//!                                            └► update sale
//! correct  ── closed-period check ─► update payment
//!                                 └► recompute sale
//! remove   ── closed-period check ─► delete payment
//!                                 └► recompute sale
//! ```
//!
//! Corrections and removals rebuild the sale from its full payment set
//! (`reconcile::recompute`), never from a delta.
//!
//! ## Sequence Numbers
//! `YYYYMMDD-NNNN` on the local date of the payment; allocated inside the
//! write transaction and backed by a UNIQUE index.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::closing::covering_closing;
use crate::repository::sale::{recompute_sale, require_sale, touch_sale, write_balance};
use till_core::reconcile::{self, SaleChange};
use till_core::validation::{validate_correction, validate_new_payment};
use till_core::{BusinessDay, CoreError, NewPayment, Payment, PaymentCorrection, Sale};

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    sale_id: Option<i64>,
    amount_cents: i64,
    method_id: i64,
    method_name: String,
    register_id: i64,
    business_id: i64,
    sequence_number: String,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            sale_id: row.sale_id,
            amount_cents: row.amount_cents,
            method_id: row.method_id,
            method_name: row.method_name,
            register_id: row.register_id,
            business_id: row.business_id,
            sequence_number: row.sequence_number,
            created_at: row.created_at,
        }
    }
}

/// Outcome of a payment write: the payment, the owning sale as stored
/// afterwards, and what happened to that sale.
#[derive(Debug, Clone)]
pub struct PaymentWrite {
    pub payment: Payment,
    pub sale: Option<Sale>,
    pub change: SaleChange,
}

async fn load_payment(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Payment>> {
    let row: Option<PaymentRow> = sqlx::query_as(
        r#"
        SELECT p.id, p.sale_id, p.amount_cents, p.method_id, m.name AS method_name,
               p.register_id, p.business_id, p.sequence_number, p.created_at
        FROM payments p
        JOIN payment_methods m ON m.id = p.method_id
        WHERE p.id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(Payment::from))
}

async fn require_payment(conn: &mut SqliteConnection, id: i64) -> DbResult<Payment> {
    load_payment(conn, id)
        .await?
        .ok_or_else(|| DbError::from(CoreError::PaymentNotFound(id)))
}

async fn require_method(conn: &mut SqliteConnection, method_id: i64) -> DbResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM payment_methods WHERE id = ?")
        .bind(method_id)
        .fetch_optional(&mut *conn)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(DbError::not_found("PaymentMethod", method_id)),
    }
}

async fn ensure_open_period(conn: &mut SqliteConnection, tz: Tz, payment: &Payment) -> DbResult<()> {
    if let Some(closing_id) = covering_closing(conn, tz, payment.register_id, payment.created_at).await? {
        return Err(CoreError::ClosedPeriodViolation {
            payment_id: payment.id,
            closing_id,
        }
        .into());
    }
    Ok(())
}

/// Next free sequence number of the local day.
async fn next_sequence(conn: &mut SqliteConnection, day: &BusinessDay) -> DbResult<String> {
    // Longest first so 10000 sorts after 9999
    let last: Option<String> = sqlx::query_scalar(
        r#"
        SELECT sequence_number
        FROM payments
        WHERE sequence_number LIKE ?
        ORDER BY length(sequence_number) DESC, sequence_number DESC
        LIMIT 1
        "#,
    )
    .bind(format!("{}-%", day.compact_date()))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(day.next_sequence(last.as_deref()))
}

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
    tz: Tz,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool, tz: Tz) -> Self {
        PaymentRepository { pool, tz }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        load_payment(&mut conn, id).await
    }

    /// Payments of a sale, in the order they were recorded.
    pub async fn list_for_sale(&self, sale_id: i64) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.sale_id, p.amount_cents, p.method_id, m.name AS method_name,
                   p.register_id, p.business_id, p.sequence_number, p.created_at
            FROM payments p
            JOIN payment_methods m ON m.id = p.method_id
            WHERE p.sale_id = ?
            ORDER BY p.created_at, p.id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Payment::from).collect())
    }

    /// Records a payment and applies it to its sale in one transaction.
    ///
    /// The amount is checked against the outstanding balance read inside
    /// the same transaction. A payment without a sale is a plain deposit.
    pub async fn record(&self, new: &NewPayment, now: DateTime<Utc>) -> DbResult<PaymentWrite> {
        validate_new_payment(new).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;

        let mut change = SaleChange::Updated;
        if let Some(sale_id) = new.sale_id {
            touch_sale(&mut tx, sale_id, now).await?;
            let sale = require_sale(&mut tx, sale_id).await?;
            let balance =
                reconcile::apply_payment(sale_id, sale.total_cents, sale.paid_cents, new.amount_cents)?;
            write_balance(&mut tx, sale_id, &balance, now).await?;
            change = balance.change();
        }

        require_method(&mut tx, new.method_id).await?;
        let day = BusinessDay::containing(now, self.tz);
        let sequence_number = next_sequence(&mut tx, &day).await?;

        let id = sqlx::query(
            r#"
            INSERT INTO payments (
                sale_id, amount_cents, method_id, register_id, business_id,
                sequence_number, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.sale_id)
        .bind(new.amount_cents)
        .bind(new.method_id)
        .bind(new.register_id)
        .bind(new.business_id)
        .bind(&sequence_number)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let payment = require_payment(&mut tx, id).await?;
        let sale = match new.sale_id {
            Some(sale_id) => Some(require_sale(&mut tx, sale_id).await?),
            None => None,
        };
        tx.commit().await?;

        info!(
            id,
            sale_id = ?new.sale_id,
            amount = new.amount_cents,
            sequence = %sequence_number,
            "Payment recorded"
        );
        Ok(PaymentWrite {
            payment,
            sale,
            change,
        })
    }

    /// Corrects amount and, optionally, method of a payment, then rebuilds
    /// the owning sale from all of its payments.
    pub async fn correct(
        &self,
        id: i64,
        correction: &PaymentCorrection,
        now: DateTime<Utc>,
    ) -> DbResult<PaymentWrite> {
        validate_correction(correction).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;
        let current = require_payment(&mut tx, id).await?;
        ensure_open_period(&mut tx, self.tz, &current).await?;
        if let Some(method_id) = correction.method_id {
            require_method(&mut tx, method_id).await?;
        }

        sqlx::query(
            "UPDATE payments SET amount_cents = ?, method_id = COALESCE(?, method_id) WHERE id = ?",
        )
        .bind(correction.amount_cents)
        .bind(correction.method_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let sale = match current.sale_id {
            Some(sale_id) => Some(recompute_sale(&mut tx, sale_id, now).await?),
            None => None,
        };
        let payment = require_payment(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            id,
            from = current.amount_cents,
            to = payment.amount_cents,
            "Payment corrected"
        );
        Ok(PaymentWrite {
            payment,
            sale,
            change: SaleChange::Updated,
        })
    }

    /// Deletes a payment outside any closed period and rebuilds its sale.
    /// Returns the deleted payment.
    pub async fn remove(&self, id: i64, now: DateTime<Utc>) -> DbResult<PaymentWrite> {
        let mut tx = begin_write(&self.pool).await?;
        let payment = require_payment(&mut tx, id).await?;
        ensure_open_period(&mut tx, self.tz, &payment).await?;

        sqlx::query("DELETE FROM payments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let sale = match payment.sale_id {
            Some(sale_id) => Some(recompute_sale(&mut tx, sale_id, now).await?),
            None => None,
        };
        tx.commit().await?;

        info!(id, sale_id = ?payment.sale_id, "Payment removed");
        Ok(PaymentWrite {
            payment,
            sale,
            change: SaleChange::Updated,
        })
    }

    /// The closed record covering a payment, if any.
    pub async fn closed_period_of(&self, id: i64) -> DbResult<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        let payment = require_payment(&mut conn, id).await?;
        let closing = covering_closing(&mut conn, self.tz, payment.register_id, payment.created_at).await?;
        debug!(id, closing_id = ?closing, "Closed-period lookup");
        Ok(closing)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{at, Fixture};
    use till_core::{ClosingStatus, PaymentStatus};

    fn payment_for(fx: &Fixture, sale_id: i64, amount_cents: i64) -> NewPayment {
        NewPayment {
            sale_id: Some(sale_id),
            amount_cents,
            method_id: fx.cash,
            register_id: fx.register,
            business_id: fx.business,
        }
    }

    #[tokio::test]
    async fn test_two_payments_settle_the_sale() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;
        assert_eq!(sale.payment_status, PaymentStatus::Pending);

        let first = fx.db.payments().record(&payment_for(&fx, sale.id, 400), at(9, 1)).await.unwrap();
        let after_first = first.sale.unwrap();
        assert_eq!(first.change, SaleChange::PartiallyPaid);
        assert_eq!(after_first.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(after_first.outstanding_cents, 600);

        let second = fx.db.payments().record(&payment_for(&fx, sale.id, 600), at(9, 2)).await.unwrap();
        let after_second = second.sale.unwrap();
        assert_eq!(second.change, SaleChange::Paid);
        assert_eq!(after_second.payment_status, PaymentStatus::FullyPaid);
        assert_eq!(after_second.outstanding_cents, 0);
        assert_eq!(after_second.paid_cents, 1000);
    }

    #[tokio::test]
    async fn test_overpayment_rejected_and_nothing_written() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;

        let err = fx
            .db
            .payments()
            .record(&payment_for(&fx, sale.id, 1001), at(9, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::PaymentExceedsOutstanding { outstanding: 1000, .. })
        ));
        assert!(fx.db.payments().list_for_sale(sale.id).await.unwrap().is_empty());
        let sale = fx.db.sales().get(sale.id).await.unwrap().unwrap();
        assert_eq!(sale.paid_cents, 0);
    }

    #[tokio::test]
    async fn test_payment_for_missing_sale() {
        let fx = Fixture::new().await;
        let err = fx.db.payments().record(&payment_for(&fx, 77, 100), at(9, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::SaleNotFound(77))));
    }

    #[tokio::test]
    async fn test_sequence_numbers_follow_local_day() {
        let fx = Fixture::new().await;
        let a = fx.deposit(fx.register, 100, fx.cash, at(9, 0)).await;
        let b = fx.deposit(fx.other_register, 100, fx.card, at(22, 30)).await;
        // 22:30 in Córdoba is already the 6th in UTC, still the 5th locally
        assert_eq!(a.sequence_number, "20240305-0001");
        assert_eq!(b.sequence_number, "20240305-0002");

        let next_day = fx.deposit(fx.register, 100, fx.cash, at(23, 59) + chrono::TimeDelta::minutes(2)).await;
        assert_eq!(next_day.sequence_number, "20240306-0001");
    }

    #[tokio::test]
    async fn test_correction_recomputes_from_payment_set() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;
        let payment = fx.pay(sale.id, 300, fx.cash, at(9, 1)).await;

        let correction = PaymentCorrection {
            amount_cents: 500,
            method_id: Some(fx.card),
        };
        let first = fx.db.payments().correct(payment.id, &correction, at(9, 5)).await.unwrap();
        let sale_after = first.sale.clone().unwrap();
        assert_eq!(sale_after.paid_cents, 500);
        assert_eq!(sale_after.outstanding_cents, 500);
        assert_eq!(sale_after.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(first.payment.method_name, "Tarjeta");
        assert_eq!(first.change, SaleChange::Updated);

        // Applying the same correction again changes nothing
        let second = fx.db.payments().correct(payment.id, &correction, at(9, 6)).await.unwrap();
        let again = second.sale.unwrap();
        assert_eq!(again.paid_cents, sale_after.paid_cents);
        assert_eq!(again.outstanding_cents, sale_after.outstanding_cents);
        assert_eq!(again.payment_status, sale_after.payment_status);
    }

    #[tokio::test]
    async fn test_correction_inside_closed_period_rejected() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;
        let payment = fx.pay(sale.id, 300, fx.cash, at(13, 0)).await;
        let closing = fx.closing(fx.register, ClosingStatus::Closed, at(14, 0)).await;

        assert_eq!(fx.db.payments().closed_period_of(payment.id).await.unwrap(), Some(closing.id));

        let correction = PaymentCorrection {
            amount_cents: 500,
            method_id: None,
        };
        let err = fx.db.payments().correct(payment.id, &correction, at(15, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::ClosedPeriodViolation { payment_id, closing_id })
                if payment_id == payment.id && closing_id == closing.id
        ));

        let err = fx.db.payments().remove(payment.id, at(15, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::ClosedPeriodViolation { .. })));
    }

    #[tokio::test]
    async fn test_pending_record_does_not_lock_payments() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;
        let payment = fx.pay(sale.id, 300, fx.cash, at(13, 0)).await;
        fx.closing(fx.register, ClosingStatus::AutomaticPending, at(14, 0)).await;
        // Closed record of another register does not count either
        fx.closing(fx.other_register, ClosingStatus::Closed, at(14, 0)).await;

        assert_eq!(fx.db.payments().closed_period_of(payment.id).await.unwrap(), None);
        let later = fx.pay(sale.id, 100, fx.cash, at(15, 0)).await;
        assert_eq!(fx.db.payments().closed_period_of(later.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_recomputes_sale() {
        let fx = Fixture::new().await;
        let sale = fx.sale(1000, at(9, 0)).await;
        fx.pay(sale.id, 400, fx.cash, at(9, 1)).await;
        let second = fx.pay(sale.id, 600, fx.cash, at(9, 2)).await;

        let removed = fx.db.payments().remove(second.id, at(9, 3)).await.unwrap();
        assert_eq!(removed.payment.id, second.id);
        let sale = removed.sale.unwrap();
        assert_eq!(sale.paid_cents, 400);
        assert_eq!(sale.outstanding_cents, 600);
        assert_eq!(sale.payment_status, PaymentStatus::PartiallyPaid);
        assert!(fx.db.payments().get(second.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payments_never_overdraw() {
        let fx = Fixture::on_disk().await;
        let sale = fx.sale(1000, at(9, 0)).await;

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let db = fx.db.clone();
                let new = payment_for(&fx, sale.id, 300);
                tokio::spawn(async move { db.payments().record(&new, at(9, 1)).await })
            })
            .collect();

        let mut recorded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => recorded += 1,
                Err(DbError::Domain(CoreError::PaymentExceedsOutstanding { .. })) => {}
                Err(other) => panic!("unexpected failure: {other}"),
            }
        }

        assert_eq!(recorded, 3);
        let sale = fx.db.sales().get(sale.id).await.unwrap().unwrap();
        assert_eq!(sale.paid_cents, 900);
        assert_eq!(sale.outstanding_cents, 100);
        assert_eq!(sale.payment_status, PaymentStatus::PartiallyPaid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deposits_all_commit() {
        let fx = Fixture::on_disk().await;

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let db = fx.db.clone();
                let new = NewPayment {
                    sale_id: None,
                    amount_cents: 100 + i,
                    method_id: fx.cash,
                    register_id: if i % 2 == 0 { fx.register } else { fx.other_register },
                    business_id: fx.business,
                };
                tokio::spawn(async move { db.payments().record(&new, at(11, 0)).await })
            })
            .collect();

        let mut sequences = Vec::new();
        for task in tasks {
            let write = task.await.unwrap().unwrap();
            sequences.push(write.payment.sequence_number);
        }

        sequences.sort();
        sequences.dedup();
        assert_eq!(sequences.len(), 40);
        assert_eq!(sequences.first().map(String::as_str), Some("20240305-0001"));
        assert_eq!(sequences.last().map(String::as_str), Some("20240305-0040"));
    }
}
