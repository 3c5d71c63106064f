//! # Sale Repository
//!
//! Database operations for sales and their lines.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── create() → PENDING, or CREDIT_ACCOUNT for account businesses   │
//! │                                                                         │
//! │  2. PAY (payment.rs)                                                   │
//! │     └── PARTIALLY_PAID ... FULLY_PAID                                  │
//! │                                                                         │
//! │  3. EDIT                                                               │
//! │     └── update() → lines replaced, total recomputed,                   │
//! │                    status re-settled from the payment set              │
//! │                                                                         │
//! │  4. DEFER                                                              │
//! │     └── defer() → DEFERRED (open sales only)                           │
//! │                                                                         │
//! │  5. REMOVE                                                             │
//! │     └── remove() → payments detached, sale and lines deleted           │
//! │                    (refused when a payment is in a closed period)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::closing::covering_closing;
use till_core::validation::{validate_new_sale, validate_sale_edit};
use till_core::{
    lines_total, normalize_note, reconcile, Business, BusinessDay, CoreError, NewSale,
    NewSaleLine, PaymentStatus, Sale, SaleEdit, SaleLine,
};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: i64,
    sale_number: String,
    business_id: i64,
    register_id: Option<i64>,
    total_cents: i64,
    paid_cents: i64,
    outstanding_cents: i64,
    payment_status: PaymentStatus,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(self, lines: Vec<SaleLine>) -> Sale {
        Sale {
            id: self.id,
            sale_number: self.sale_number,
            business_id: self.business_id,
            register_id: self.register_id,
            lines,
            total_cents: self.total_cents,
            paid_cents: self.paid_cents,
            outstanding_cents: self.outstanding_cents,
            payment_status: self.payment_status,
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleLineRow {
    id: i64,
    sale_id: i64,
    product_id: i64,
    product_name: String,
    quantity: i64,
    unit_price_cents: i64,
    subtotal_cents: i64,
}

impl From<SaleLineRow> for SaleLine {
    fn from(row: SaleLineRow) -> Self {
        SaleLine {
            id: row.id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            subtotal_cents: row.subtotal_cents,
        }
    }
}

/// A sale after an edit, with the register it belonged to before.
#[derive(Debug, Clone)]
pub struct SaleUpdate {
    pub previous_register_id: Option<i64>,
    pub sale: Sale,
}

impl SaleUpdate {
    /// True when the edit moved the sale to another register.
    pub fn reassigned(&self) -> bool {
        self.previous_register_id != self.sale.register_id
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================
// Shared with the payment repository. All take the connection of an open
// transaction.

/// Bumps `updated_at`; fails with `SaleNotFound` for a missing sale.
pub(crate) async fn touch_sale(
    conn: &mut SqliteConnection,
    sale_id: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let affected = sqlx::query("UPDATE sales SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(sale_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(CoreError::SaleNotFound(sale_id).into());
    }
    Ok(())
}

pub(crate) async fn load_sale(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<Option<Sale>> {
    let row: Option<SaleRow> = sqlx::query_as(
        r#"
        SELECT id, sale_number, business_id, register_id,
               total_cents, paid_cents, outstanding_cents, payment_status,
               note, created_at, updated_at
        FROM sales
        WHERE id = ?
        "#,
    )
    .bind(sale_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lines: Vec<SaleLineRow> = sqlx::query_as(
        r#"
        SELECT id, sale_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents
        FROM sale_lines
        WHERE sale_id = ?
        ORDER BY id
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(row.into_sale(lines.into_iter().map(SaleLine::from).collect())))
}

pub(crate) async fn require_sale(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<Sale> {
    load_sale(conn, sale_id)
        .await?
        .ok_or_else(|| DbError::from(CoreError::SaleNotFound(sale_id)))
}

/// Writes a new balance and status.
pub(crate) async fn write_balance(
    conn: &mut SqliteConnection,
    sale_id: i64,
    balance: &reconcile::Reconciled,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sales
        SET paid_cents = ?, outstanding_cents = ?, payment_status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(balance.paid_cents)
    .bind(balance.outstanding_cents)
    .bind(balance.status.as_str())
    .bind(now)
    .bind(sale_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Rebuilds paid/outstanding/status from every payment currently pointing
/// at the sale, and returns the stored result.
pub(crate) async fn recompute_sale(
    conn: &mut SqliteConnection,
    sale_id: i64,
    now: DateTime<Utc>,
) -> DbResult<Sale> {
    let sale = require_sale(conn, sale_id).await?;
    let amounts: Vec<i64> = sqlx::query_scalar("SELECT amount_cents FROM payments WHERE sale_id = ?")
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

    let balance = reconcile::recompute(sale.payment_status, sale.total_cents, amounts);
    write_balance(conn, sale_id, &balance, now).await?;

    debug!(
        sale_id,
        paid = balance.paid_cents,
        outstanding = balance.outstanding_cents,
        status = %balance.status,
        "Recomputed sale balance"
    );
    require_sale(conn, sale_id).await
}

async fn require_business(conn: &mut SqliteConnection, business_id: i64) -> DbResult<Business> {
    let row: Option<(i64, String, bool)> =
        sqlx::query_as("SELECT id, name, credit_account FROM businesses WHERE id = ?")
            .bind(business_id)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(|(id, name, credit_account)| Business {
        id,
        name,
        credit_account,
    })
    .ok_or_else(|| DbError::from(CoreError::BusinessNotFound(business_id)))
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    sale_id: i64,
    lines: &[NewSaleLine],
) -> DbResult<()> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO sale_lines (
                sale_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sale_id)
        .bind(line.product_id)
        .bind(line.product_name.trim())
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.subtotal().cents())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
    tz: Tz,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool, tz: Tz) -> Self {
        SaleRepository { pool, tz }
    }

    /// Gets a sale with its lines.
    pub async fn get(&self, id: i64) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        load_sale(&mut conn, id).await
    }

    /// Creates a sale.
    ///
    /// Lines are priced here; the initial status comes from the owning
    /// business.
    pub async fn create(&self, new: &NewSale, now: DateTime<Utc>) -> DbResult<Sale> {
        validate_new_sale(new).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;

        let business = require_business(&mut tx, new.business_id).await?;
        let status = business.initial_sale_status();
        let total = lines_total(&new.lines).cents();

        let id = sqlx::query(
            r#"
            INSERT INTO sales (
                sale_number, business_id, register_id,
                total_cents, paid_cents, outstanding_cents, payment_status,
                note, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.sale_number.trim())
        .bind(new.business_id)
        .bind(new.register_id)
        .bind(total)
        .bind(total)
        .bind(status.as_str())
        .bind(normalize_note(new.note.as_deref()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        insert_lines(&mut tx, id, &new.lines).await?;
        let sale = require_sale(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            id,
            sale_number = %sale.sale_number,
            register_id = ?sale.register_id,
            total,
            status = %status,
            "Sale created"
        );
        Ok(sale)
    }

    /// Replaces a sale's lines, business, register and note.
    ///
    /// The total is recomputed from the new lines and the status is settled
    /// again against the payments already recorded.
    pub async fn update(
        &self,
        id: i64,
        edit: &SaleEdit,
        now: DateTime<Utc>,
    ) -> DbResult<SaleUpdate> {
        validate_sale_edit(edit).map_err(CoreError::from)?;

        let mut tx = begin_write(&self.pool).await?;
        touch_sale(&mut tx, id, now).await?;
        let previous = require_sale(&mut tx, id).await?;
        require_business(&mut tx, edit.business_id).await?;

        sqlx::query("DELETE FROM sale_lines WHERE sale_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, id, &edit.lines).await?;

        sqlx::query(
            r#"
            UPDATE sales
            SET business_id = ?, register_id = ?, note = ?, total_cents = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(edit.business_id)
        .bind(edit.register_id)
        .bind(normalize_note(edit.note.as_deref()))
        .bind(lines_total(&edit.lines).cents())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let sale = recompute_sale(&mut tx, id, now).await?;
        tx.commit().await?;

        debug!(id, total = sale.total_cents, status = %sale.payment_status, "Sale updated");
        Ok(SaleUpdate {
            previous_register_id: previous.register_id,
            sale,
        })
    }

    /// Marks an open sale to be paid another day. No payment is written.
    pub async fn defer(&self, id: i64, now: DateTime<Utc>) -> DbResult<Sale> {
        let mut tx = begin_write(&self.pool).await?;
        touch_sale(&mut tx, id, now).await?;
        let sale = require_sale(&mut tx, id).await?;
        let status = reconcile::defer(id, sale.payment_status)?;

        sqlx::query("UPDATE sales SET payment_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let sale = require_sale(&mut tx, id).await?;
        tx.commit().await?;

        debug!(id, "Sale deferred");
        Ok(sale)
    }

    /// Deletes a sale. Its payments stay recorded, detached from it.
    ///
    /// Refused with `ClosedPeriodViolation` when any of those payments is
    /// already covered by a closed record. Returns the removed sale.
    pub async fn remove(&self, id: i64, now: DateTime<Utc>) -> DbResult<Sale> {
        let mut tx = begin_write(&self.pool).await?;
        touch_sale(&mut tx, id, now).await?;
        let sale = require_sale(&mut tx, id).await?;

        let payments: Vec<(i64, i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, register_id, created_at FROM payments WHERE sale_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        for (payment_id, register_id, created_at) in payments {
            if let Some(closing_id) = covering_closing(&mut tx, self.tz, register_id, created_at).await? {
                return Err(CoreError::ClosedPeriodViolation {
                    payment_id,
                    closing_id,
                }
                .into());
            }
        }

        sqlx::query("UPDATE payments SET sale_id = NULL WHERE sale_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sales WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id, register_id = ?sale.register_id, "Sale removed");
        Ok(sale)
    }

    /// Snapshot for a register: every sale of the local day containing
    /// `now`, plus open sales from earlier days. Oldest first.
    pub async fn open_for_register(&self, register_id: i64, now: DateTime<Utc>) -> DbResult<Vec<Sale>> {
        let day = BusinessDay::containing(now, self.tz);
        let mut tx = self.pool.begin().await?;

        let rows: Vec<SaleRow> = sqlx::query_as(
            r#"
            SELECT id, sale_number, business_id, register_id,
                   total_cents, paid_cents, outstanding_cents, payment_status,
                   note, created_at, updated_at
            FROM sales
            WHERE register_id = ?1
              AND ((created_at >= ?2 AND created_at < ?3) OR payment_status != 'FULLY_PAID')
            ORDER BY created_at, id
            "#,
        )
        .bind(register_id)
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&mut *tx)
        .await?;

        let line_rows: Vec<SaleLineRow> = sqlx::query_as(
            r#"
            SELECT l.id, l.sale_id, l.product_id, l.product_name,
                   l.quantity, l.unit_price_cents, l.subtotal_cents
            FROM sale_lines l
            JOIN sales s ON s.id = l.sale_id
            WHERE s.register_id = ?1
              AND ((s.created_at >= ?2 AND s.created_at < ?3) OR s.payment_status != 'FULLY_PAID')
            ORDER BY l.id
            "#,
        )
        .bind(register_id)
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut lines: HashMap<i64, Vec<SaleLine>> = HashMap::new();
        for row in line_rows {
            lines.entry(row.sale_id).or_default().push(SaleLine::from(row));
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let sale_lines = lines.remove(&row.id).unwrap_or_default();
                row.into_sale(sale_lines)
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
