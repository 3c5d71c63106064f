//! # Expense Repository
//!
//! Cash taken out of a register during the day. Expenses reduce the net
//! cash income of the register's next closing.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;
use till_core::validation::validate_new_expense;
use till_core::{BusinessDay, CoreError, Expense, NewExpense};

#[derive(Debug, sqlx::FromRow)]
struct ExpenseRow {
    id: i64,
    register_id: i64,
    amount_cents: i64,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<ExpenseRow> for Expense {
    fn from(row: ExpenseRow) -> Self {
        Expense {
            id: row.id,
            register_id: row.register_id,
            amount_cents: row.amount_cents,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

/// Repository for register expenses.
#[derive(Debug, Clone)]
pub struct ExpenseRepository {
    pool: SqlitePool,
}

impl ExpenseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ExpenseRepository { pool }
    }

    pub async fn record(&self, new: &NewExpense, now: DateTime<Utc>) -> DbResult<Expense> {
        validate_new_expense(new).map_err(CoreError::from)?;

        let description = new.description.trim();
        let id = sqlx::query(
            "INSERT INTO expenses (register_id, amount_cents, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(new.register_id)
        .bind(new.amount_cents)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(id, register_id = new.register_id, amount = new.amount_cents, "Expense recorded");
        Ok(Expense {
            id,
            register_id: new.register_id,
            amount_cents: new.amount_cents,
            description: description.to_string(),
            created_at: now,
        })
    }

    /// Expenses of a register within a local day, oldest first.
    pub async fn list_for_day(&self, register_id: i64, day: &BusinessDay) -> DbResult<Vec<Expense>> {
        let rows: Vec<ExpenseRow> = sqlx::query_as(
            r#"
            SELECT id, register_id, amount_cents, description, created_at
            FROM expenses
            WHERE register_id = ? AND created_at >= ? AND created_at < ?
            ORDER BY created_at, id
            "#,
        )
        .bind(register_id)
        .bind(day.start)
        .bind(day.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Expense::from).collect())
    }
}
