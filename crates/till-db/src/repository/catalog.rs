//! # Catalog Repository
//!
//! The few catalog rows the ledger reads: registers, businesses and payment
//! methods. Full catalog maintenance lives outside this service; the insert
//! helpers exist for provisioning and tests.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use till_core::{Business, PaymentMethod, Register};

#[derive(Debug, sqlx::FromRow)]
struct BusinessRow {
    id: i64,
    name: String,
    credit_account: bool,
}

impl From<BusinessRow> for Business {
    fn from(row: BusinessRow) -> Self {
        Business {
            id: row.id,
            name: row.name,
            credit_account: row.credit_account,
        }
    }
}

/// Repository for catalog lookups.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    pub async fn insert_register(&self, name: &str) -> DbResult<Register> {
        let id = sqlx::query("INSERT INTO registers (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        debug!(id, name, "Inserted register");
        Ok(Register {
            id,
            name: name.to_string(),
        })
    }

    pub async fn list_registers(&self) -> DbResult<Vec<Register>> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM registers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| Register { id, name })
            .collect())
    }

    pub async fn insert_business(&self, name: &str, credit_account: bool) -> DbResult<Business> {
        let id = sqlx::query("INSERT INTO businesses (name, credit_account) VALUES (?, ?)")
            .bind(name)
            .bind(credit_account)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        debug!(id, name, credit_account, "Inserted business");
        Ok(Business {
            id,
            name: name.to_string(),
            credit_account,
        })
    }

    pub async fn get_business(&self, id: i64) -> DbResult<Option<Business>> {
        let row: Option<BusinessRow> =
            sqlx::query_as("SELECT id, name, credit_account FROM businesses WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Business::from))
    }

    pub async fn insert_payment_method(&self, name: &str) -> DbResult<PaymentMethod> {
        let id = sqlx::query("INSERT INTO payment_methods (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        debug!(id, name, "Inserted payment method");
        Ok(PaymentMethod {
            id,
            name: name.to_string(),
        })
    }

    pub async fn list_payment_methods(&self) -> DbResult<Vec<PaymentMethod>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM payment_methods ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| PaymentMethod { id, name })
            .collect())
    }
}
