//! Shared setup for repository tests: a store with two registers, a retail
//! and a credit-account business, and two methods. In memory by default;
//! [`Fixture::on_disk`] gives a file-backed pool with several connections
//! for tests where writers really race.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::Argentina::Cordoba;
use tempfile::TempDir;

use crate::repository::closing::ClosingGuard;
use crate::{Database, DbConfig};
use till_core::{
    ClosingOutcome, ClosingRecord, ClosingStatus, NewPayment, NewSale, NewSaleLine, Payment,
    RegisterTotals, Sale,
};

/// Córdoba wall-clock time on 2024-03-05, as UTC.
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Cordoba
        .with_ymd_and_hms(2024, 3, 5, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub(crate) fn line(quantity: i64, unit_price_cents: i64) -> NewSaleLine {
    NewSaleLine {
        product_id: 1,
        product_name: "Yerba 1kg".into(),
        quantity,
        unit_price_cents,
    }
}

pub(crate) fn new_sale(fx: &Fixture, lines: Vec<NewSaleLine>) -> NewSale {
    NewSale {
        sale_number: "V-0001".into(),
        business_id: fx.business,
        register_id: Some(fx.register),
        lines,
        note: None,
    }
}

pub(crate) struct Fixture {
    pub db: Database,
    pub register: i64,
    pub other_register: i64,
    pub business: i64,
    pub account_business: i64,
    pub cash: i64,
    pub card: i64,
    _dir: Option<TempDir>,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory().timezone(Cordoba))
            .await
            .unwrap();
        Self::seed(db, None).await
    }

    /// Same seed on a temp-file database with five connections.
    pub async fn on_disk() -> Self {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new(dir.path().join("till.db"))
            .max_connections(5)
            .timezone(Cordoba);
        let db = Database::new(config).await.unwrap();
        Self::seed(db, Some(dir)).await
    }

    async fn seed(db: Database, dir: Option<TempDir>) -> Self {
        let catalog = db.catalog();
        let register = catalog.insert_register("Caja 1").await.unwrap().id;
        let other_register = catalog.insert_register("Caja 2").await.unwrap().id;
        let business = catalog.insert_business("Mostrador", false).await.unwrap().id;
        let account_business = catalog.insert_business("Hotel Sur", true).await.unwrap().id;
        let cash = catalog.insert_payment_method("Efectivo").await.unwrap().id;
        let card = catalog.insert_payment_method("Tarjeta").await.unwrap().id;

        Fixture {
            db,
            register,
            other_register,
            business,
            account_business,
            cash,
            card,
            _dir: dir,
        }
    }

    /// Single-line sale on the main register.
    pub async fn sale(&self, total_cents: i64, when: DateTime<Utc>) -> Sale {
        self.sale_on(self.register, total_cents, when).await
    }

    pub async fn sale_on(&self, register_id: i64, total_cents: i64, when: DateTime<Utc>) -> Sale {
        let mut new = new_sale(self, vec![line(1, total_cents)]);
        new.register_id = Some(register_id);
        self.db.sales().create(&new, when).await.unwrap()
    }

    pub async fn pay(&self, sale_id: i64, amount_cents: i64, method_id: i64, when: DateTime<Utc>) -> Payment {
        let sale = self.db.sales().get(sale_id).await.unwrap().unwrap();
        let new = NewPayment {
            sale_id: Some(sale_id),
            amount_cents,
            method_id,
            register_id: sale.register_id.unwrap_or(self.register),
            business_id: sale.business_id,
        };
        self.db.payments().record(&new, when).await.unwrap().payment
    }

    pub async fn deposit(&self, register_id: i64, amount_cents: i64, method_id: i64, when: DateTime<Utc>) -> Payment {
        let new = NewPayment {
            sale_id: None,
            amount_cents,
            method_id,
            register_id,
            business_id: self.business,
        };
        self.db.payments().record(&new, when).await.unwrap().payment
    }

    /// Closing with empty totals, written without the idempotency guard.
    pub async fn closing(&self, register_id: i64, status: ClosingStatus, when: DateTime<Utc>) -> ClosingRecord {
        let outcome = self
            .db
            .closings()
            .create(&RegisterTotals::empty(register_id), None, status, ClosingGuard::None, when)
            .await
            .unwrap();
        match outcome {
            ClosingOutcome::Created(record) => record,
            ClosingOutcome::Skipped { .. } => panic!("unguarded closing was skipped"),
        }
    }
}
