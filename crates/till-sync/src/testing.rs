//! Test doubles and a seeded in-memory ledger shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::Argentina::Cordoba;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SyncResult;
use crate::hub::{HubHandle, SnapshotSource, SyncHub};
use crate::protocol::HubMessage;
use till_core::{NewSale, NewSaleLine, PaymentStatus, Sale};
use till_db::{Database, DbConfig};

/// Córdoba wall-clock time on 2024-03-05, as UTC.
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Cordoba
        .with_ymd_and_hms(2024, 3, 5, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub(crate) fn sample_sale(id: i64, register_id: Option<i64>) -> Sale {
    let now = Utc::now();
    Sale {
        id,
        sale_number: format!("V-{id:04}"),
        business_id: 1,
        register_id,
        lines: vec![],
        total_cents: 1000,
        paid_cents: 0,
        outstanding_cents: 1000,
        payment_status: PaymentStatus::Pending,
        note: None,
        created_at: now,
        updated_at: now,
    }
}

/// Fixed snapshots per register, counting how often they are loaded.
#[derive(Default)]
pub(crate) struct StaticSource {
    sales: HashMap<i64, Vec<Sale>>,
    loads: AtomicUsize,
}

impl StaticSource {
    pub fn with(register_id: i64, sales: Vec<Sale>) -> Self {
        StaticSource {
            sales: HashMap::from([(register_id, sales)]),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn snapshot(&self, register_id: i64, _now: DateTime<Utc>) -> SyncResult<Vec<Sale>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.sales.get(&register_id).cloned().unwrap_or_default())
    }
}

/// In-memory ledger with a running hub backed by it.
pub(crate) struct Ledger {
    pub db: Database,
    pub hub: HubHandle,
    pub register: i64,
    pub other_register: i64,
    pub business: i64,
    pub account_business: i64,
    pub cash: i64,
    pub card: i64,
}

impl Ledger {
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory().timezone(Cordoba))
            .await
            .unwrap();
        let catalog = db.catalog();
        let register = catalog.insert_register("Caja 1").await.unwrap().id;
        let other_register = catalog.insert_register("Caja 2").await.unwrap().id;
        let business = catalog.insert_business("Mostrador", false).await.unwrap().id;
        let account_business = catalog.insert_business("Hotel Sur", true).await.unwrap().id;
        let cash = catalog.insert_payment_method("Efectivo").await.unwrap().id;
        let card = catalog.insert_payment_method("Tarjeta").await.unwrap().id;
        let hub = SyncHub::new(Arc::new(db.clone()), Cordoba).start();

        Ledger {
            db,
            hub,
            register,
            other_register,
            business,
            account_business,
            cash,
            card,
        }
    }

    pub fn new_sale(&self, total_cents: i64) -> NewSale {
        NewSale {
            sale_number: "V-0001".into(),
            business_id: self.business,
            register_id: Some(self.register),
            lines: vec![NewSaleLine {
                product_id: 1,
                product_name: "Yerba 1kg".into(),
                quantity: 1,
                unit_price_cents: total_cents,
            }],
            note: None,
        }
    }

    /// Subscribes to a register and consumes the initial snapshot.
    pub async fn watch(&self, register_id: i64) -> (Vec<Sale>, mpsc::Receiver<HubMessage>) {
        let (tx, mut rx) = mpsc::channel(16);
        self.hub.subscribe(register_id, Uuid::new_v4(), tx).await.unwrap();
        match rx.recv().await {
            Some(HubMessage::InitialSnapshot(sales)) => (sales, rx),
            other => panic!("expected initial snapshot, got {other:?}"),
        }
    }
}
