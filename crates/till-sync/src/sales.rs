//! # Sale Desk
//!
//! Direct sale edits from the back office: create, edit, remove, and the
//! snapshot query a till loads on connect.
//!
//! Editing the register of a sale moves it between tills:
//! ```text
//!   register 1 tills  ◄── sale-removed {id}
//!   register 2 tills  ◄── sale-created  sale
//! ```

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::SyncResult;
use crate::hub::HubHandle;
use crate::protocol::SaleEvent;
use till_core::reconcile::SaleChange;
use till_core::{NewSale, Sale, SaleEdit};
use till_db::{Database, SaleUpdate};

#[derive(Debug, Clone)]
pub struct SaleDesk {
    db: Database,
    hub: HubHandle,
}

impl SaleDesk {
    pub fn new(db: Database, hub: HubHandle) -> Self {
        SaleDesk { db, hub }
    }

    pub async fn create_sale(&self, new: &NewSale, now: DateTime<Utc>) -> SyncResult<Sale> {
        let sale = self.db.sales().create(new, now).await?;
        self.hub.publish(SaleEvent::Created(sale.clone())).await;
        Ok(sale)
    }

    pub async fn update_sale(&self, sale_id: i64, edit: &SaleEdit, now: DateTime<Utc>) -> SyncResult<SaleUpdate> {
        let update = self.db.sales().update(sale_id, edit, now).await?;
        if update.reassigned() {
            info!(
                sale_id,
                from = ?update.previous_register_id,
                to = ?update.sale.register_id,
                "Sale moved to another register"
            );
        }
        self.hub
            .publish(SaleEvent::Changed {
                sale: update.sale.clone(),
                change: SaleChange::Updated,
                previous_register_id: update.previous_register_id,
            })
            .await;
        Ok(update)
    }

    /// Deletes a sale whose payments are all outside closed periods.
    pub async fn remove_sale(&self, sale_id: i64, now: DateTime<Utc>) -> SyncResult<Sale> {
        let sale = self.db.sales().remove(sale_id, now).await?;
        self.hub
            .publish(SaleEvent::Removed {
                id: sale.id,
                register_id: sale.register_id,
            })
            .await;
        Ok(sale)
    }

    /// Today's sales of a register plus its open sales from earlier days.
    pub async fn open_sales_for_register(&self, register_id: i64, now: DateTime<Utc>) -> SyncResult<Vec<Sale>> {
        Ok(self.db.sales().open_for_register(register_id, now).await?)
    }
}
