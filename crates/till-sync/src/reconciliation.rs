//! # Payment Reconciliation Engine
//!
//! Applies, corrects, defers and removes payments, then tells the hub.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Payment Reconciliation Flow                         │
//! │                                                                         │
//! │  apply / record_payment                                                │
//! │    one write transaction: check amount ≤ outstanding                   │
//! │                     ─► insert payment (daily sequence) ─► new balance  │
//! │    publish: paid | partially-paid                                      │
//! │                                                                         │
//! │  correct_payment / remove_payment                                      │
//! │    one write transaction: closed period? ─► reject                     │
//! │                     ─► write ─► rebuild sale from ALL its payments     │
//! │    publish: sale-updated                                               │
//! │                                                                         │
//! │  defer_payment                                                         │
//! │    status DEFERRED, no payment row                                     │
//! │    publish: deferred                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are published only after the transaction committed.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::hub::HubHandle;
use crate::protocol::SaleEvent;
use till_core::reconcile::SaleChange;
use till_core::{CoreError, NewPayment, PaymentCorrection, Sale, ValidationError};
use till_db::{Database, PaymentWrite};

/// A till's payment request. With `defer_to_another_day` and no amount
/// the sale is deferred instead of paid.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub payment: NewPayment,
    pub defer_to_another_day: bool,
}

/// What a [`PaymentRequest`] ended up doing.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    Recorded(PaymentWrite),
    Deferred(Sale),
}

impl PaymentOutcome {
    /// The sale after the request, if the request concerned one.
    pub fn sale(&self) -> Option<&Sale> {
        match self {
            PaymentOutcome::Recorded(write) => write.sale.as_ref(),
            PaymentOutcome::Deferred(sale) => Some(sale),
        }
    }
}

/// Payment side of the ledger.
#[derive(Debug, Clone)]
pub struct PaymentReconciler {
    db: Database,
    hub: HubHandle,
}

impl PaymentReconciler {
    pub fn new(db: Database, hub: HubHandle) -> Self {
        PaymentReconciler { db, hub }
    }

    /// Entry point for a till's "pay" action.
    pub async fn apply(&self, request: &PaymentRequest, now: DateTime<Utc>) -> SyncResult<PaymentOutcome> {
        if request.defer_to_another_day && request.payment.amount_cents == 0 {
            let sale_id = request.payment.sale_id.ok_or_else(|| {
                CoreError::from(ValidationError::Required {
                    field: "sale".into(),
                })
            })?;
            let sale = self.defer_payment(sale_id, now).await?;
            return Ok(PaymentOutcome::Deferred(sale));
        }

        let write = self.record_payment(&request.payment, now).await?;
        Ok(PaymentOutcome::Recorded(write))
    }

    /// Records a payment and applies it to its sale.
    pub async fn record_payment(&self, new: &NewPayment, now: DateTime<Utc>) -> SyncResult<PaymentWrite> {
        let write = self.db.payments().record(new, now).await?;

        if let Some(sale) = &write.sale {
            info!(
                sale_id = sale.id,
                payment_id = write.payment.id,
                outstanding = sale.outstanding_cents,
                status = %sale.payment_status,
                "Payment applied"
            );
            self.hub
                .publish(SaleEvent::changed(sale.clone(), write.change))
                .await;
        } else {
            debug!(payment_id = write.payment.id, "Deposit recorded");
        }
        Ok(write)
    }

    /// Changes amount and, optionally, method of a payment outside any
    /// closed period. The sale is rebuilt from its full payment set.
    pub async fn correct_payment(
        &self,
        payment_id: i64,
        correction: &PaymentCorrection,
        now: DateTime<Utc>,
    ) -> SyncResult<PaymentWrite> {
        let write = self.db.payments().correct(payment_id, correction, now).await?;
        self.publish_rebuilt(&write).await;
        Ok(write)
    }

    /// Marks a sale to be paid another day.
    pub async fn defer_payment(&self, sale_id: i64, now: DateTime<Utc>) -> SyncResult<Sale> {
        let sale = self.db.sales().defer(sale_id, now).await?;
        info!(sale_id, "Payment deferred");
        self.hub
            .publish(SaleEvent::changed(sale.clone(), SaleChange::Deferred))
            .await;
        Ok(sale)
    }

    /// Deletes a payment outside any closed period.
    pub async fn remove_payment(&self, payment_id: i64, now: DateTime<Utc>) -> SyncResult<PaymentWrite> {
        let write = self.db.payments().remove(payment_id, now).await?;
        self.publish_rebuilt(&write).await;
        Ok(write)
    }

    /// The closed record already covering a payment, if any.
    pub async fn is_in_closed_period(&self, payment_id: i64) -> SyncResult<Option<i64>> {
        Ok(self.db.payments().closed_period_of(payment_id).await?)
    }

    async fn publish_rebuilt(&self, write: &PaymentWrite) {
        if let Some(sale) = &write.sale {
            debug!(
                sale_id = sale.id,
                paid = sale.paid_cents,
                outstanding = sale.outstanding_cents,
                "Sale rebuilt from payments"
            );
            self.hub
                .publish(SaleEvent::changed(sale.clone(), SaleChange::Updated))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::HubMessage;
    use crate::testing::{at, Ledger};
    use till_core::{ClosingStatus, PaymentStatus, RegisterTotals};
    use till_db::ClosingGuard;

    fn payment(ledger: &Ledger, sale: &Sale, amount_cents: i64) -> NewPayment {
        NewPayment {
            sale_id: Some(sale.id),
            amount_cents,
            method_id: ledger.cash,
            register_id: ledger.register,
            business_id: sale.business_id,
        }
    }

    #[tokio::test]
    async fn test_two_payments_settle_the_sale() {
        let ledger = Ledger::new().await;
        let sale = ledger.db.sales().create(&ledger.new_sale(1000), at(9, 0)).await.unwrap();
        let (snapshot, mut events) = ledger.watch(ledger.register).await;
        assert_eq!(snapshot.len(), 1);

        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());

        let first = engine.record_payment(&payment(&ledger, &sale, 400), at(9, 5)).await.unwrap();
        let after_first = first.sale.unwrap();
        assert_eq!(after_first.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(after_first.outstanding_cents, 600);

        let second = engine.record_payment(&payment(&ledger, &sale, 600), at(9, 10)).await.unwrap();
        let after_second = second.sale.unwrap();
        assert_eq!(after_second.payment_status, PaymentStatus::FullyPaid);
        assert_eq!(after_second.outstanding_cents, 0);

        assert!(matches!(events.recv().await.unwrap(), HubMessage::PartiallyPaid(s) if s.paid_cents == 400));
        assert!(matches!(events.recv().await.unwrap(), HubMessage::Paid(s) if s.paid_cents == 1000));
    }

    #[tokio::test]
    async fn test_overpayment_is_rejected_without_event() {
        let ledger = Ledger::new().await;
        let sale = ledger.db.sales().create(&ledger.new_sale(500), at(9, 0)).await.unwrap();
        let (_, mut events) = ledger.watch(ledger.register).await;
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());

        let err = engine
            .record_payment(&payment(&ledger, &sale, 501), at(9, 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_correction_rebuilds_from_all_payments() {
        let ledger = Ledger::new().await;
        let sale = ledger.db.sales().create(&ledger.new_sale(1000), at(9, 0)).await.unwrap();
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());
        let recorded = engine.record_payment(&payment(&ledger, &sale, 300), at(9, 5)).await.unwrap();
        let (_, mut events) = ledger.watch(ledger.register).await;

        let correction = PaymentCorrection {
            amount_cents: 500,
            method_id: Some(ledger.card),
        };
        let corrected = engine
            .correct_payment(recorded.payment.id, &correction, at(10, 0))
            .await
            .unwrap();
        let sale_after = corrected.sale.unwrap();
        assert_eq!(sale_after.paid_cents, 500);
        assert_eq!(sale_after.outstanding_cents, 500);
        assert_eq!(sale_after.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(corrected.payment.method_name, "Tarjeta");

        // Same correction again leaves the sale untouched.
        let again = engine
            .correct_payment(recorded.payment.id, &correction, at(10, 1))
            .await
            .unwrap()
            .sale
            .unwrap();
        assert_eq!(
            (again.paid_cents, again.outstanding_cents, again.payment_status),
            (500, 500, PaymentStatus::PartiallyPaid)
        );

        assert!(matches!(events.recv().await.unwrap(), HubMessage::SaleUpdated(s) if s.paid_cents == 500));
    }

    #[tokio::test]
    async fn test_closed_period_blocks_correction_and_removal() {
        let ledger = Ledger::new().await;
        let sale = ledger.db.sales().create(&ledger.new_sale(1000), at(9, 0)).await.unwrap();
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());
        let recorded = engine.record_payment(&payment(&ledger, &sale, 300), at(13, 0)).await.unwrap();

        let closing = match ledger
            .db
            .closings()
            .create(
                &RegisterTotals::empty(ledger.register),
                Some(1),
                ClosingStatus::Closed,
                ClosingGuard::None,
                at(14, 0),
            )
            .await
            .unwrap()
        {
            till_core::ClosingOutcome::Created(record) => record,
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(engine.is_in_closed_period(recorded.payment.id).await.unwrap(), Some(closing.id));

        let correction = PaymentCorrection {
            amount_cents: 500,
            method_id: None,
        };
        let err = engine
            .correct_payment(recorded.payment.id, &correction, at(15, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedPeriod);
        assert!(!err.is_retryable());

        let err = engine.remove_payment(recorded.payment.id, at(15, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedPeriod);

        // A payment after the cutoff is still editable.
        let later = engine.record_payment(&payment(&ledger, &sale, 200), at(15, 0)).await.unwrap();
        assert_eq!(engine.is_in_closed_period(later.payment.id).await.unwrap(), None);
        let removed = engine.remove_payment(later.payment.id, at(15, 5)).await.unwrap();
        assert_eq!(removed.sale.unwrap().paid_cents, 300);
    }

    #[tokio::test]
    async fn test_defer_request_without_amount() {
        let ledger = Ledger::new().await;
        let mut new = ledger.new_sale(800);
        new.business_id = ledger.account_business;
        let sale = ledger.db.sales().create(&new, at(9, 0)).await.unwrap();
        assert_eq!(sale.payment_status, PaymentStatus::CreditAccount);
        let (_, mut events) = ledger.watch(ledger.register).await;
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());

        let request = PaymentRequest {
            payment: NewPayment {
                amount_cents: 0,
                ..payment(&ledger, &sale, 0)
            },
            defer_to_another_day: true,
        };
        let outcome = engine.apply(&request, at(9, 30)).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::Deferred(_)));
        assert_eq!(outcome.sale().unwrap().payment_status, PaymentStatus::Deferred);
        assert!(ledger.db.payments().list_for_sale(sale.id).await.unwrap().is_empty());
        assert!(matches!(events.recv().await.unwrap(), HubMessage::Deferred(s) if s.id == sale.id));

        // With an amount the request is a plain payment.
        let request = PaymentRequest {
            payment: payment(&ledger, &sale, 300),
            defer_to_another_day: true,
        };
        let outcome = engine.apply(&request, at(9, 40)).await.unwrap();
        assert_eq!(outcome.sale().unwrap().payment_status, PaymentStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn test_defer_paid_sale_is_rejected() {
        let ledger = Ledger::new().await;
        let sale = ledger.db.sales().create(&ledger.new_sale(100), at(9, 0)).await.unwrap();
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());
        engine.record_payment(&payment(&ledger, &sale, 100), at(9, 5)).await.unwrap();

        let err = engine.defer_payment(sale.id, at(9, 10)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine.defer_payment(9999, at(9, 10)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_deposit_publishes_nothing() {
        let ledger = Ledger::new().await;
        let (_, mut events) = ledger.watch(ledger.register).await;
        let engine = PaymentReconciler::new(ledger.db.clone(), ledger.hub.clone());

        let write = engine
            .record_payment(
                &NewPayment {
                    sale_id: None,
                    amount_cents: 250,
                    method_id: ledger.cash,
                    register_id: ledger.register,
                    business_id: ledger.business,
                },
                at(11, 0),
            )
            .await
            .unwrap();
        assert!(write.sale.is_none());
        assert_eq!(write.payment.sequence_number, "20240305-0001");
        assert_eq!(ledger.hub.subscriber_count(ledger.register).await, 1);
        assert!(events.try_recv().is_err());
    }
}
