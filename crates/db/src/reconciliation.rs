//! Repository-backed implementations of the payment reconciliation ports.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use gemsource_core::domain::order::{Order, OrderId};
use gemsource_core::domain::payment::Payment;
use gemsource_core::payments::{LedgerError, OrderLedger, ReconciliationMarkers};

use crate::repositories::{OrderRepository, ReconciliationMarkerRepository, RepositoryError};

impl From<RepositoryError> for LedgerError {
    fn from(error: RepositoryError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

#[derive(Clone)]
pub struct RepositoryOrderLedger {
    orders: Arc<dyn OrderRepository>,
}

impl RepositoryOrderLedger {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrderLedger for RepositoryOrderLedger {
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        Ok(self.orders.find_by_id(order_id).await?)
    }

    async fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment: Payment,
    ) -> Result<Order, LedgerError> {
        let mut order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;

        if let Some(reference) = payment.gateway_reference.as_deref() {
            if order.has_gateway_reference(reference) {
                return Ok(order);
            }
        }

        order.record_payment(payment).map_err(|error| LedgerError::Rejected(error.to_string()))?;
        self.orders.save(order.clone()).await?;
        Ok(order)
    }
}

#[derive(Clone)]
pub struct RepositoryReconciliationMarkers {
    markers: Arc<dyn ReconciliationMarkerRepository>,
}

impl RepositoryReconciliationMarkers {
    pub fn new(markers: Arc<dyn ReconciliationMarkerRepository>) -> Self {
        Self { markers }
    }
}

#[async_trait]
impl ReconciliationMarkers for RepositoryReconciliationMarkers {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, LedgerError> {
        Ok(self.markers.is_reconciled(session_id).await?)
    }

    async fn mark_reconciled(&self, session_id: &str, order_id: &OrderId) -> Result<(), LedgerError> {
        Ok(self.markers.mark_reconciled(session_id, order_id, Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use gemsource_core::domain::order::OrderId;
    use gemsource_core::domain::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
    use gemsource_core::payments::{LedgerError, OrderLedger, ReconciliationMarkers};

    use super::{RepositoryOrderLedger, RepositoryReconciliationMarkers};
    use crate::fixtures::sample_order;
    use crate::repositories::{
        InMemoryOrderRepository, InMemoryReconciliationMarkerRepository, OrderRepository,
    };

    fn gateway_payment(id: &str) -> Payment {
        let now = Utc::now();
        Payment {
            id: PaymentId(id.to_string()),
            order_id: OrderId("ord-1".to_string()),
            amount: Decimal::new(460, 0),
            method: PaymentMethod::Card,
            status: PaymentStatus::Completed,
            gateway_reference: Some("pi_abc".to_string()),
            transaction_ref: None,
            paid_at: Some(now),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn recording_the_same_gateway_reference_twice_books_once() {
        let orders = Arc::new(InMemoryOrderRepository::default());
        orders
            .save(sample_order("ord-1", "cart-1", "quo-1", Decimal::new(460, 0)))
            .await
            .expect("seed order");
        let ledger = RepositoryOrderLedger::new(orders.clone());
        let order_id = OrderId("ord-1".to_string());

        ledger.record_gateway_payment(&order_id, gateway_payment("pay-1")).await.expect("first");
        let order =
            ledger.record_gateway_payment(&order_id, gateway_payment("pay-2")).await.expect("second");

        assert_eq!(order.payments.len(), 1);
        assert_eq!(order.paid_amount, Decimal::new(460, 0));
        assert!(order.has_paid_signal());
    }

    #[tokio::test]
    async fn unknown_order_is_reported() {
        let ledger = RepositoryOrderLedger::new(Arc::new(InMemoryOrderRepository::default()));
        let error = ledger
            .record_gateway_payment(&OrderId("missing".to_string()), gateway_payment("pay-1"))
            .await
            .expect_err("order does not exist");

        assert_eq!(error, LedgerError::OrderNotFound(OrderId("missing".to_string())));
    }

    #[tokio::test]
    async fn markers_adapter_delegates_to_repository() {
        let markers =
            RepositoryReconciliationMarkers::new(Arc::new(InMemoryReconciliationMarkerRepository::default()));
        let order_id = OrderId("ord-1".to_string());

        assert!(!markers.is_reconciled("cs_1").await.expect("read"));
        markers.mark_reconciled("cs_1", &order_id).await.expect("mark");
        assert!(markers.is_reconciled("cs_1").await.expect("read"));
    }
}
