//! Ports and logic for confirming gateway payments that arrive through a browser redirect.

pub mod reconcile;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::{Order, OrderId};
use crate::domain::payment::Payment;

pub use reconcile::{PaymentReconciler, ReconciliationOutcome, RedirectParams};

/// What the gateway reports for a checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    pub session_id: String,
    /// Gateway payment id when the session produced a charge.
    pub payment_reference: Option<String>,
    pub paid: bool,
    pub amount: Option<Decimal>,
    pub order_id: Option<OrderId>,
}

impl GatewaySession {
    /// Reference stored on the payment row; one payment per reference.
    pub fn reference(&self) -> &str {
        self.payment_reference.as_deref().unwrap_or(&self.session_id)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("gateway responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("gateway is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("order `{0}` was not found")]
    OrderNotFound(OrderId),
    #[error("order ledger rejected the payment: {0}")]
    Rejected(String),
    #[error("order ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify_session(&self, session_id: &str) -> Result<GatewaySession, GatewayError>;
}

#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError>;

    /// Appends a gateway payment. Must return the stored order unchanged when a payment with
    /// the same gateway reference already exists.
    async fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment: Payment,
    ) -> Result<Order, LedgerError>;
}

/// Durable record of checkout sessions already reconciled, keyed by session id.
#[async_trait]
pub trait ReconciliationMarkers: Send + Sync {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, LedgerError>;
    async fn mark_reconciled(&self, session_id: &str, order_id: &OrderId) -> Result<(), LedgerError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn verify_session(&self, session_id: &str) -> Result<GatewaySession, GatewayError> {
        (**self).verify_session(session_id).await
    }
}

#[async_trait]
impl<T: OrderLedger + ?Sized> OrderLedger for Arc<T> {
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        (**self).find_order(order_id).await
    }

    async fn record_gateway_payment(
        &self,
        order_id: &OrderId,
        payment: Payment,
    ) -> Result<Order, LedgerError> {
        (**self).record_gateway_payment(order_id, payment).await
    }
}

#[async_trait]
impl<T: ReconciliationMarkers + ?Sized> ReconciliationMarkers for Arc<T> {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, LedgerError> {
        (**self).is_reconciled(session_id).await
    }

    async fn mark_reconciled(&self, session_id: &str, order_id: &OrderId) -> Result<(), LedgerError> {
        (**self).mark_reconciled(session_id, order_id).await
    }
}
