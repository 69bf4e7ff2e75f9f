use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::order::{Order, OrderId};
use crate::domain::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
use crate::payments::{
    GatewaySession, OrderLedger, PaymentGateway, ReconciliationMarkers,
};

/// Query parameters a payment redirect lands with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectParams {
    pub session_id: Option<String>,
    pub order_id: Option<String>,
}

impl RedirectParams {
    /// Reads `session_id` and `order_id` from a percent-encoded query string; other keys are
    /// ignored.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        let query = query.trim_start_matches('?');
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "session_id" => params.session_id = Some(value.to_owned()),
                "order_id" => params.order_id = Some(value.to_owned()),
                _ => {}
            }
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.order_id.is_none()
    }

    fn take(&mut self) -> (Option<String>, Option<String>) {
        (self.session_id.take(), self.order_id.take())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// The redirect carried no session; an abandoned checkout.
    NoSession,
    AlreadyReconciled { session_id: String },
    Recorded { session_id: String, order: Order },
    /// Verification failed but the order already shows a paid signal.
    ConfirmedByOrderFallback { session_id: String, order: Order },
    /// Paid and recorded, but ops had not approved the order; needs review before fulfillment.
    RecordedPendingOpsCheck { session_id: String, order: Order },
    NotPaid { session_id: String },
    /// The redirect names a different order than the one the gateway session paid for.
    OrderMismatch { session_id: String, redirect_order: OrderId, session_order: OrderId },
    /// Retry is possible; no marker was written.
    VerificationFailed { session_id: String, message: String },
}

impl ReconciliationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::AlreadyReconciled { .. }
                | Self::Recorded { .. }
                | Self::RecordedPendingOpsCheck { .. }
                | Self::ConfirmedByOrderFallback { .. }
        )
    }

    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::VerificationFailed { .. } => {
                Some("Payment verification failed, please retry in a moment.")
            }
            Self::NotPaid { .. } => Some("The payment was not completed."),
            Self::RecordedPendingOpsCheck { .. } => {
                Some("Payment received. Operations will review the order before it proceeds.")
            }
            Self::OrderMismatch { .. } => {
                Some("This payment belongs to a different order. Please contact support.")
            }
            _ => None,
        }
    }
}

pub struct PaymentReconciler<G, L, M> {
    gateway: G,
    ledger: L,
    markers: M,
    infer_legacy_ops_approval: bool,
}

impl<G, L, M> PaymentReconciler<G, L, M>
where
    G: PaymentGateway,
    L: OrderLedger,
    M: ReconciliationMarkers,
{
    pub fn new(gateway: G, ledger: L, markers: M) -> Self {
        Self { gateway, ledger, markers, infer_legacy_ops_approval: true }
    }

    /// Whether a missing ops-check status on legacy orders counts as approved.
    pub fn with_legacy_ops_inference(mut self, enabled: bool) -> Self {
        self.infer_legacy_ops_approval = enabled;
        self
    }

    /// Reconciles a redirect once. The parameters are cleared before any I/O so a refresh can
    /// never re-trigger the same attempt.
    pub async fn reconcile(
        &self,
        params: &mut RedirectParams,
        now: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let (session_id, order_id) = params.take();
        let Some(session_id) = session_id else {
            return ReconciliationOutcome::NoSession;
        };

        match self.markers.is_reconciled(&session_id).await {
            Ok(true) => {
                info!(
                    event_name = "payment.reconciliation.short_circuit",
                    session_id = %session_id,
                    "payment session already reconciled"
                );
                return ReconciliationOutcome::AlreadyReconciled { session_id };
            }
            Ok(false) => {}
            Err(error) => {
                warn!(
                    event_name = "payment.reconciliation.marker_unreadable",
                    session_id = %session_id,
                    error = %error,
                    "marker lookup failed; relying on gateway reference de-duplication"
                );
            }
        }

        let redirect_order = order_id.map(OrderId);
        let verified = match self.gateway.verify_session(&session_id).await {
            Ok(session) => session,
            Err(error) => {
                warn!(
                    event_name = "payment.reconciliation.verification_failed",
                    session_id = %session_id,
                    error = %error,
                    "gateway verification failed; checking order paid signal"
                );
                return self.fallback(session_id, redirect_order, error.to_string()).await;
            }
        };

        let order_id = match (redirect_order, verified.order_id.clone()) {
            (Some(redirect_order), Some(session_order)) if redirect_order != session_order => {
                warn!(
                    event_name = "payment.reconciliation.order_mismatch",
                    session_id = %session_id,
                    redirect_order = %redirect_order,
                    session_order = %session_order,
                    "redirect order differs from the order the session paid for"
                );
                return ReconciliationOutcome::OrderMismatch {
                    session_id,
                    redirect_order,
                    session_order,
                };
            }
            (_, Some(session_order)) => session_order,
            (Some(redirect_order), None) => redirect_order,
            (None, None) => {
                return ReconciliationOutcome::VerificationFailed {
                    session_id,
                    message: "redirect did not identify an order".to_owned(),
                };
            }
        };

        if !verified.paid {
            info!(
                event_name = "payment.reconciliation.not_paid",
                session_id = %session_id,
                order_id = %order_id,
                "gateway reports session unpaid"
            );
            return ReconciliationOutcome::NotPaid { session_id };
        }

        let current = match self.ledger.find_order(&order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                let message = format!("order `{order_id}` was not found");
                return self.fallback(session_id, Some(order_id), message).await;
            }
            Err(error) => return self.fallback(session_id, Some(order_id), error.to_string()).await,
        };
        // Judged before the payment lands, since a paid signal feeds the legacy inference.
        let ops_cleared = current.resolve_ops_check(self.infer_legacy_ops_approval).is_approved();
        let payment = gateway_payment(&current, &verified, now);
        let payment_id = payment.id.clone();

        match self.ledger.record_gateway_payment(&order_id, payment).await {
            Ok(order) => {
                self.mark(&session_id, &order_id).await;
                if !ops_cleared {
                    warn!(
                        event_name = "payment.reconciliation.ops_check_pending",
                        session_id = %session_id,
                        order_id = %order_id,
                        payment_id = %payment_id,
                        "gateway payment recorded before ops final check approval"
                    );
                    return ReconciliationOutcome::RecordedPendingOpsCheck { session_id, order };
                }
                info!(
                    event_name = "payment.reconciliation.recorded",
                    session_id = %session_id,
                    order_id = %order_id,
                    payment_id = %payment_id,
                    paid_amount = %order.paid_amount,
                    "gateway payment reconciled"
                );
                ReconciliationOutcome::Recorded { session_id, order }
            }
            Err(error) => self.fallback(session_id, Some(order_id), error.to_string()).await,
        }
    }

    async fn fallback(
        &self,
        session_id: String,
        order_id: Option<OrderId>,
        message: String,
    ) -> ReconciliationOutcome {
        let Some(order_id) = order_id else {
            return ReconciliationOutcome::VerificationFailed { session_id, message };
        };

        match self.ledger.find_order(&order_id).await {
            Ok(Some(order)) if order.has_paid_signal() => {
                self.mark(&session_id, &order_id).await;
                info!(
                    event_name = "payment.reconciliation.fallback_confirmed",
                    session_id = %session_id,
                    order_id = %order_id,
                    "order already paid; treating redirect as reconciled"
                );
                ReconciliationOutcome::ConfirmedByOrderFallback { session_id, order }
            }
            Ok(_) => ReconciliationOutcome::VerificationFailed { session_id, message },
            Err(error) => ReconciliationOutcome::VerificationFailed {
                session_id,
                message: format!("{message}; {error}"),
            },
        }
    }

    async fn mark(&self, session_id: &str, order_id: &OrderId) {
        if let Err(error) = self.markers.mark_reconciled(session_id, order_id).await {
            warn!(
                event_name = "payment.reconciliation.marker_write_failed",
                session_id = %session_id,
                order_id = %order_id,
                error = %error,
                "could not persist reconciliation marker"
            );
        }
    }
}

fn gateway_payment(order: &Order, session: &GatewaySession, now: DateTime<Utc>) -> Payment {
    let amount = match session.amount {
        Some(amount) if amount > Decimal::ZERO => amount,
        _ => order.outstanding_amount(),
    };

    Payment {
        id: PaymentId(Uuid::new_v4().to_string()),
        order_id: order.id.clone(),
        amount,
        method: PaymentMethod::Card,
        status: PaymentStatus::Completed,
        gateway_reference: Some(session.reference().to_owned()),
        transaction_ref: Some(session.session_id.clone()),
        paid_at: Some(now),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{PaymentReconciler, ReconciliationOutcome, RedirectParams};
    use crate::domain::cart::CartId;
    use crate::domain::order::{OpsCheckStatus, OpsFinalCheck, Order, OrderBasis, OrderId, OrderStatus};
    use crate::domain::payment::Payment;
    use crate::domain::quotation::QuotationId;
    use crate::errors::DomainError;
    use crate::payments::{
        GatewayError, GatewaySession, LedgerError, OrderLedger, PaymentGateway,
        ReconciliationMarkers,
    };

    #[derive(Clone)]
    struct FakeGateway {
        result: Result<GatewaySession, GatewayError>,
        calls: Arc<Mutex<usize>>,
    }

    impl FakeGateway {
        fn paid(amount: i64) -> Self {
            Self {
                result: Ok(GatewaySession {
                    session_id: "cs_1".to_owned(),
                    payment_reference: Some("pi_1".to_owned()),
                    paid: true,
                    amount: Some(Decimal::new(amount, 2)),
                    order_id: None,
                }),
                calls: Arc::default(),
            }
        }

        fn for_order(mut self, order_id: &str) -> Self {
            if let Ok(session) = self.result.as_mut() {
                session.order_id = Some(OrderId(order_id.to_owned()));
            }
            self
        }

        fn failing() -> Self {
            Self {
                result: Err(GatewayError::Transport("connection reset".to_owned())),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn verify_session(&self, _session_id: &str) -> Result<GatewaySession, GatewayError> {
            *self.calls.lock().expect("lock") += 1;
            self.result.clone()
        }
    }

    #[derive(Clone, Default)]
    struct FakeLedger {
        orders: Arc<Mutex<BTreeMap<OrderId, Order>>>,
    }

    impl FakeLedger {
        fn with(order: Order) -> Self {
            let ledger = Self::default();
            ledger.orders.lock().expect("lock").insert(order.id.clone(), order);
            ledger
        }

        fn order(&self, id: &str) -> Order {
            self.orders.lock().expect("lock").get(&OrderId(id.to_owned())).cloned().expect("order")
        }
    }

    #[async_trait]
    impl OrderLedger for FakeLedger {
        async fn find_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
            Ok(self.orders.lock().expect("lock").get(order_id).cloned())
        }

        async fn record_gateway_payment(
            &self,
            order_id: &OrderId,
            payment: Payment,
        ) -> Result<Order, LedgerError> {
            let mut orders = self.orders.lock().expect("lock");
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| LedgerError::OrderNotFound(order_id.clone()))?;
            match order.record_payment(payment) {
                Ok(()) | Err(DomainError::DuplicatePayment { .. }) => Ok(order.clone()),
                Err(error) => Err(LedgerError::Rejected(error.to_string())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakeMarkers {
        sessions: Arc<Mutex<BTreeSet<String>>>,
    }

    #[async_trait]
    impl ReconciliationMarkers for FakeMarkers {
        async fn is_reconciled(&self, session_id: &str) -> Result<bool, LedgerError> {
            Ok(self.sessions.lock().expect("lock").contains(session_id))
        }

        async fn mark_reconciled(&self, session_id: &str, _order_id: &OrderId) -> Result<(), LedgerError> {
            self.sessions.lock().expect("lock").insert(session_id.to_owned());
            Ok(())
        }
    }

    fn order() -> Order {
        let at = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
        Order {
            id: OrderId("ord-1".to_owned()),
            cart_id: CartId("cart-1".to_owned()),
            quotation_id: QuotationId("qt-1".to_owned()),
            negotiation_id: None,
            basis: OrderBasis::Quotation,
            status: OrderStatus::Pending,
            lines: Vec::new(),
            total_amount: Decimal::new(46_000, 2),
            paid_amount: Decimal::ZERO,
            ops_final_check: OpsFinalCheck {
                status: Some(OpsCheckStatus::Approved),
                ..OpsFinalCheck::default()
            },
            payment_link_sent_at: Some(at),
            payment_confirmed_at: None,
            forwarded_to_ops_at: None,
            payments: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    fn redirect() -> RedirectParams {
        RedirectParams::from_query("?session_id=cs_1&order_id=ord-1&utm=mail")
    }

    #[test]
    fn query_parsing_ignores_unrelated_keys() {
        let params = redirect();
        assert_eq!(params.session_id.as_deref(), Some("cs_1"));
        assert_eq!(params.order_id.as_deref(), Some("ord-1"));
        assert!(RedirectParams::from_query("session_id=&x=1").is_empty());
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let params = RedirectParams::from_query("session_id=cs_test%5Fa1&order_id=ord%2D1+");
        assert_eq!(params.session_id.as_deref(), Some("cs_test_a1"));
        assert_eq!(params.order_id.as_deref(), Some("ord-1"));
    }

    #[tokio::test]
    async fn redirect_naming_another_order_credits_nothing() {
        let mut other = order();
        other.id = OrderId("ord-2".to_owned());
        let ledger = FakeLedger::with(order());
        ledger.orders.lock().expect("lock").insert(other.id.clone(), other);
        let markers = FakeMarkers::default();
        let reconciler = PaymentReconciler::new(
            FakeGateway::paid(46_000).for_order("ord-1"),
            ledger.clone(),
            markers.clone(),
        );

        let mut params = RedirectParams::from_query("session_id=cs_1&order_id=ord-2");
        let outcome = reconciler.reconcile(&mut params, Utc::now()).await;

        assert_eq!(
            outcome,
            ReconciliationOutcome::OrderMismatch {
                session_id: "cs_1".to_owned(),
                redirect_order: OrderId("ord-2".to_owned()),
                session_order: OrderId("ord-1".to_owned()),
            }
        );
        assert!(!outcome.is_success());
        assert!(ledger.order("ord-1").payments.is_empty());
        assert!(ledger.order("ord-2").payments.is_empty());
        assert_eq!(ledger.order("ord-2").paid_amount, Decimal::ZERO);
        assert!(!markers.is_reconciled("cs_1").await.expect("marker lookup"));
    }

    #[tokio::test]
    async fn session_order_is_used_when_redirect_omits_it() {
        let ledger = FakeLedger::with(order());
        let reconciler = PaymentReconciler::new(
            FakeGateway::paid(46_000).for_order("ord-1"),
            ledger.clone(),
            FakeMarkers::default(),
        );

        let outcome =
            reconciler.reconcile(&mut RedirectParams::from_query("session_id=cs_1"), Utc::now()).await;

        assert!(matches!(outcome, ReconciliationOutcome::Recorded { .. }));
        assert_eq!(ledger.order("ord-1").payments.len(), 1);
    }

    #[tokio::test]
    async fn payment_before_ops_approval_is_recorded_but_flagged() {
        let mut unchecked = order();
        unchecked.ops_final_check.status = Some(OpsCheckStatus::Pending);
        unchecked.payment_link_sent_at = None;
        let ledger = FakeLedger::with(unchecked);
        let markers = FakeMarkers::default();
        let reconciler =
            PaymentReconciler::new(FakeGateway::paid(46_000), ledger.clone(), markers.clone());

        let outcome = reconciler.reconcile(&mut redirect(), Utc::now()).await;

        assert!(matches!(outcome, ReconciliationOutcome::RecordedPendingOpsCheck { .. }));
        assert!(outcome.notice().is_some());
        assert_eq!(ledger.order("ord-1").payments.len(), 1);
        assert!(markers.is_reconciled("cs_1").await.expect("marker lookup"));
    }

    #[tokio::test]
    async fn legacy_order_without_check_status_follows_the_inference_switch() {
        let mut legacy = order();
        legacy.ops_final_check.status = None;

        let lenient = PaymentReconciler::new(
            FakeGateway::paid(46_000),
            FakeLedger::with(legacy.clone()),
            FakeMarkers::default(),
        );
        let outcome = lenient.reconcile(&mut redirect(), Utc::now()).await;
        assert!(matches!(outcome, ReconciliationOutcome::Recorded { .. }));

        let strict = PaymentReconciler::new(
            FakeGateway::paid(46_000),
            FakeLedger::with(legacy.clone()),
            FakeMarkers::default(),
        )
        .with_legacy_ops_inference(false);
        let outcome = strict.reconcile(&mut redirect(), Utc::now()).await;
        assert!(matches!(outcome, ReconciliationOutcome::RecordedPendingOpsCheck { .. }));
    }

    #[tokio::test]
    async fn repeated_redirect_records_exactly_one_payment() {
        let gateway = FakeGateway::paid(46_000);
        let ledger = FakeLedger::with(order());
        let reconciler = PaymentReconciler::new(gateway.clone(), ledger.clone(), FakeMarkers::default());

        let mut first = redirect();
        let outcome = reconciler.reconcile(&mut first, Utc::now()).await;
        assert!(matches!(outcome, ReconciliationOutcome::Recorded { .. }));
        assert!(first.is_empty());

        let mut second = redirect();
        let outcome = reconciler.reconcile(&mut second, Utc::now()).await;
        assert_eq!(outcome, ReconciliationOutcome::AlreadyReconciled { session_id: "cs_1".to_owned() });
        assert!(second.is_empty());

        let stored = ledger.order("ord-1");
        assert_eq!(stored.payments.len(), 1);
        assert_eq!(stored.payments[0].gateway_reference.as_deref(), Some("pi_1"));
        assert_eq!(stored.paid_amount, Decimal::new(46_000, 2));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn lost_marker_still_cannot_double_book() {
        let ledger = FakeLedger::with(order());
        let first = PaymentReconciler::new(FakeGateway::paid(46_000), ledger.clone(), FakeMarkers::default());
        let second = PaymentReconciler::new(FakeGateway::paid(46_000), ledger.clone(), FakeMarkers::default());

        first.reconcile(&mut redirect(), Utc::now()).await;
        let outcome = second.reconcile(&mut redirect(), Utc::now()).await;

        assert!(outcome.is_success());
        assert_eq!(ledger.order("ord-1").payments.len(), 1);
        assert_eq!(ledger.order("ord-1").paid_amount, Decimal::new(46_000, 2));
    }

    #[tokio::test]
    async fn verification_outage_falls_back_to_paid_order() {
        let mut paid = order();
        paid.payment_confirmed_at = Some(Utc::now());
        let markers = FakeMarkers::default();
        let reconciler =
            PaymentReconciler::new(FakeGateway::failing(), FakeLedger::with(paid), markers.clone());

        let outcome = reconciler.reconcile(&mut redirect(), Utc::now()).await;

        assert!(matches!(outcome, ReconciliationOutcome::ConfirmedByOrderFallback { .. }));
        assert!(markers.is_reconciled("cs_1").await.expect("marker lookup"));
    }

    #[tokio::test]
    async fn verification_outage_on_unpaid_order_allows_retry() {
        let markers = FakeMarkers::default();
        let reconciler =
            PaymentReconciler::new(FakeGateway::failing(), FakeLedger::with(order()), markers.clone());

        let mut params = redirect();
        let outcome = reconciler.reconcile(&mut params, Utc::now()).await;

        assert!(matches!(outcome, ReconciliationOutcome::VerificationFailed { .. }));
        assert!(outcome.notice().is_some());
        assert!(params.is_empty());
        assert!(!markers.is_reconciled("cs_1").await.expect("marker lookup"));
    }

    #[tokio::test]
    async fn redirect_without_session_is_a_no_op() {
        let gateway = FakeGateway::paid(46_000);
        let reconciler =
            PaymentReconciler::new(gateway.clone(), FakeLedger::with(order()), FakeMarkers::default());

        let mut params = RedirectParams::from_query("order_id=ord-1");
        let outcome = reconciler.reconcile(&mut params, Utc::now()).await;

        assert_eq!(outcome, ReconciliationOutcome::NoSession);
        assert!(params.is_empty());
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn unpaid_session_records_nothing() {
        let mut gateway = FakeGateway::paid(46_000);
        if let Ok(session) = gateway.result.as_mut() {
            session.paid = false;
        }
        let ledger = FakeLedger::with(order());
        let markers = FakeMarkers::default();
        let reconciler = PaymentReconciler::new(gateway, ledger.clone(), markers.clone());

        let outcome = reconciler.reconcile(&mut redirect(), Utc::now()).await;

        assert_eq!(outcome, ReconciliationOutcome::NotPaid { session_id: "cs_1".to_owned() });
        assert!(ledger.order("ord-1").payments.is_empty());
        assert!(!markers.is_reconciled("cs_1").await.expect("marker lookup"));
    }
}
