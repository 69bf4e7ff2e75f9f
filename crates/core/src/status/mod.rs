//! Canonical workflow status, derived from the independently written cart, quotation,
//! negotiation and order records. Every view renders from this one function.

use serde::{Deserialize, Serialize};

use crate::domain::cart::{Cart, CartStatus};
use crate::domain::negotiation::{Negotiation, NegotiationStatus};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::quotation::{Quotation, QuotationId, QuotationStatus};

/// Ordered by lifecycle progress. `ClosedDeclined` sorts last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalStatus {
    Submitted,
    UnderReview,
    OpsForwarded,
    Quoted,
    Counter,
    Final,
    AcceptedPendingOpsRecheck,
    AcceptedPaymentPending,
    PaymentLinkSent,
    PaidConfirmed,
    ReadyForOps,
    InOpsProcessing,
    ClosedAccepted,
    ClosedDeclined,
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::OpsForwarded => "OPS_FORWARDED",
            Self::Quoted => "QUOTED",
            Self::Counter => "COUNTER",
            Self::Final => "FINAL",
            Self::AcceptedPendingOpsRecheck => "ACCEPTED_PENDING_OPS_RECHECK",
            Self::AcceptedPaymentPending => "ACCEPTED_PAYMENT_PENDING",
            Self::PaymentLinkSent => "PAYMENT_LINK_SENT",
            Self::PaidConfirmed => "PAID_CONFIRMED",
            Self::ReadyForOps => "READY_FOR_OPS",
            Self::InOpsProcessing => "IN_OPS_PROCESSING",
            Self::ClosedAccepted => "CLOSED_ACCEPTED",
            Self::ClosedDeclined => "CLOSED_DECLINED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let all = [
            Self::Submitted,
            Self::UnderReview,
            Self::OpsForwarded,
            Self::Quoted,
            Self::Counter,
            Self::Final,
            Self::AcceptedPendingOpsRecheck,
            Self::AcceptedPaymentPending,
            Self::PaymentLinkSent,
            Self::PaidConfirmed,
            Self::ReadyForOps,
            Self::InOpsProcessing,
            Self::ClosedAccepted,
            Self::ClosedDeclined,
        ];
        let normalized = value.trim().to_ascii_uppercase();
        all.into_iter().find(|status| status.as_str() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveOptions {
    /// Treat a missing ops-check status as approved when payment or ops timestamps exist.
    pub infer_legacy_ops_approval: bool,
}

impl Default for DeriveOptions {
    fn default() -> Self {
        Self { infer_legacy_ops_approval: true }
    }
}

/// The facts the derivation reads. Everything is borrowed; nothing is fetched.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowFacts<'a> {
    pub cart: Option<&'a Cart>,
    pub quotation: Option<&'a Quotation>,
    pub negotiation: Option<&'a Negotiation>,
    pub order: Option<&'a Order>,
}

/// First matching rule wins. Depends only on the supplied facts.
pub fn derive_canonical_status(facts: &WorkflowFacts<'_>, options: DeriveOptions) -> CanonicalStatus {
    if let Some(order) = facts.order {
        return order_status(order, options);
    }

    if let Some(negotiation) = facts.negotiation {
        match negotiation.status {
            NegotiationStatus::Accepted => return CanonicalStatus::AcceptedPendingOpsRecheck,
            NegotiationStatus::Rejected => return CanonicalStatus::ClosedDeclined,
            NegotiationStatus::Open
            | NegotiationStatus::CounterBuyer
            | NegotiationStatus::CounterSeller => {
                let final_offer = facts.quotation.is_some_and(|quotation| quotation.is_final_offer);
                return if final_offer { CanonicalStatus::Final } else { CanonicalStatus::Counter };
            }
            NegotiationStatus::Closed => {}
        }
    }

    if let Some(quotation) = facts.quotation {
        match quotation.status {
            QuotationStatus::Accepted => return CanonicalStatus::AcceptedPendingOpsRecheck,
            QuotationStatus::Rejected => return CanonicalStatus::ClosedDeclined,
            QuotationStatus::Sent if quotation.is_final_offer => return CanonicalStatus::Final,
            QuotationStatus::Sent => return CanonicalStatus::Quoted,
            QuotationStatus::Draft | QuotationStatus::Expired => {}
        }
    }

    match facts.cart {
        None => CanonicalStatus::Submitted,
        Some(cart) => match cart.status {
            CartStatus::Closed => CanonicalStatus::ClosedDeclined,
            // The active quotation lapsed or is a re-quote draft: sales owes a new offer.
            CartStatus::Quoted if facts.quotation.is_some() => CanonicalStatus::UnderReview,
            CartStatus::Quoted => CanonicalStatus::Quoted,
            _ if cart.assigned_sales_id.is_some() && facts.quotation.is_none() => {
                CanonicalStatus::OpsForwarded
            }
            CartStatus::UnderReview => CanonicalStatus::UnderReview,
            CartStatus::Draft | CartStatus::Submitted => CanonicalStatus::Submitted,
        },
    }
}

fn order_status(order: &Order, options: DeriveOptions) -> CanonicalStatus {
    if order.status.is_closed_unfulfilled() {
        return CanonicalStatus::ClosedDeclined;
    }
    if order.status == OrderStatus::Completed {
        return CanonicalStatus::ClosedAccepted;
    }
    if order.status.is_in_fulfillment() {
        return CanonicalStatus::InOpsProcessing;
    }
    if order.forwarded_to_ops_at.is_some() {
        return CanonicalStatus::ReadyForOps;
    }
    if order.has_paid_signal() {
        return CanonicalStatus::PaidConfirmed;
    }
    if order.payment_link_sent_at.is_some() {
        return CanonicalStatus::PaymentLinkSent;
    }
    if order.resolve_ops_check(options.infer_legacy_ops_approval).is_approved() {
        return CanonicalStatus::AcceptedPaymentPending;
    }
    CanonicalStatus::AcceptedPendingOpsRecheck
}

/// The active quotation: most recent by `updated_at ?? sent_at ?? created_at`, ties broken by
/// the larger id so the choice is stable.
pub fn select_active_quotation(quotations: &[Quotation]) -> Option<&Quotation> {
    quotations.iter().max_by(|left, right| {
        left.recency().cmp(&right.recency()).then_with(|| left.id.cmp(&right.id))
    })
}

/// Where a viewer of `viewing` should be sent. `None` when it already is the active quotation,
/// so following the redirect repeatedly settles on one id.
pub fn resolve_quotation_redirect<'a>(
    viewing: &QuotationId,
    quotations: &'a [Quotation],
) -> Option<&'a QuotationId> {
    select_active_quotation(quotations)
        .map(|active| &active.id)
        .filter(|active| *active != viewing)
}
