use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus};
use crate::domain::order::{
    OpsCheckStatus, OpsFinalCheck, Order, OrderBasis, OrderId, OrderLine, OrderStatus,
};
use crate::domain::quotation::Quotation;

/// Prices an order is created from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveTerms {
    pub basis: OrderBasis,
    pub lines: Vec<OrderLine>,
    pub total: Decimal,
}

impl EffectiveTerms {
    /// A fresh order on these terms. The ops final check starts explicitly pending.
    pub fn into_order(
        self,
        id: OrderId,
        quotation: &Quotation,
        negotiation_id: Option<NegotiationId>,
        at: DateTime<Utc>,
    ) -> Order {
        Order {
            id,
            cart_id: quotation.cart_id.clone(),
            quotation_id: quotation.id.clone(),
            negotiation_id,
            basis: self.basis,
            status: OrderStatus::Pending,
            lines: self.lines,
            total_amount: self.total,
            paid_amount: Decimal::ZERO,
            ops_final_check: OpsFinalCheck {
                status: Some(OpsCheckStatus::Pending),
                ..OpsFinalCheck::default()
            },
            payment_link_sent_at: None,
            payment_confirmed_at: None,
            forwarded_to_ops_at: None,
            payments: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// The accepted round's prices when the negotiation for this quotation ended in acceptance,
/// otherwise the quotation's own prices. Closed and rejected negotiations never override them.
pub fn effective_terms(quotation: &Quotation, negotiation: Option<&Negotiation>) -> EffectiveTerms {
    let accepted_round = negotiation
        .filter(|negotiation| {
            negotiation.quotation_id == quotation.id
                && negotiation.status == NegotiationStatus::Accepted
        })
        .and_then(Negotiation::latest_round);

    match accepted_round {
        Some(round) => EffectiveTerms {
            basis: OrderBasis::NegotiationRound { round: round.number },
            lines: round
                .items
                .iter()
                .map(|item| OrderLine {
                    cart_item_id: item.cart_item_id.clone(),
                    unit_price: item.proposed_unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total,
                })
                .collect(),
            total: round.proposed_total,
        },
        None => EffectiveTerms {
            basis: OrderBasis::Quotation,
            lines: quotation
                .items
                .iter()
                .map(|item| OrderLine {
                    cart_item_id: item.cart_item_id.clone(),
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total,
                })
                .collect(),
            total: quotation.total,
        },
    }
}
