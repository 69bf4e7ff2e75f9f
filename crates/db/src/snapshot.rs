//! Loads the independently stored records a canonical status is derived from.

use gemsource_core::domain::cart::{Cart, CartId};
use gemsource_core::domain::negotiation::Negotiation;
use gemsource_core::domain::order::Order;
use gemsource_core::domain::quotation::Quotation;
use gemsource_core::status::{
    derive_canonical_status, select_active_quotation, CanonicalStatus, DeriveOptions,
    WorkflowFacts,
};

use crate::repositories::{
    CartRepository, NegotiationRepository, OrderRepository, QuotationRepository, RepositoryError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSnapshot {
    pub cart: Cart,
    pub quotations: Vec<Quotation>,
    pub negotiation: Option<Negotiation>,
    pub order: Option<Order>,
}

impl WorkflowSnapshot {
    pub fn active_quotation(&self) -> Option<&Quotation> {
        select_active_quotation(&self.quotations)
    }

    pub fn facts(&self) -> WorkflowFacts<'_> {
        WorkflowFacts {
            cart: Some(&self.cart),
            quotation: self.active_quotation(),
            negotiation: self.negotiation.as_ref(),
            order: self.order.as_ref(),
        }
    }

    pub fn canonical_status(&self, options: DeriveOptions) -> CanonicalStatus {
        derive_canonical_status(&self.facts(), options)
    }
}

/// Reads the cart, every quotation on it, and the negotiation and order attached to the
/// active quotation. Returns `None` when the cart does not exist.
pub async fn load_workflow_snapshot(
    carts: &dyn CartRepository,
    quotations: &dyn QuotationRepository,
    negotiations: &dyn NegotiationRepository,
    orders: &dyn OrderRepository,
    cart_id: &CartId,
) -> Result<Option<WorkflowSnapshot>, RepositoryError> {
    let Some(cart) = carts.find_by_id(cart_id).await? else {
        return Ok(None);
    };

    let quotations = quotations.list_for_cart(cart_id).await?;
    let active_id = select_active_quotation(&quotations).map(|quotation| quotation.id.clone());

    let (negotiation, order) = match active_id {
        Some(quotation_id) => (
            negotiations.find_by_quotation(&quotation_id).await?,
            orders.find_by_quotation(&quotation_id).await?,
        ),
        None => (None, None),
    };

    Ok(Some(WorkflowSnapshot { cart, quotations, negotiation, order }))
}
