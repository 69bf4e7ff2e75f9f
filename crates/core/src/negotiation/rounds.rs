use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::cart::CartItemId;
use crate::domain::negotiation::RoundItem;
use crate::domain::quotation::Quotation;

/// A price a party proposes for one quotation line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedLine {
    pub cart_item_id: CartItemId,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl ProposedLine {
    pub fn new(cart_item_id: CartItemId, unit_price: Decimal, quantity: u32) -> Self {
        Self { cart_item_id, unit_price, quantity }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoundValidationError {
    #[error("a round must price at least one item")]
    Empty,
    #[error("proposed unit price for `{cart_item_id}` must be positive, got {unit_price}")]
    NonPositivePrice { cart_item_id: CartItemId, unit_price: Decimal },
    #[error("proposed quantity for `{cart_item_id}` must be at least 1")]
    ZeroQuantity { cart_item_id: CartItemId },
    #[error("`{cart_item_id}` is not part of the quotation")]
    UnknownItem { cart_item_id: CartItemId },
    #[error("`{cart_item_id}` is priced more than once")]
    DuplicateItem { cart_item_id: CartItemId },
    #[error("round omits quotation items: {missing:?}")]
    MissingItems { missing: Vec<CartItemId> },
}

/// Validated, fully-priced round lines plus the total derived from them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedRound {
    pub items: Vec<RoundItem>,
    pub total: Decimal,
}

/// Checks that a proposal prices every quotation item exactly once with positive values, and
/// computes line totals and the round total from the proposal itself. Lines are returned in the
/// quotation's item order.
pub fn price_round(
    quotation: &Quotation,
    proposal: &[ProposedLine],
) -> Result<PricedRound, RoundValidationError> {
    if proposal.is_empty() {
        return Err(RoundValidationError::Empty);
    }

    let known: BTreeSet<&CartItemId> =
        quotation.items.iter().map(|item| &item.cart_item_id).collect();
    let mut seen = BTreeSet::new();
    for line in proposal {
        if line.unit_price <= Decimal::ZERO {
            return Err(RoundValidationError::NonPositivePrice {
                cart_item_id: line.cart_item_id.clone(),
                unit_price: line.unit_price,
            });
        }
        if line.quantity == 0 {
            return Err(RoundValidationError::ZeroQuantity {
                cart_item_id: line.cart_item_id.clone(),
            });
        }
        if !known.contains(&line.cart_item_id) {
            return Err(RoundValidationError::UnknownItem {
                cart_item_id: line.cart_item_id.clone(),
            });
        }
        if !seen.insert(&line.cart_item_id) {
            return Err(RoundValidationError::DuplicateItem {
                cart_item_id: line.cart_item_id.clone(),
            });
        }
    }

    let missing: Vec<CartItemId> = quotation
        .items
        .iter()
        .filter(|item| !seen.contains(&item.cart_item_id))
        .map(|item| item.cart_item_id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(RoundValidationError::MissingItems { missing });
    }

    let items: Vec<RoundItem> = quotation
        .items
        .iter()
        .filter_map(|quoted| {
            proposal.iter().find(|line| line.cart_item_id == quoted.cart_item_id).map(|line| {
                RoundItem {
                    cart_item_id: line.cart_item_id.clone(),
                    proposed_unit_price: line.unit_price,
                    quantity: line.quantity,
                    line_total: line.unit_price * Decimal::from(line.quantity),
                }
            })
        })
        .collect();
    let total = items.iter().map(|item| item.line_total).sum();
    Ok(PricedRound { items, total })
}

/// Round 0: the quotation's own prices.
pub fn seed_from_quotation(quotation: &Quotation) -> PricedRound {
    let items: Vec<RoundItem> = quotation
        .items
        .iter()
        .map(|item| RoundItem {
            cart_item_id: item.cart_item_id.clone(),
            proposed_unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.unit_price * Decimal::from(item.quantity),
        })
        .collect();
    let total = items.iter().map(|item| item.line_total).sum();
    PricedRound { items, total }
}
