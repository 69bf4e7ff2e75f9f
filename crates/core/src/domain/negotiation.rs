use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::CartItemId;
use crate::domain::quotation::QuotationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NegotiationId(pub String);

impl fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Open,
    CounterBuyer,
    CounterSeller,
    Accepted,
    Rejected,
    Closed,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::CounterBuyer => "counter_buyer",
            Self::CounterSeller => "counter_seller",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "counter_buyer" => Some(Self::CounterBuyer),
            "counter_seller" => Some(Self::CounterSeller),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Closed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" => Some(Self::Buyer),
            "seller" => Some(Self::Seller),
            _ => None,
        }
    }

    pub fn counterparty(&self) -> Self {
        match self {
            Self::Buyer => Self::Seller,
            Self::Seller => Self::Buyer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundItem {
    pub cart_item_id: CartItemId,
    pub proposed_unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub number: u32,
    pub proposed_by: Party,
    pub proposer_id: String,
    pub items: Vec<RoundItem>,
    pub proposed_total: Decimal,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    /// A round's total must be re-derivable from its own lines.
    pub fn is_internally_consistent(&self) -> bool {
        let derived: Decimal = self
            .items
            .iter()
            .map(|item| item.proposed_unit_price * Decimal::from(item.quantity))
            .sum();
        let lines_match = self.items.iter().all(|item| {
            item.line_total == item.proposed_unit_price * Decimal::from(item.quantity)
        });
        lines_match && derived == self.proposed_total
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: NegotiationId,
    pub quotation_id: QuotationId,
    pub status: NegotiationStatus,
    pub opened_by: Party,
    pub rounds: Vec<Round>,
    pub closed_by: Option<Party>,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn latest_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// Author of the most recent counter. Round 0 is the quotation itself and has no mover.
    pub fn last_mover(&self) -> Option<Party> {
        self.rounds.iter().rev().find(|round| round.number > 0).map(|round| round.proposed_by)
    }

    pub fn next_round_number(&self) -> u32 {
        self.rounds.last().map(|round| round.number + 1).unwrap_or(0)
    }

    /// Party entitled to counter or accept next. `None` means either party may act.
    pub fn party_to_act(&self) -> Option<Party> {
        match self.status {
            NegotiationStatus::CounterBuyer => Some(Party::Seller),
            NegotiationStatus::CounterSeller => Some(Party::Buyer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{NegotiationStatus, Party, Round, RoundItem};
    use crate::domain::cart::CartItemId;

    #[test]
    fn terminal_states_are_accept_reject_close() {
        let terminal = [
            NegotiationStatus::Accepted,
            NegotiationStatus::Rejected,
            NegotiationStatus::Closed,
        ];
        for status in terminal {
            assert!(status.is_terminal());
        }
        for status in
            [NegotiationStatus::Open, NegotiationStatus::CounterBuyer, NegotiationStatus::CounterSeller]
        {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn status_parses_storage_encoding() {
        assert_eq!(NegotiationStatus::parse("counter_buyer"), Some(NegotiationStatus::CounterBuyer));
        assert_eq!(Party::parse("Seller"), Some(Party::Seller));
        assert_eq!(Party::Buyer.counterparty(), Party::Seller);
    }

    #[test]
    fn round_consistency_detects_tampered_total() {
        let mut round = Round {
            number: 1,
            proposed_by: Party::Buyer,
            proposer_id: "buyer-1".to_string(),
            items: vec![RoundItem {
                cart_item_id: CartItemId("ci-1".to_string()),
                proposed_unit_price: Decimal::new(4_200, 2),
                quantity: 10,
                line_total: Decimal::new(42_000, 2),
            }],
            proposed_total: Decimal::new(42_000, 2),
            message: None,
            created_at: Utc::now(),
        };
        assert!(round.is_internally_consistent());

        round.proposed_total = Decimal::new(50_000, 2);
        assert!(!round.is_internally_consistent());
    }
}
