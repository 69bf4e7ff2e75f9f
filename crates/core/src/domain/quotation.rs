use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::{CartId, CartItemId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuotationId(pub String);

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationItem {
    pub cart_item_id: CartItemId,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

impl QuotationItem {
    pub fn new(cart_item_id: CartItemId, unit_price: Decimal, quantity: u32) -> Self {
        Self { cart_item_id, unit_price, quantity, line_total: unit_price * Decimal::from(quantity) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub cart_id: CartId,
    pub status: QuotationStatus,
    pub items: Vec<QuotationItem>,
    pub total: Decimal,
    pub is_final_offer: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quotation {
    pub fn new_draft(
        id: QuotationId,
        cart_id: CartId,
        items: Vec<QuotationItem>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "quotation `{id}` must price at least one cart item"
            )));
        }
        for item in &items {
            if item.unit_price <= Decimal::ZERO {
                return Err(DomainError::InvariantViolation(format!(
                    "quotation `{id}` has non-positive unit price for `{}`",
                    item.cart_item_id
                )));
            }
            if item.quantity == 0 {
                return Err(DomainError::InvariantViolation(format!(
                    "quotation `{id}` has zero quantity for `{}`",
                    item.cart_item_id
                )));
            }
        }

        let total = items.iter().map(|item| item.line_total).sum();
        Ok(Self {
            id,
            cart_id,
            status: QuotationStatus::Draft,
            items,
            total,
            is_final_offer: false,
            sent_at: None,
            expires_at: None,
            rejection_reason: None,
            created_by: created_by.into(),
            created_at,
            updated_at: None,
        })
    }

    /// Recency used to pick the active quotation of a cart.
    pub fn recency(&self) -> DateTime<Utc> {
        self.updated_at.or(self.sent_at).unwrap_or(self.created_at)
    }

    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        matches!(
            (self.status, next),
            (QuotationStatus::Draft, QuotationStatus::Sent)
                | (QuotationStatus::Sent, QuotationStatus::Accepted)
                | (QuotationStatus::Sent, QuotationStatus::Rejected)
                | (QuotationStatus::Sent, QuotationStatus::Expired)
        )
    }

    pub fn transition_to(
        &mut self,
        next: QuotationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidQuotationTransition {
                quotation_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Some(at);
        Ok(())
    }

    pub fn send(&mut self, sent_at: DateTime<Utc>, validity: Duration) -> Result<(), DomainError> {
        self.transition_to(QuotationStatus::Sent, sent_at)?;
        self.sent_at = Some(sent_at);
        self.expires_at = Some(sent_at + validity);
        Ok(())
    }

    pub fn reject(
        &mut self,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(QuotationStatus::Rejected, at)?;
        self.rejection_reason = reason;
        Ok(())
    }

    /// Negotiation may be opened only on a sent quotation.
    pub fn is_open_for_negotiation(&self) -> bool {
        self.status == QuotationStatus::Sent
    }

    /// Server-driven expiry. Returns true when the quotation moved to `expired`.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        let due = matches!(self.expires_at, Some(expires_at) if expires_at <= now);
        if self.status == QuotationStatus::Sent && due {
            self.status = QuotationStatus::Expired;
            self.updated_at = Some(now);
            return true;
        }
        false
    }

    /// UI-only countdown decoration; never feeds a state transition.
    pub fn expiring_soon(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.status, self.expires_at) {
            (QuotationStatus::Sent, Some(expires_at)) => expires_at > now && expires_at - now <= window,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{Quotation, QuotationId, QuotationItem, QuotationStatus};
    use crate::domain::cart::{CartId, CartItemId};
    use crate::errors::DomainError;

    fn draft() -> Quotation {
        Quotation::new_draft(
            QuotationId("qt-1".to_string()),
            CartId("cart-1".to_string()),
            vec![
                QuotationItem::new(CartItemId("ci-1".to_string()), Decimal::new(10_000, 2), 3),
                QuotationItem::new(CartItemId("ci-2".to_string()), Decimal::new(20_000, 2), 1),
            ],
            "sales-1",
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        )
        .expect("valid draft")
    }

    #[test]
    fn draft_total_is_sum_of_line_totals() {
        let quotation = draft();
        assert_eq!(quotation.items[0].line_total, Decimal::new(30_000, 2));
        assert_eq!(quotation.total, Decimal::new(50_000, 2));
        assert_eq!(quotation.status, QuotationStatus::Draft);
    }

    #[test]
    fn draft_rejects_non_positive_prices() {
        let error = Quotation::new_draft(
            QuotationId("qt-2".to_string()),
            CartId("cart-1".to_string()),
            vec![QuotationItem::new(CartItemId("ci-1".to_string()), Decimal::ZERO, 1)],
            "sales-1",
            Utc::now(),
        )
        .expect_err("zero price must be rejected");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn send_sets_validity_window_and_recency() {
        let mut quotation = draft();
        let sent_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        quotation.send(sent_at, Duration::days(7)).expect("draft -> sent");

        assert_eq!(quotation.status, QuotationStatus::Sent);
        assert_eq!(quotation.expires_at, Some(sent_at + Duration::days(7)));
        assert_eq!(quotation.recency(), sent_at);
        assert!(quotation.is_open_for_negotiation());
    }

    #[test]
    fn terminal_quotation_cannot_transition_again() {
        let mut quotation = draft();
        let now = Utc::now();
        quotation.send(now, Duration::days(7)).expect("send");
        quotation.transition_to(QuotationStatus::Accepted, now).expect("accept");

        let error = quotation
            .reject(Some("changed mind".to_string()), now)
            .expect_err("accepted quotation is terminal");
        assert!(matches!(error, DomainError::InvalidQuotationTransition { .. }));
    }

    #[test]
    fn expiry_is_driven_by_server_time() {
        let mut quotation = draft();
        let sent_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        quotation.send(sent_at, Duration::days(1)).expect("send");

        assert!(quotation.expiring_soon(sent_at + Duration::hours(2), Duration::hours(24)));
        assert!(!quotation.expire_if_due(sent_at + Duration::hours(23)));
        assert!(quotation.expire_if_due(sent_at + Duration::hours(25)));
        assert_eq!(quotation.status, QuotationStatus::Expired);
        assert!(!quotation.expiring_soon(sent_at + Duration::hours(25), Duration::hours(24)));
    }
}
