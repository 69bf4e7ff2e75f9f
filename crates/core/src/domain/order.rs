use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::{CartId, CartItemId};
use crate::domain::negotiation::NegotiationId;
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::quotation::QuotationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fulfillment progress, driven by operations after payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Declined,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "completed" => Some(Self::Completed),
            "declined" => Some(Self::Declined),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_closed_unfulfilled(&self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled)
    }

    pub fn is_in_fulfillment(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Processing | Self::Shipped | Self::Delivered)
    }

    fn fulfillment_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Processing => Some(2),
            Self::Shipped => Some(3),
            Self::Delivered => Some(4),
            Self::Completed => Some(5),
            Self::Declined | Self::Cancelled => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpsCheckStatus {
    Pending,
    Approved,
    Rejected,
}

impl OpsCheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Ops gate between acceptance and payment-link issuance.
///
/// `status` is `None` only on records created before the gate existed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsFinalCheck {
    pub status: Option<OpsCheckStatus>,
    pub reason: Option<String>,
    pub checked_by: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// The ops check after applying the legacy back-compat rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedOpsCheck {
    Approved,
    /// No explicit status, approval inferred from downstream payment/ops timestamps.
    InferredFromLegacyTimestamps,
    Pending,
    Rejected,
}

impl ResolvedOpsCheck {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::InferredFromLegacyTimestamps)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderBasis {
    Quotation,
    NegotiationRound { round: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub cart_item_id: CartItemId,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub cart_id: CartId,
    pub quotation_id: QuotationId,
    pub negotiation_id: Option<NegotiationId>,
    pub basis: OrderBasis,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub ops_final_check: OpsFinalCheck,
    pub payment_link_sent_at: Option<DateTime<Utc>>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub forwarded_to_ops_at: Option<DateTime<Utc>>,
    pub payments: Vec<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Any one of the three independently-written paid facts.
    pub fn has_paid_signal(&self) -> bool {
        self.payment_confirmed_at.is_some()
            || self.payments.iter().any(Payment::is_completed)
            || (self.total_amount > Decimal::ZERO && self.paid_amount >= self.total_amount)
    }

    pub fn outstanding_amount(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn resolve_ops_check(&self, infer_legacy_approval: bool) -> ResolvedOpsCheck {
        match self.ops_final_check.status {
            Some(OpsCheckStatus::Approved) => ResolvedOpsCheck::Approved,
            Some(OpsCheckStatus::Rejected) => ResolvedOpsCheck::Rejected,
            Some(OpsCheckStatus::Pending) => ResolvedOpsCheck::Pending,
            None => {
                let downstream_progress = self.payment_link_sent_at.is_some()
                    || self.payment_confirmed_at.is_some()
                    || self.forwarded_to_ops_at.is_some();
                if infer_legacy_approval && downstream_progress {
                    ResolvedOpsCheck::InferredFromLegacyTimestamps
                } else {
                    ResolvedOpsCheck::Pending
                }
            }
        }
    }

    pub fn has_gateway_reference(&self, reference: &str) -> bool {
        self.payments.iter().any(|payment| payment.gateway_reference.as_deref() == Some(reference))
    }

    pub fn approve_ops_check(
        &mut self,
        checked_by: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        if self.ops_final_check.status == Some(OpsCheckStatus::Approved) {
            return Ok(());
        }
        self.ops_final_check = OpsFinalCheck {
            status: Some(OpsCheckStatus::Approved),
            reason: None,
            checked_by: Some(checked_by.into()),
            checked_at: Some(at),
        };
        self.updated_at = at;
        Ok(())
    }

    pub fn reject_ops_check(
        &mut self,
        checked_by: impl Into<String>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        if self.payment_link_sent_at.is_some() || self.has_paid_signal() {
            return Err(DomainError::InvalidOrderOperation {
                order_id: self.id.clone(),
                reason: "ops check cannot be rejected after the payment link was issued"
                    .to_string(),
            });
        }
        self.ops_final_check = OpsFinalCheck {
            status: Some(OpsCheckStatus::Rejected),
            reason,
            checked_by: Some(checked_by.into()),
            checked_at: Some(at),
        };
        self.updated_at = at;
        Ok(())
    }

    /// Idempotent: the first send timestamp is kept.
    pub fn mark_payment_link_sent(
        &mut self,
        at: DateTime<Utc>,
        infer_legacy_approval: bool,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        if !self.resolve_ops_check(infer_legacy_approval).is_approved() {
            return Err(DomainError::InvalidOrderOperation {
                order_id: self.id.clone(),
                reason: "payment link requires an approved ops final check".to_string(),
            });
        }
        if self.payment_link_sent_at.is_none() {
            self.payment_link_sent_at = Some(at);
            self.updated_at = at;
        }
        Ok(())
    }

    /// Appends a payment. Completed payments raise `paid_amount`; it never decreases.
    pub fn record_payment(&mut self, payment: Payment) -> Result<(), DomainError> {
        self.ensure_open()?;
        if payment.amount <= Decimal::ZERO {
            return Err(DomainError::InvalidPaymentAmount { amount: payment.amount });
        }
        if let Some(reference) = payment.gateway_reference.as_deref() {
            if self.has_gateway_reference(reference) {
                return Err(DomainError::DuplicatePayment { reference: reference.to_string() });
            }
        }
        if self.payments.iter().any(|existing| existing.id == payment.id) {
            return Err(DomainError::DuplicatePayment { reference: payment.id.0.clone() });
        }

        let at = payment.paid_at.unwrap_or(payment.created_at);
        let completed = payment.is_completed();
        let amount = payment.amount;
        self.payments.push(payment);
        if completed {
            self.credit(amount, at);
        }
        self.updated_at = self.updated_at.max(at);
        Ok(())
    }

    /// Seller confirmation of a manual (bank transfer) payment.
    pub fn confirm_pending_payment(
        &mut self,
        payment_id: &PaymentId,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_open()?;
        let order_id = self.id.clone();
        let payment = self
            .payments
            .iter_mut()
            .find(|payment| &payment.id == payment_id)
            .ok_or_else(|| DomainError::InvalidOrderOperation {
                order_id: order_id.clone(),
                reason: format!("payment `{payment_id}` does not belong to this order"),
            })?;
        if payment.status != PaymentStatus::Pending {
            return Err(DomainError::InvalidOrderOperation {
                order_id,
                reason: format!(
                    "payment `{payment_id}` is {} and cannot be confirmed",
                    payment.status.as_str()
                ),
            });
        }
        payment.status = PaymentStatus::Completed;
        payment.paid_at = Some(at);
        let amount = payment.amount;
        self.credit(amount, at);
        self.updated_at = at;
        Ok(())
    }

    pub fn forward_to_ops(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_open()?;
        if !self.has_paid_signal() {
            return Err(DomainError::InvalidOrderOperation {
                order_id: self.id.clone(),
                reason: "order cannot be forwarded to operations before payment".to_string(),
            });
        }
        if self.forwarded_to_ops_at.is_none() {
            self.forwarded_to_ops_at = Some(at);
            self.updated_at = at;
        }
        Ok(())
    }

    /// Moves fulfillment forward, or closes an order that has not shipped yet.
    pub fn advance_fulfillment(
        &mut self,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let allowed = match (self.status.fulfillment_rank(), next.fulfillment_rank()) {
            (Some(current), Some(target)) => {
                target > current && (target == 0 || self.forwarded_to_ops_at.is_some())
            }
            (Some(current), None) => current < 3,
            (None, _) => false,
        };
        if !allowed {
            return Err(DomainError::InvalidOrderTransition {
                order_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    fn credit(&mut self, amount: Decimal, at: DateTime<Utc>) {
        self.paid_amount += amount;
        if self.payment_confirmed_at.is_none()
            && self.total_amount > Decimal::ZERO
            && self.paid_amount >= self.total_amount
        {
            self.payment_confirmed_at = Some(at);
        }
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_closed_unfulfilled() {
            return Err(DomainError::InvalidOrderOperation {
                order_id: self.id.clone(),
                reason: format!("order is {}", self.status.as_str()),
            });
        }
        Ok(())
    }
}
