use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub String);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Upi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Upi => "upi",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "card" => Some(Self::Card),
            "bank_transfer" => Some(Self::BankTransfer),
            "upi" => Some(Self::Upi),
            _ => None,
        }
    }

    /// Methods that always wait for a seller to confirm funds arrived.
    pub fn requires_manual_confirmation(&self) -> bool {
        matches!(self, Self::BankTransfer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    #[serde(alias = "paid")]
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Accepts the gateway/backend spellings `paid` and `completed` for the same state.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "completed" | "paid" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub transaction_ref: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Status a newly submitted non-redirect payment is recorded with.
///
/// Bank transfers stay pending until a seller confirms them. Card and UPI payments count
/// as paid only when the backend explicitly reported a completed charge.
pub fn intake_status(method: PaymentMethod, reported: Option<PaymentStatus>) -> PaymentStatus {
    if method.requires_manual_confirmation() {
        return PaymentStatus::Pending;
    }
    match reported {
        Some(PaymentStatus::Completed) => PaymentStatus::Completed,
        Some(PaymentStatus::Failed) => PaymentStatus::Failed,
        Some(PaymentStatus::Pending) | None => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::{intake_status, PaymentMethod, PaymentStatus};

    #[test]
    fn bank_transfer_is_always_pending() {
        assert_eq!(
            intake_status(PaymentMethod::BankTransfer, Some(PaymentStatus::Completed)),
            PaymentStatus::Pending
        );
    }

    #[test]
    fn card_and_upi_need_explicit_paid_signal() {
        assert_eq!(intake_status(PaymentMethod::Card, None), PaymentStatus::Pending);
        assert_eq!(
            intake_status(PaymentMethod::Upi, Some(PaymentStatus::Completed)),
            PaymentStatus::Completed
        );
        assert_eq!(
            intake_status(PaymentMethod::Card, Some(PaymentStatus::Failed)),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn paid_is_an_alias_for_completed() {
        assert_eq!(PaymentStatus::parse("paid"), Some(PaymentStatus::Completed));
        assert_eq!(PaymentStatus::parse("COMPLETED"), Some(PaymentStatus::Completed));
        let decoded: PaymentStatus = serde_json::from_str("\"paid\"").expect("alias decodes");
        assert_eq!(decoded, PaymentStatus::Completed);
    }
}
