use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::cart::{CartId, CartStatus};
use crate::domain::order::{OrderId, OrderStatus};
use crate::domain::quotation::{QuotationId, QuotationStatus};
use crate::negotiation::NegotiationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid cart transition from {from:?} to {to:?}")]
    InvalidCartTransition { from: CartStatus, to: CartStatus },
    #[error("cart `{cart_id}` is {status:?}; items can only change while drafting")]
    CartLocked { cart_id: CartId, status: CartStatus },
    #[error("invalid transition of quotation `{quotation_id}` from {from:?} to {to:?}")]
    InvalidQuotationTransition { quotation_id: QuotationId, from: QuotationStatus, to: QuotationStatus },
    #[error("invalid transition of order `{order_id}` from {from:?} to {to:?}")]
    InvalidOrderTransition { order_id: OrderId, from: OrderStatus, to: OrderStatus },
    #[error("order `{order_id}` rejected operation: {reason}")]
    InvalidOrderOperation { order_id: OrderId, reason: String },
    #[error("payment amount must be positive, got {amount}")]
    InvalidPaymentAmount { amount: Decimal },
    #[error("payment `{reference}` is already recorded")]
    DuplicatePayment { reference: String },
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    /// True when the request was well-formed but the records have moved on.
    pub fn is_state_conflict(&self) -> bool {
        match self {
            Self::InvalidCartTransition { .. }
            | Self::CartLocked { .. }
            | Self::InvalidQuotationTransition { .. }
            | Self::InvalidOrderTransition { .. }
            | Self::InvalidOrderOperation { .. }
            | Self::DuplicatePayment { .. } => true,
            Self::Negotiation(error) => error.is_state_conflict(),
            Self::InvalidPaymentAmount { .. } | Self::InvariantViolation(_) => false,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("state conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "This record changed since you loaded it. The latest state has been reloaded."
            }
            Self::NotFound { .. } => "The requested record could not be found.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Conflicts ask the caller to re-fetch authoritative state before retrying.
    pub fn requires_refetch(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) if error.is_state_conflict() => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
