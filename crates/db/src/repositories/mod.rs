use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gemsource_core::domain::cart::{Cart, CartId};
use gemsource_core::domain::inventory::{InventoryCatalog, InventoryStock, SourcingOption};
use gemsource_core::domain::negotiation::{Negotiation, NegotiationId};
use gemsource_core::domain::order::{Order, OrderId};
use gemsource_core::domain::quotation::{Quotation, QuotationId};
use gemsource_core::errors::ApplicationError;

pub mod cart;
mod codec;
pub mod inventory;
pub mod marker;
pub mod memory;
pub mod negotiation;
pub mod order;
pub mod quotation;

pub use cart::SqlCartRepository;
pub use inventory::SqlInventoryRepository;
pub use marker::SqlReconciliationMarkerRepository;
pub use memory::{
    InMemoryCartRepository, InMemoryInventoryRepository, InMemoryNegotiationRepository,
    InMemoryOrderRepository, InMemoryQuotationRepository, InMemoryReconciliationMarkerRepository,
};
pub use negotiation::SqlNegotiationRepository;
pub use order::SqlOrderRepository;
pub use quotation::SqlQuotationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// A concurrent writer already stored a row with the same unique key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => error.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        if error.is_unique_violation() {
            return Self::Conflict(error.to_string());
        }
        Self::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find_by_id(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError>;
    /// Upserts the cart and replaces its items in order.
    async fn save(&self, cart: Cart) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;
    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Quotation>, RepositoryError>;
    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NegotiationRepository: Send + Sync {
    async fn find_by_id(&self, id: &NegotiationId)
        -> Result<Option<Negotiation>, RepositoryError>;
    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Negotiation>, RepositoryError>;
    /// Upserts the thread header. Rounds are append-only: stored rounds are never rewritten.
    async fn save(&self, negotiation: Negotiation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn load_catalog(&self) -> Result<InventoryCatalog, RepositoryError>;
    async fn save_stock(&self, stock: InventoryStock) -> Result<(), RepositoryError>;
    async fn save_sourcing_option(&self, option: SourcingOption) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ReconciliationMarkerRepository: Send + Sync {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, RepositoryError>;
    /// First write wins; marking an already-marked session is a no-op.
    async fn mark_reconciled(
        &self,
        session_id: &str,
        order_id: &OrderId,
        reconciled_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
