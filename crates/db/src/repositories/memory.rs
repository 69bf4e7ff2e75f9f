use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use gemsource_core::domain::cart::{Cart, CartId};
use gemsource_core::domain::inventory::{InventoryCatalog, InventoryStock, SourcingOption};
use gemsource_core::domain::negotiation::{Negotiation, NegotiationId};
use gemsource_core::domain::order::{Order, OrderId};
use gemsource_core::domain::quotation::{Quotation, QuotationId};

use super::{
    CartRepository, InventoryRepository, NegotiationRepository, OrderRepository,
    QuotationRepository, ReconciliationMarkerRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryCartRepository {
    carts: RwLock<HashMap<String, Cart>>,
}

#[async_trait::async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn find_by_id(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError> {
        let carts = self.carts.read().await;
        Ok(carts.get(&id.0).cloned())
    }

    async fn save(&self, cart: Cart) -> Result<(), RepositoryError> {
        let mut carts = self.carts.write().await;
        carts.insert(cart.id.0.clone(), cart);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryQuotationRepository {
    quotations: RwLock<HashMap<String, Quotation>>,
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let quotations = self.quotations.read().await;
        Ok(quotations.get(&id.0).cloned())
    }

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Quotation>, RepositoryError> {
        let quotations = self.quotations.read().await;
        let mut listed: Vec<Quotation> = quotations
            .values()
            .filter(|quotation| &quotation.cart_id == cart_id)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let mut quotations = self.quotations.write().await;
        quotations.insert(quotation.id.0.clone(), quotation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNegotiationRepository {
    negotiations: RwLock<HashMap<String, Negotiation>>,
}

#[async_trait::async_trait]
impl NegotiationRepository for InMemoryNegotiationRepository {
    async fn find_by_id(
        &self,
        id: &NegotiationId,
    ) -> Result<Option<Negotiation>, RepositoryError> {
        let negotiations = self.negotiations.read().await;
        Ok(negotiations.get(&id.0).cloned())
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Negotiation>, RepositoryError> {
        let negotiations = self.negotiations.read().await;
        Ok(negotiations
            .values()
            .find(|negotiation| &negotiation.quotation_id == quotation_id)
            .cloned())
    }

    async fn save(&self, mut negotiation: Negotiation) -> Result<(), RepositoryError> {
        let mut negotiations = self.negotiations.write().await;
        if let Some(stored) = negotiations.get(&negotiation.id.0) {
            let stored_count = stored.rounds.len();
            let mut rounds = stored.rounds.clone();
            rounds.extend(negotiation.rounds.into_iter().skip(stored_count));
            negotiation.rounds = rounds;
        }
        negotiations.insert(negotiation.id.0.clone(), negotiation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.values().find(|order| &order.quotation_id == quotation_id).cloned())
    }

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut listed: Vec<Order> =
            orders.values().filter(|order| &order.cart_id == cart_id).cloned().collect();
        listed.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.0.clone(), order);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryInventoryRepository {
    catalog: RwLock<InventoryCatalog>,
}

impl InMemoryInventoryRepository {
    pub fn with_catalog(catalog: InventoryCatalog) -> Self {
        Self { catalog: RwLock::new(catalog) }
    }
}

#[async_trait::async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn load_catalog(&self) -> Result<InventoryCatalog, RepositoryError> {
        Ok(self.catalog.read().await.clone())
    }

    async fn save_stock(&self, stock: InventoryStock) -> Result<(), RepositoryError> {
        let mut catalog = self.catalog.write().await;
        catalog
            .stock
            .retain(|existing| !(existing.sku == stock.sku && existing.location == stock.location));
        catalog.stock.push(stock);
        Ok(())
    }

    async fn save_sourcing_option(&self, option: SourcingOption) -> Result<(), RepositoryError> {
        let mut catalog = self.catalog.write().await;
        catalog.sourcing.retain(|existing| {
            !(existing.kind == option.kind && existing.reference == option.reference)
        });
        catalog.sourcing.push(option);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReconciliationMarkerRepository {
    markers: RwLock<HashMap<String, (OrderId, DateTime<Utc>)>>,
}

#[async_trait::async_trait]
impl ReconciliationMarkerRepository for InMemoryReconciliationMarkerRepository {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.markers.read().await.contains_key(session_id))
    }

    async fn mark_reconciled(
        &self,
        session_id: &str,
        order_id: &OrderId,
        reconciled_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut markers = self.markers.write().await;
        markers.entry(session_id.to_string()).or_insert_with(|| (order_id.clone(), reconciled_at));
        Ok(())
    }
}
