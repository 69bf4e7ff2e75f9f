//! Workflow operations over the stored records: each call loads what it needs, runs the pure
//! core, persists the result and emits an audit event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use gemsource_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use gemsource_core::config::WorkflowConfig;
use gemsource_core::domain::cart::{Cart, CartId, CartItem, CartItemId, CartStatus, CatalogRef};
use gemsource_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus, Party};
use gemsource_core::domain::order::{Order, OrderId, OrderStatus};
use gemsource_core::domain::payment::{
    intake_status, Payment, PaymentId, PaymentMethod, PaymentStatus,
};
use gemsource_core::domain::quotation::{Quotation, QuotationId, QuotationItem, QuotationStatus};
use gemsource_core::errors::{ApplicationError, DomainError};
use gemsource_core::negotiation::{
    effective_terms, NegotiationCommand, NegotiationEngine, NegotiationError, ProposedLine,
};
use gemsource_core::payments::{
    GatewaySession, PaymentGateway, PaymentReconciler, ReconciliationOutcome, RedirectParams,
};
use gemsource_core::status::{select_active_quotation, CanonicalStatus};
use gemsource_core::validator::{validate_cart, ValidationReport};
use gemsource_db::repositories::{
    CartRepository, InMemoryCartRepository, InMemoryInventoryRepository,
    InMemoryNegotiationRepository, InMemoryOrderRepository, InMemoryQuotationRepository,
    InMemoryReconciliationMarkerRepository, InventoryRepository, NegotiationRepository,
    OrderRepository, QuotationRepository, ReconciliationMarkerRepository, SqlCartRepository,
    SqlInventoryRepository, SqlNegotiationRepository, SqlOrderRepository, SqlQuotationRepository,
    SqlReconciliationMarkerRepository,
};
use gemsource_db::{
    load_workflow_snapshot, DbPool, RepositoryOrderLedger, RepositoryReconciliationMarkers,
    WorkflowSnapshot,
};

use crate::watcher::{NegotiationWatch, NegotiationWatcher};

#[derive(Clone)]
pub struct WorkflowRepositories {
    pub carts: Arc<dyn CartRepository>,
    pub quotations: Arc<dyn QuotationRepository>,
    pub negotiations: Arc<dyn NegotiationRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub inventory: Arc<dyn InventoryRepository>,
    pub markers: Arc<dyn ReconciliationMarkerRepository>,
}

impl WorkflowRepositories {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            carts: Arc::new(SqlCartRepository::new(pool.clone())),
            quotations: Arc::new(SqlQuotationRepository::new(pool.clone())),
            negotiations: Arc::new(SqlNegotiationRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            inventory: Arc::new(SqlInventoryRepository::new(pool.clone())),
            markers: Arc::new(SqlReconciliationMarkerRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            carts: Arc::new(InMemoryCartRepository::default()),
            quotations: Arc::new(InMemoryQuotationRepository::default()),
            negotiations: Arc::new(InMemoryNegotiationRepository::default()),
            orders: Arc::new(InMemoryOrderRepository::default()),
            inventory: Arc::new(InMemoryInventoryRepository::default()),
            markers: Arc::new(InMemoryReconciliationMarkerRepository::default()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCartItem {
    pub catalog_ref: CatalogRef,
    pub quantity: u32,
    pub customization_note: Option<String>,
}

/// Sales price for one cart line; quantity always comes from the cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotedPrice {
    pub cart_item_id: CartItemId,
    pub unit_price: Decimal,
}

impl QuotedPrice {
    pub fn new(cart_item_id: CartItemId, unit_price: Decimal) -> Self {
        Self { cart_item_id, unit_price }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub transaction_ref: Option<String>,
    /// Status the payment backend reported for a card or UPI charge, if any.
    pub reported_status: Option<PaymentStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedNegotiation {
    pub negotiation: Negotiation,
    pub order: Order,
}

pub struct WorkflowService {
    repos: WorkflowRepositories,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<dyn AuditSink>,
    settings: WorkflowConfig,
    engine: NegotiationEngine,
    // Serializes order creation so a double-submitted accept books one order.
    acceptance: Mutex<()>,
}

impl WorkflowService {
    pub fn new(
        repos: WorkflowRepositories,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditSink>,
        settings: WorkflowConfig,
    ) -> Self {
        Self {
            repos,
            gateway,
            audit,
            settings,
            engine: NegotiationEngine::new(),
            acceptance: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    pub fn repositories(&self) -> &WorkflowRepositories {
        &self.repos
    }

    // ---- carts -------------------------------------------------------------------------------

    pub async fn create_cart(
        &self,
        ctx: &AuditContext,
        buyer_id: &str,
    ) -> Result<Cart, ApplicationError> {
        let buyer_id = buyer_id.trim();
        if buyer_id.is_empty() {
            return Err(invariant("cart requires a buyer id"));
        }
        let now = Utc::now();
        let cart = Cart {
            id: CartId(new_id("cart")),
            buyer_id: buyer_id.to_string(),
            status: CartStatus::Draft,
            items: Vec::new(),
            assigned_sales_id: None,
            created_at: now,
            updated_at: now,
        };
        self.repos.carts.save(cart.clone()).await?;
        self.emit(
            &ctx.with_cart(cart.id.clone()),
            "cart.created",
            AuditCategory::Cart,
            &[("buyer_id", cart.buyer_id.clone())],
        );
        Ok(cart)
    }

    pub async fn get_cart(&self, cart_id: &CartId) -> Result<Cart, ApplicationError> {
        self.load_cart(cart_id).await
    }

    pub async fn add_item(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        item: NewCartItem,
    ) -> Result<Cart, ApplicationError> {
        let mut cart = self.load_cart(cart_id).await?;
        let item_id = CartItemId(new_id("ci"));
        cart.add_item(CartItem {
            id: item_id.clone(),
            quantity: item.quantity,
            customization_note: item.customization_note,
            catalog_ref: item.catalog_ref,
            validation: None,
        })?;
        cart.updated_at = Utc::now();
        self.repos.carts.save(cart.clone()).await?;
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "cart.item_added",
            AuditCategory::Cart,
            &[("cart_item_id", item_id.0)],
        );
        Ok(cart)
    }

    pub async fn update_item(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        item_id: &CartItemId,
        quantity: u32,
        customization_note: Option<String>,
    ) -> Result<Cart, ApplicationError> {
        let mut cart = self.load_cart(cart_id).await?;
        cart.update_item(item_id, quantity, customization_note)?;
        cart.updated_at = Utc::now();
        self.repos.carts.save(cart.clone()).await?;
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "cart.item_updated",
            AuditCategory::Cart,
            &[("cart_item_id", item_id.0.clone()), ("quantity", quantity.to_string())],
        );
        Ok(cart)
    }

    pub async fn remove_item(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        item_id: &CartItemId,
    ) -> Result<Cart, ApplicationError> {
        let mut cart = self.load_cart(cart_id).await?;
        cart.remove_item(item_id)?;
        cart.updated_at = Utc::now();
        self.repos.carts.save(cart.clone()).await?;
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "cart.item_removed",
            AuditCategory::Cart,
            &[("cart_item_id", item_id.0.clone())],
        );
        Ok(cart)
    }

    pub async fn submit_cart(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
    ) -> Result<Cart, ApplicationError> {
        let mut cart = self.load_cart(cart_id).await?;
        if cart.items.is_empty() {
            return Err(invariant(format!("cart `{cart_id}` has no items to submit")));
        }
        cart.transition_to(CartStatus::Submitted)?;
        cart.updated_at = Utc::now();
        self.repos.carts.save(cart.clone()).await?;
        info!(
            event_name = "cart.submitted",
            correlation_id = %ctx.correlation_id,
            cart_id = %cart_id,
            item_count = cart.items.len(),
            "cart submitted for validation"
        );
        self.emit(&ctx.with_cart(cart_id.clone()), "cart.submitted", AuditCategory::Cart, &[]);
        Ok(cart)
    }

    /// Classifies every line against current stock and overwrites the stored outcomes.
    pub async fn validate_inventory(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
    ) -> Result<ValidationReport, ApplicationError> {
        let mut cart = self.load_cart(cart_id).await?;
        if !matches!(cart.status, CartStatus::Submitted | CartStatus::UnderReview) {
            return Err(ApplicationError::Conflict(format!(
                "cart `{cart_id}` is {} and cannot be validated",
                cart.status.as_str()
            )));
        }

        let catalog = self.repos.inventory.load_catalog().await?;
        let report = validate_cart(&cart, &catalog);
        report.apply_to_cart(&mut cart, &ctx.actor, Utc::now());
        self.repos.carts.save(cart).await?;

        let summary = &report.summary;
        info!(
            event_name = "validation.completed",
            correlation_id = %ctx.correlation_id,
            cart_id = %cart_id,
            fully_available = summary.fully_available,
            partially_available = summary.partially_available,
            needs_external_manufacturer = summary.needs_external_manufacturer,
            unavailable = summary.unavailable,
            total_shortfall = summary.total_shortfall,
            "inventory validation applied to cart"
        );
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "validation.completed",
            AuditCategory::Validation,
            &[
                ("total_items", summary.total_items.to_string()),
                ("total_shortfall", summary.total_shortfall.to_string()),
                ("unavailable", summary.unavailable.to_string()),
            ],
        );
        Ok(report)
    }

    pub async fn forward_to_sales(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        sales_person_id: &str,
    ) -> Result<Cart, ApplicationError> {
        let sales_person_id = sales_person_id.trim();
        if sales_person_id.is_empty() {
            return Err(invariant("forwarding requires a sales person id"));
        }

        let mut cart = self.load_cart(cart_id).await?;
        if !cart.all_items_validated() {
            return Err(invariant(format!(
                "cart `{cart_id}` has items without a validation outcome"
            )));
        }
        if !matches!(cart.status, CartStatus::UnderReview | CartStatus::Quoted) {
            cart.transition_to(CartStatus::UnderReview)?;
        }
        cart.assigned_sales_id = Some(sales_person_id.to_string());
        cart.updated_at = Utc::now();
        self.repos.carts.save(cart.clone()).await?;
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "cart.forwarded_to_sales",
            AuditCategory::Cart,
            &[("sales_person_id", sales_person_id.to_string())],
        );
        Ok(cart)
    }

    // ---- quotations --------------------------------------------------------------------------

    pub async fn get_quotation(&self, id: &QuotationId) -> Result<Quotation, ApplicationError> {
        self.load_quotation(id).await
    }

    pub async fn list_quotations_for_cart(
        &self,
        cart_id: &CartId,
    ) -> Result<Vec<Quotation>, ApplicationError> {
        self.load_cart(cart_id).await?;
        Ok(self.repos.quotations.list_for_cart(cart_id).await?)
    }

    /// Drafts a quotation pricing every cart line exactly once. On a `quoted` cart the draft
    /// is a re-quote and supersedes the active quotation, unless that one is already accepted
    /// or still under negotiation.
    pub async fn create_quotation(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        prices: Vec<QuotedPrice>,
    ) -> Result<Quotation, ApplicationError> {
        let cart = self.load_cart(cart_id).await?;
        match cart.status {
            CartStatus::Submitted | CartStatus::UnderReview => {}
            CartStatus::Quoted => self.ensure_requotable(cart_id).await?,
            _ => {
                return Err(ApplicationError::Conflict(format!(
                    "cart `{cart_id}` is {} and cannot be quoted",
                    cart.status.as_str()
                )))
            }
        }
        if !cart.all_items_validated() {
            return Err(invariant(format!(
                "every item of cart `{cart_id}` must be validated before quoting"
            )));
        }
        if let Some(unknown) = prices.iter().find(|price| cart.item(&price.cart_item_id).is_none()) {
            return Err(invariant(format!(
                "cart item `{}` is not part of `{cart_id}`",
                unknown.cart_item_id
            )));
        }

        let mut items = Vec::with_capacity(cart.items.len());
        for cart_item in &cart.items {
            let mut matching = prices.iter().filter(|price| price.cart_item_id == cart_item.id);
            let (Some(price), None) = (matching.next(), matching.next()) else {
                return Err(invariant(format!(
                    "cart item `{}` needs exactly one quoted price",
                    cart_item.id
                )));
            };
            items.push(QuotationItem::new(cart_item.id.clone(), price.unit_price, cart_item.quantity));
        }

        let quotation = Quotation::new_draft(
            QuotationId(new_id("quo")),
            cart_id.clone(),
            items,
            ctx.actor.clone(),
            Utc::now(),
        )?;
        self.repos.quotations.save(quotation.clone()).await?;
        self.emit(
            &ctx.with_cart(cart_id.clone()),
            "quotation.created",
            AuditCategory::Quotation,
            &[("quotation_id", quotation.id.0.clone()), ("total", quotation.total.to_string())],
        );
        Ok(quotation)
    }

    /// Sends a draft with the configured validity and moves the cart to `quoted`.
    pub async fn send_quotation(
        &self,
        ctx: &AuditContext,
        id: &QuotationId,
        final_offer: bool,
    ) -> Result<Quotation, ApplicationError> {
        let mut quotation = self.load_quotation(id).await?;
        let mut cart = self.load_cart(&quotation.cart_id).await?;
        let now = Utc::now();

        quotation.send(now, self.settings.quotation_validity())?;
        quotation.is_final_offer = final_offer;
        if cart.status != CartStatus::Quoted {
            cart.transition_to(CartStatus::Quoted)?;
            cart.updated_at = now;
        }

        self.repos.quotations.save(quotation.clone()).await?;
        self.repos.carts.save(cart).await?;
        info!(
            event_name = "quotation.sent",
            correlation_id = %ctx.correlation_id,
            cart_id = %quotation.cart_id,
            quotation_id = %quotation.id,
            total = %quotation.total,
            final_offer,
            "quotation sent to buyer"
        );
        self.emit(
            &ctx.with_cart(quotation.cart_id.clone()),
            "quotation.sent",
            AuditCategory::Quotation,
            &[("quotation_id", quotation.id.0.clone()), ("final_offer", final_offer.to_string())],
        );
        Ok(quotation)
    }

    /// Books the order for a sent quotation. Repeated calls return the order already booked.
    pub async fn accept_quotation(
        &self,
        ctx: &AuditContext,
        id: &QuotationId,
    ) -> Result<Order, ApplicationError> {
        let _guard = self.acceptance.lock().await;
        self.accept_quotation_locked(ctx, id).await
    }

    async fn accept_quotation_locked(
        &self,
        ctx: &AuditContext,
        id: &QuotationId,
    ) -> Result<Order, ApplicationError> {
        if let Some(order) = self.repos.orders.find_by_quotation(id).await? {
            info!(
                event_name = "quotation.accept_repeated",
                correlation_id = %ctx.correlation_id,
                quotation_id = %id,
                order_id = %order.id,
                "quotation already accepted; returning existing order"
            );
            return Ok(order);
        }

        let now = Utc::now();
        let mut quotation = self.load_quotation(id).await?;
        self.ensure_active(&quotation).await?;
        if quotation.expire_if_due(now) {
            self.repos.quotations.save(quotation.clone()).await?;
        }

        let negotiation = self.repos.negotiations.find_by_quotation(id).await?;
        if let Some(negotiation) = negotiation.as_ref().filter(|n| !n.status.is_terminal()) {
            return Err(ApplicationError::Conflict(format!(
                "negotiation `{}` on quotation `{id}` is still {}",
                negotiation.id,
                negotiation.status.as_str()
            )));
        }

        if quotation.status != QuotationStatus::Accepted {
            quotation.transition_to(QuotationStatus::Accepted, now)?;
        }

        let accepted_negotiation = negotiation
            .as_ref()
            .filter(|n| n.status == NegotiationStatus::Accepted)
            .map(|n| n.id.clone());
        let order = effective_terms(&quotation, negotiation.as_ref()).into_order(
            OrderId(new_id("ord")),
            &quotation,
            accepted_negotiation,
            now,
        );

        self.repos.quotations.save(quotation.clone()).await?;
        if let Err(error) = self.repos.orders.save(order.clone()).await {
            if error.is_unique_violation() {
                if let Some(existing) = self.repos.orders.find_by_quotation(id).await? {
                    return Ok(existing);
                }
            }
            return Err(error.into());
        }

        info!(
            event_name = "order.created",
            correlation_id = %ctx.correlation_id,
            cart_id = %order.cart_id,
            quotation_id = %order.quotation_id,
            order_id = %order.id,
            total_amount = %order.total_amount,
            "quotation accepted and order created"
        );
        self.emit(
            &ctx.with_cart(order.cart_id.clone()),
            "quotation.accepted",
            AuditCategory::Quotation,
            &[
                ("quotation_id", quotation.id.0.clone()),
                ("order_id", order.id.0.clone()),
                ("total_amount", order.total_amount.to_string()),
            ],
        );
        Ok(order)
    }

    /// Terminal for the quotation; an unfinished negotiation on it ends as rejected.
    pub async fn reject_quotation(
        &self,
        ctx: &AuditContext,
        id: &QuotationId,
        reason: Option<String>,
    ) -> Result<Quotation, ApplicationError> {
        let now = Utc::now();
        let mut quotation = self.load_quotation(id).await?;
        self.ensure_active(&quotation).await?;
        let audit = ctx.with_cart(quotation.cart_id.clone());
        quotation.reject(reason.clone(), now)?;

        let mut negotiation = self.repos.negotiations.find_by_quotation(id).await?;
        if let Some(negotiation) = negotiation.as_mut().filter(|n| !n.status.is_terminal()) {
            self.engine
                .apply_with_audit(negotiation, &quotation, NegotiationCommand::Reject, now, &self.audit, &audit)
                .map_err(negotiation_error)?;
        }

        self.repos.quotations.save(quotation.clone()).await?;
        if let Some(negotiation) = negotiation {
            self.repos.negotiations.save(negotiation).await?;
        }
        self.emit(
            &audit,
            "quotation.rejected",
            AuditCategory::Quotation,
            &[
                ("quotation_id", quotation.id.0.clone()),
                ("reason", reason.unwrap_or_default()),
            ],
        );
        Ok(quotation)
    }

    /// Moves every sent quotation of the cart whose validity has lapsed to `expired`.
    pub async fn expire_due_quotations(
        &self,
        ctx: &AuditContext,
        cart_id: &CartId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quotation>, ApplicationError> {
        let mut expired = Vec::new();
        for mut quotation in self.repos.quotations.list_for_cart(cart_id).await? {
            if quotation.expire_if_due(now) {
                self.repos.quotations.save(quotation.clone()).await?;
                self.emit(
                    &ctx.with_cart(cart_id.clone()),
                    "quotation.expired",
                    AuditCategory::Quotation,
                    &[("quotation_id", quotation.id.0.clone())],
                );
                expired.push(quotation);
            }
        }
        Ok(expired)
    }

    /// Countdown decoration for buyer views.
    pub fn is_expiring_soon(&self, quotation: &Quotation, now: DateTime<Utc>) -> bool {
        quotation.expiring_soon(now, self.settings.expiring_soon_window())
    }

    // ---- negotiation -------------------------------------------------------------------------

    pub async fn get_negotiation(&self, id: &NegotiationId) -> Result<Negotiation, ApplicationError> {
        self.load_negotiation(id).await
    }

    pub async fn open_negotiation(
        &self,
        ctx: &AuditContext,
        quotation_id: &QuotationId,
        opened_by: Party,
        note: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        if let Some(existing) = self.repos.negotiations.find_by_quotation(quotation_id).await? {
            return Err(ApplicationError::Conflict(format!(
                "quotation `{quotation_id}` already has negotiation `{}`",
                existing.id
            )));
        }

        let now = Utc::now();
        let mut quotation = self.load_quotation(quotation_id).await?;
        self.ensure_active(&quotation).await?;
        if quotation.expire_if_due(now) {
            self.repos.quotations.save(quotation.clone()).await?;
        }

        let negotiation = self
            .engine
            .open(NegotiationId(new_id("neg")), &quotation, opened_by, now)
            .map_err(negotiation_error)?;
        self.repos.negotiations.save(negotiation.clone()).await?;
        self.emit(
            &ctx.with_cart(quotation.cart_id.clone()),
            "negotiation.opened",
            AuditCategory::Negotiation,
            &[
                ("negotiation_id", negotiation.id.0.clone()),
                ("opened_by", opened_by.as_str().to_string()),
                ("note", note.unwrap_or_default()),
            ],
        );
        Ok(negotiation)
    }

    pub async fn submit_buyer_counter(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        lines: Vec<ProposedLine>,
        message: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        self.counter(ctx, id, Party::Buyer, lines, message).await
    }

    pub async fn submit_seller_counter(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        lines: Vec<ProposedLine>,
        message: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        self.counter(ctx, id, Party::Seller, lines, message).await
    }

    pub async fn buyer_accept_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
    ) -> Result<AcceptedNegotiation, ApplicationError> {
        self.accept_negotiation(ctx, id, Party::Buyer).await
    }

    pub async fn seller_accept_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
    ) -> Result<AcceptedNegotiation, ApplicationError> {
        self.accept_negotiation(ctx, id, Party::Seller).await
    }

    pub async fn buyer_close_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        reason: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        self.apply_negotiation(ctx, id, NegotiationCommand::Close { party: Party::Buyer, reason })
            .await
    }

    pub async fn seller_close_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        reason: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        self.apply_negotiation(ctx, id, NegotiationCommand::Close { party: Party::Seller, reason })
            .await
    }

    /// Polls the stored thread at the configured interval.
    pub fn watch_negotiation(&self, id: NegotiationId) -> NegotiationWatch {
        NegotiationWatcher::new(
            self.repos.negotiations.clone(),
            self.settings.negotiation_poll_interval(),
        )
        .watch(id)
    }

    async fn counter(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        party: Party,
        lines: Vec<ProposedLine>,
        message: Option<String>,
    ) -> Result<Negotiation, ApplicationError> {
        let command =
            NegotiationCommand::Counter { party, proposer_id: ctx.actor.clone(), lines, message };
        self.apply_negotiation(ctx, id, command).await
    }

    /// Accepting the latest round books the order on that round's prices.
    async fn accept_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        party: Party,
    ) -> Result<AcceptedNegotiation, ApplicationError> {
        let _guard = self.acceptance.lock().await;
        let current = self.load_negotiation(id).await?;
        let negotiation = if current.status == NegotiationStatus::Accepted {
            current
        } else {
            self.apply_negotiation(ctx, id, NegotiationCommand::Accept { party }).await?
        };
        let order = self.accept_quotation_locked(ctx, &negotiation.quotation_id).await?;
        Ok(AcceptedNegotiation { negotiation, order })
    }

    async fn apply_negotiation(
        &self,
        ctx: &AuditContext,
        id: &NegotiationId,
        command: NegotiationCommand,
    ) -> Result<Negotiation, ApplicationError> {
        let now = Utc::now();
        let mut negotiation = self.load_negotiation(id).await?;
        let mut quotation = self.load_quotation(&negotiation.quotation_id).await?;
        // Walking away from a superseded thread stays possible; nothing else does.
        let closing = matches!(command, NegotiationCommand::Close { .. });
        if !closing {
            self.ensure_active(&quotation).await?;
        }
        if !closing && quotation.expire_if_due(now) {
            self.repos.quotations.save(quotation.clone()).await?;
        }

        let audit = ctx.with_cart(quotation.cart_id.clone());
        let outcome = self
            .engine
            .apply_with_audit(&mut negotiation, &quotation, command, now, &self.audit, &audit)
            .map_err(|error| {
                warn!(
                    event_name = "negotiation.transition_rejected",
                    correlation_id = %ctx.correlation_id,
                    negotiation_id = %id,
                    error = %error,
                    "negotiation command rejected"
                );
                negotiation_error(error)
            })?;
        self.repos.negotiations.save(negotiation.clone()).await?;
        info!(
            event_name = "negotiation.transition_applied",
            correlation_id = %ctx.correlation_id,
            negotiation_id = %id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            round = ?outcome.appended_round,
            "negotiation transition applied"
        );
        Ok(negotiation)
    }

    // ---- orders and payments -----------------------------------------------------------------

    pub async fn get_order(&self, id: &OrderId) -> Result<Order, ApplicationError> {
        self.load_order(id).await
    }

    pub async fn approve_ops_final_check(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
    ) -> Result<Order, ApplicationError> {
        let actor = ctx.actor.clone();
        self.mutate_order(ctx, order_id, "order.ops_check_approved", |order, now| {
            order.approve_ops_check(actor, now)
        })
        .await
    }

    pub async fn reject_ops_final_check(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
        reason: Option<String>,
    ) -> Result<Order, ApplicationError> {
        let actor = ctx.actor.clone();
        self.mutate_order(ctx, order_id, "order.ops_check_rejected", |order, now| {
            order.reject_ops_check(actor, reason, now)
        })
        .await
    }

    pub async fn mark_payment_link_sent(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
    ) -> Result<Order, ApplicationError> {
        let infer = self.settings.infer_legacy_ops_approval;
        self.mutate_order(ctx, order_id, "order.payment_link_sent", |order, now| {
            order.mark_payment_link_sent(now, infer)
        })
        .await
    }

    /// Records a non-redirect payment. Bank transfers stay pending until confirmed.
    pub async fn initiate_payment(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
        request: PaymentRequest,
    ) -> Result<Order, ApplicationError> {
        let infer = self.settings.infer_legacy_ops_approval;
        let event_type = format!("payment.initiated.{}", request.method.as_str());
        self.mutate_order(ctx, order_id, &event_type, |order, now| {
            if !order.resolve_ops_check(infer).is_approved() {
                return Err(DomainError::InvalidOrderOperation {
                    order_id: order.id.clone(),
                    reason: "payment requires an approved ops final check".to_string(),
                });
            }
            let status = intake_status(request.method, request.reported_status);
            order.record_payment(Payment {
                id: PaymentId(new_id("pay")),
                order_id: order.id.clone(),
                amount: request.amount,
                method: request.method,
                status,
                gateway_reference: None,
                transaction_ref: request.transaction_ref,
                paid_at: (status == PaymentStatus::Completed).then_some(now),
                created_at: now,
            })
        })
        .await
    }

    pub async fn confirm_manual_payment(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
        payment_id: &PaymentId,
    ) -> Result<Order, ApplicationError> {
        self.mutate_order(ctx, order_id, "payment.manual_confirmed", |order, now| {
            order.confirm_pending_payment(payment_id, now)
        })
        .await
    }

    pub async fn forward_to_ops(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
    ) -> Result<Order, ApplicationError> {
        self.mutate_order(ctx, order_id, "order.forwarded_to_ops", |order, now| {
            order.forward_to_ops(now)
        })
        .await
    }

    pub async fn update_fulfillment(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
        next: OrderStatus,
    ) -> Result<Order, ApplicationError> {
        let event_type = format!("order.fulfillment.{}", next.as_str());
        self.mutate_order(ctx, order_id, &event_type, |order, now| {
            order.advance_fulfillment(next, now)
        })
        .await
    }

    pub async fn verify_gateway_session(
        &self,
        session_id: &str,
    ) -> Result<GatewaySession, ApplicationError> {
        self.gateway
            .verify_session(session_id)
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))
    }

    /// Confirms a checkout redirect. `params` is emptied whatever the outcome.
    pub async fn reconcile_payment_redirect(
        &self,
        ctx: &AuditContext,
        params: &mut RedirectParams,
    ) -> ReconciliationOutcome {
        let reconciler = PaymentReconciler::new(
            self.gateway.clone(),
            RepositoryOrderLedger::new(self.repos.orders.clone()),
            RepositoryReconciliationMarkers::new(self.repos.markers.clone()),
        )
        .with_legacy_ops_inference(self.settings.infer_legacy_ops_approval);
        let outcome = reconciler.reconcile(params, Utc::now()).await;

        if let Some((label, session_id)) = reconciliation_label(&outcome) {
            let result = match &outcome {
                ReconciliationOutcome::OrderMismatch { .. } => AuditOutcome::Rejected,
                outcome if outcome.is_success() => AuditOutcome::Success,
                _ => AuditOutcome::Failed,
            };
            self.audit.emit(
                AuditEvent::new(
                    ctx,
                    format!("payment.reconciliation.{label}"),
                    AuditCategory::Payment,
                    result,
                )
                .with_metadata("session_id", session_id),
            );
        }
        outcome
    }

    // ---- status ------------------------------------------------------------------------------

    pub async fn workflow_snapshot(
        &self,
        cart_id: &CartId,
    ) -> Result<WorkflowSnapshot, ApplicationError> {
        load_workflow_snapshot(
            self.repos.carts.as_ref(),
            self.repos.quotations.as_ref(),
            self.repos.negotiations.as_ref(),
            self.repos.orders.as_ref(),
            cart_id,
        )
        .await?
        .ok_or_else(|| ApplicationError::not_found("cart", cart_id.0.clone()))
    }

    pub async fn canonical_status(&self, cart_id: &CartId) -> Result<CanonicalStatus, ApplicationError> {
        let snapshot = self.workflow_snapshot(cart_id).await?;
        Ok(snapshot.canonical_status(self.settings.derive_options()))
    }

    // ---- helpers -----------------------------------------------------------------------------

    async fn mutate_order<F>(
        &self,
        ctx: &AuditContext,
        order_id: &OrderId,
        event_type: &str,
        mutation: F,
    ) -> Result<Order, ApplicationError>
    where
        F: FnOnce(&mut Order, DateTime<Utc>) -> Result<(), DomainError>,
    {
        let mut order = self.load_order(order_id).await?;
        let audit = ctx.with_cart(order.cart_id.clone());
        if let Err(error) = mutation(&mut order, Utc::now()) {
            warn!(
                event_name = "order.operation_rejected",
                correlation_id = %ctx.correlation_id,
                order_id = %order_id,
                operation = event_type,
                error = %error,
                "order operation rejected"
            );
            self.audit.emit(
                AuditEvent::new(&audit, event_type, AuditCategory::Order, AuditOutcome::Rejected)
                    .with_metadata("order_id", order_id.0.clone())
                    .with_metadata("error", error.to_string()),
            );
            return Err(error.into());
        }

        self.repos.orders.save(order.clone()).await?;
        info!(
            event_name = event_type,
            correlation_id = %ctx.correlation_id,
            order_id = %order_id,
            status = order.status.as_str(),
            paid_amount = %order.paid_amount,
            "order updated"
        );
        self.emit(&audit, event_type, AuditCategory::Order, &[("order_id", order_id.0.clone())]);
        Ok(order)
    }

    fn emit(
        &self,
        ctx: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        metadata: &[(&str, String)],
    ) {
        let event = metadata.iter().fold(
            AuditEvent::new(ctx, event_type, category, AuditOutcome::Success),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        self.audit.emit(event);
    }

    /// Only the cart's active quotation is actionable; older ones are read-only history.
    async fn ensure_active(&self, quotation: &Quotation) -> Result<(), ApplicationError> {
        let quotations = self.repos.quotations.list_for_cart(&quotation.cart_id).await?;
        match select_active_quotation(&quotations) {
            Some(active) if active.id != quotation.id => Err(ApplicationError::Conflict(format!(
                "quotation `{}` was superseded by `{}`",
                quotation.id, active.id
            ))),
            _ => Ok(()),
        }
    }

    async fn ensure_requotable(&self, cart_id: &CartId) -> Result<(), ApplicationError> {
        let quotations = self.repos.quotations.list_for_cart(cart_id).await?;
        let Some(active) = select_active_quotation(&quotations) else {
            return Ok(());
        };
        if active.status == QuotationStatus::Accepted
            || self.repos.orders.find_by_quotation(&active.id).await?.is_some()
        {
            return Err(ApplicationError::Conflict(format!(
                "quotation `{}` of cart `{cart_id}` is accepted and cannot be re-quoted",
                active.id
            )));
        }
        if let Some(negotiation) = self
            .repos
            .negotiations
            .find_by_quotation(&active.id)
            .await?
            .filter(|negotiation| !negotiation.status.is_terminal())
        {
            return Err(ApplicationError::Conflict(format!(
                "negotiation `{}` on quotation `{}` is still {}",
                negotiation.id,
                active.id,
                negotiation.status.as_str()
            )));
        }
        Ok(())
    }

    async fn load_cart(&self, id: &CartId) -> Result<Cart, ApplicationError> {
        self.repos
            .carts
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("cart", id.0.clone()))
    }

    async fn load_quotation(&self, id: &QuotationId) -> Result<Quotation, ApplicationError> {
        self.repos
            .quotations
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("quotation", id.0.clone()))
    }

    async fn load_negotiation(&self, id: &NegotiationId) -> Result<Negotiation, ApplicationError> {
        self.repos
            .negotiations
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("negotiation", id.0.clone()))
    }

    async fn load_order(&self, id: &OrderId) -> Result<Order, ApplicationError> {
        self.repos
            .orders
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("order", id.0.clone()))
    }
}

fn reconciliation_label(outcome: &ReconciliationOutcome) -> Option<(&'static str, &str)> {
    match outcome {
        ReconciliationOutcome::NoSession => None,
        ReconciliationOutcome::AlreadyReconciled { session_id } => {
            Some(("already_reconciled", session_id))
        }
        ReconciliationOutcome::Recorded { session_id, .. } => Some(("recorded", session_id)),
        ReconciliationOutcome::RecordedPendingOpsCheck { session_id, .. } => {
            Some(("recorded_pending_ops_check", session_id))
        }
        ReconciliationOutcome::OrderMismatch { session_id, .. } => {
            Some(("order_mismatch", session_id))
        }
        ReconciliationOutcome::ConfirmedByOrderFallback { session_id, .. } => {
            Some(("confirmed_by_order", session_id))
        }
        ReconciliationOutcome::NotPaid { session_id } => Some(("not_paid", session_id)),
        ReconciliationOutcome::VerificationFailed { session_id, .. } => {
            Some(("verification_failed", session_id))
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn invariant(message: impl Into<String>) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvariantViolation(message.into()))
}

fn negotiation_error(error: NegotiationError) -> ApplicationError {
    ApplicationError::Domain(DomainError::Negotiation(error))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use gemsource_core::audit::{AuditContext, InMemoryAuditSink};
    use gemsource_core::config::WorkflowConfig;
    use gemsource_core::domain::cart::{CartStatus, CatalogRef, CatalogSource};
    use gemsource_core::domain::quotation::QuotationStatus;
    use gemsource_core::errors::{ApplicationError, DomainError};
    use gemsource_core::payments::{GatewayError, GatewaySession, PaymentGateway};

    use super::{NewCartItem, QuotedPrice, WorkflowRepositories, WorkflowService};

    struct OfflineGateway;

    #[async_trait]
    impl PaymentGateway for OfflineGateway {
        async fn verify_session(&self, _: &str) -> Result<GatewaySession, GatewayError> {
            Err(GatewayError::Transport("offline".to_string()))
        }
    }

    fn service() -> (WorkflowService, InMemoryAuditSink) {
        let audit = InMemoryAuditSink::default();
        let service = WorkflowService::new(
            WorkflowRepositories::in_memory(),
            Arc::new(OfflineGateway),
            Arc::new(audit.clone()),
            WorkflowConfig::default(),
        );
        (service, audit)
    }

    fn ctx(actor: &str) -> AuditContext {
        AuditContext::new(None, "corr-test", actor)
    }

    fn ring(quantity: u32) -> NewCartItem {
        NewCartItem {
            catalog_ref: CatalogRef {
                source: CatalogSource::Internal,
                reference: "RING-001".to_string(),
                sku: Some("RING-001".to_string()),
                category: Some("rings".to_string()),
            },
            quantity,
            customization_note: None,
        }
    }

    #[tokio::test]
    async fn submitted_cart_rejects_buyer_edits() {
        let (service, _) = service();
        let buyer = ctx("buyer-1");
        let cart = service.create_cart(&buyer, "buyer-1").await.expect("cart");
        let cart = service.add_item(&buyer, &cart.id, ring(2)).await.expect("add");
        let item_id = cart.items[0].id.clone();
        service.submit_cart(&buyer, &cart.id).await.expect("submit");

        let error = service
            .update_item(&buyer, &cart.id, &item_id, 5, None)
            .await
            .expect_err("locked after submit");

        assert!(matches!(error, ApplicationError::Domain(DomainError::CartLocked { .. })));
    }

    #[tokio::test]
    async fn quoting_requires_validated_items_and_every_price() {
        let (service, _) = service();
        let buyer = ctx("buyer-1");
        let ops = ctx("ops-1");
        let cart = service.create_cart(&buyer, "buyer-1").await.expect("cart");
        let cart = service.add_item(&buyer, &cart.id, ring(2)).await.expect("add");
        let item_id = cart.items[0].id.clone();
        service.submit_cart(&buyer, &cart.id).await.expect("submit");

        let unvalidated = service
            .create_quotation(&ctx("sales-1"), &cart.id, vec![QuotedPrice::new(item_id.clone(), Decimal::new(50, 0))])
            .await
            .expect_err("items not validated");
        assert!(matches!(unvalidated, ApplicationError::Domain(DomainError::InvariantViolation(_))));

        service.validate_inventory(&ops, &cart.id).await.expect("validate");
        let unpriced = service
            .create_quotation(&ctx("sales-1"), &cart.id, Vec::new())
            .await
            .expect_err("missing price");
        assert!(matches!(unpriced, ApplicationError::Domain(DomainError::InvariantViolation(_))));

        let quotation = service
            .create_quotation(&ctx("sales-1"), &cart.id, vec![QuotedPrice::new(item_id, Decimal::new(50, 0))])
            .await
            .expect("quotation");
        assert_eq!(quotation.total, Decimal::new(100, 0));
        assert_eq!(quotation.status, QuotationStatus::Draft);
    }

    #[tokio::test]
    async fn sending_moves_cart_to_quoted_and_expiry_is_server_driven() {
        let (service, audit) = service();
        let buyer = ctx("buyer-1");
        let cart = service.create_cart(&buyer, "buyer-1").await.expect("cart");
        let cart = service.add_item(&buyer, &cart.id, ring(1)).await.expect("add");
        let item_id = cart.items[0].id.clone();
        service.submit_cart(&buyer, &cart.id).await.expect("submit");
        service.validate_inventory(&ctx("ops-1"), &cart.id).await.expect("validate");
        let quotation = service
            .create_quotation(&ctx("sales-1"), &cart.id, vec![QuotedPrice::new(item_id, Decimal::new(80, 0))])
            .await
            .expect("quotation");

        let sent = service.send_quotation(&ctx("sales-1"), &quotation.id, false).await.expect("send");
        assert_eq!(service.get_cart(&cart.id).await.expect("cart").status, CartStatus::Quoted);
        let expires_at = sent.expires_at.expect("expiry set");
        assert!(service.is_expiring_soon(&sent, expires_at - Duration::hours(2)));
        assert!(!service.is_expiring_soon(&sent, Utc::now()));

        let expired = service
            .expire_due_quotations(&ctx("system"), &cart.id, expires_at + Duration::seconds(1))
            .await
            .expect("expire");
        assert_eq!(expired.len(), 1);
        let stored = service.get_quotation(&quotation.id).await.expect("quotation");
        assert_eq!(stored.status, QuotationStatus::Expired);
        assert_eq!(audit.events_of_type("quotation.expired").len(), 1);

        let error = service.accept_quotation(&buyer, &quotation.id).await.expect_err("expired");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidQuotationTransition { .. })
        ));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let (service, _) = service();

        let error = service
            .canonical_status(&gemsource_core::domain::cart::CartId("missing".to_string()))
            .await
            .expect_err("no cart");

        assert_eq!(error, ApplicationError::not_found("cart", "missing"));
    }
}
