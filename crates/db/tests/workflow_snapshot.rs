use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use gemsource_core::domain::cart::{
    Cart, CartId, CartItem, CartItemId, CartStatus, CatalogRef, CatalogSource,
};
use gemsource_core::domain::negotiation::{NegotiationId, Party};
use gemsource_core::domain::order::OrderId;
use gemsource_core::domain::quotation::{Quotation, QuotationId, QuotationItem};
use gemsource_core::negotiation::{effective_terms, NegotiationCommand, NegotiationEngine};
use gemsource_core::payments::OrderLedger;
use gemsource_core::domain::cart::AvailabilityStatus;
use gemsource_core::status::{CanonicalStatus, DeriveOptions};
use gemsource_core::validator::validate_cart;
use gemsource_db::repositories::{
    CartRepository, InventoryRepository, SqlInventoryRepository, NegotiationRepository, OrderRepository, QuotationRepository,
    SqlCartRepository, SqlNegotiationRepository, SqlOrderRepository, SqlQuotationRepository,
};
use gemsource_db::{
    connect_with_settings, load_workflow_snapshot, migrations, MarketplaceSeedDataset,
    RepositoryOrderLedger,
};

type SnapshotTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left, right) => {
                if left != right {
                    return Err(format!(
                        "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                        left, right
                    ));
                }
            }
        }
    };
}

struct Stores {
    carts: SqlCartRepository,
    quotations: SqlQuotationRepository,
    negotiations: SqlNegotiationRepository,
    orders: Arc<SqlOrderRepository>,
}

impl Stores {
    async fn status(&self, cart_id: &CartId) -> SnapshotTestResult<CanonicalStatus> {
        let snapshot = load_workflow_snapshot(
            &self.carts,
            &self.quotations,
            &self.negotiations,
            self.orders.as_ref(),
            cart_id,
        )
        .await
        .map_err(|error| error.to_string())?
        .ok_or_else(|| "cart should exist".to_string())?;
        Ok(snapshot.canonical_status(DeriveOptions::default()))
    }
}

async fn stores() -> SnapshotTestResult<Stores> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    Ok(Stores {
        carts: SqlCartRepository::new(pool.clone()),
        quotations: SqlQuotationRepository::new(pool.clone()),
        negotiations: SqlNegotiationRepository::new(pool.clone()),
        orders: Arc::new(SqlOrderRepository::new(pool)),
    })
}

fn cart() -> Cart {
    let at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).single().unwrap_or_else(Utc::now);
    Cart {
        id: CartId("cart-it-1".to_string()),
        buyer_id: "buyer-it".to_string(),
        status: CartStatus::UnderReview,
        items: vec![CartItem {
            id: CartItemId("ci-it-1".to_string()),
            quantity: 4,
            customization_note: None,
            catalog_ref: CatalogRef {
                source: CatalogSource::Internal,
                reference: "BANGLE-7".to_string(),
                sku: Some("BANGLE-7".to_string()),
                category: Some("bangles".to_string()),
            },
            validation: None,
        }],
        assigned_sales_id: Some("sales-it".to_string()),
        created_at: at,
        updated_at: at,
    }
}

#[tokio::test]
async fn sql_backed_snapshot_follows_the_workflow() -> SnapshotTestResult {
    let stores = stores().await?;
    let cart = cart();
    let at = cart.created_at;
    stores.carts.save(cart.clone()).await.map_err(|e| e.to_string())?;
    require_eq!(stores.status(&cart.id).await?, CanonicalStatus::OpsForwarded);

    let mut quotation = Quotation::new_draft(
        QuotationId("quo-it-1".to_string()),
        cart.id.clone(),
        vec![QuotationItem::new(CartItemId("ci-it-1".to_string()), Decimal::new(250, 0), 4)],
        "sales-it",
        at + Duration::hours(1),
    )
    .map_err(|e| e.to_string())?;
    quotation.send(at + Duration::hours(2), Duration::days(7)).map_err(|e| e.to_string())?;
    stores.quotations.save(quotation.clone()).await.map_err(|e| e.to_string())?;
    require_eq!(stores.status(&cart.id).await?, CanonicalStatus::Quoted);

    let engine = NegotiationEngine::new();
    let mut negotiation = engine
        .open(NegotiationId("neg-it-1".to_string()), &quotation, Party::Seller, at + Duration::hours(3))
        .map_err(|e| e.to_string())?;
    engine
        .apply(
            &mut negotiation,
            &quotation,
            NegotiationCommand::Accept { party: Party::Buyer },
            at + Duration::hours(4),
        )
        .map_err(|e| e.to_string())?;
    stores.negotiations.save(negotiation.clone()).await.map_err(|e| e.to_string())?;
    require_eq!(stores.status(&cart.id).await?, CanonicalStatus::AcceptedPendingOpsRecheck);

    let order = effective_terms(&quotation, Some(&negotiation)).into_order(
        OrderId("ord-it-1".to_string()),
        &quotation,
        Some(negotiation.id.clone()),
        at + Duration::hours(5),
    );
    stores.orders.save(order.clone()).await.map_err(|e| e.to_string())?;
    require_eq!(stores.status(&cart.id).await?, CanonicalStatus::AcceptedPendingOpsRecheck);

    let ledger = RepositoryOrderLedger::new(stores.orders.clone());
    let found = ledger.find_order(&order.id).await.map_err(|e| e.to_string())?;
    require_eq!(found.map(|order| order.total_amount), Some(Decimal::new(1000, 0)));
    Ok(())
}

#[tokio::test]
async fn seeded_validation_cart_classifies_against_seeded_inventory() -> SnapshotTestResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    MarketplaceSeedDataset::load(&pool).await.map_err(|e| e.to_string())?;

    let verification = MarketplaceSeedDataset::verify(&pool).await.map_err(|e| e.to_string())?;
    require!(verification.all_present);

    let carts = SqlCartRepository::new(pool.clone());
    let inventory = SqlInventoryRepository::new(pool.clone());
    let cart_id = CartId("cart-validation-001".to_string());
    let mut cart = carts
        .find_by_id(&cart_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "seeded cart should exist".to_string())?;
    let catalog = inventory.load_catalog().await.map_err(|e| e.to_string())?;

    let report = validate_cart(&cart, &catalog);
    require_eq!(report.items().count(), cart.items.len());
    report.apply_to_cart(&mut cart, "ops-it", Utc::now());
    require!(cart.all_items_validated());
    carts.save(cart.clone()).await.map_err(|e| e.to_string())?;

    let reloaded = carts
        .find_by_id(&cart_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "validated cart should reload".to_string())?;
    let statuses: Vec<AvailabilityStatus> = reloaded
        .items
        .iter()
        .filter_map(|item| item.validation.as_ref().map(|validation| validation.status))
        .collect();
    require_eq!(statuses.len(), cart.items.len());
    Ok(())
}
