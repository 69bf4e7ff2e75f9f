use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use gemsource_core::domain::cart::{
    Cart, CartId, CartItem, CartItemId, CartStatus, CatalogRef, CatalogSource,
};
use gemsource_core::domain::inventory::{
    InventoryStock, ManufacturerContact, SourcingKind, SourcingOption,
};
use gemsource_core::domain::negotiation::{NegotiationId, Party};
use gemsource_core::domain::order::{Order, OrderId};
use gemsource_core::domain::quotation::{
    Quotation, QuotationId, QuotationItem, QuotationStatus,
};
use gemsource_core::errors::DomainError;
use gemsource_core::negotiation::{
    effective_terms, NegotiationCommand, NegotiationEngine, NegotiationError, ProposedLine,
};
use gemsource_core::status::{CanonicalStatus, DeriveOptions};

use crate::connection::DbPool;
use crate::repositories::{
    CartRepository, InventoryRepository, NegotiationRepository, OrderRepository,
    QuotationRepository, RepositoryError, SqlCartRepository, SqlInventoryRepository,
    SqlNegotiationRepository, SqlOrderRepository, SqlQuotationRepository,
};
use crate::snapshot::load_workflow_snapshot;

/// Deterministic demo data for the three workflow stages operators look at most.
const SEED_FLOWS: &[SeedFlowContract] = &[
    SeedFlowContract {
        flow_type: "inventory_validation",
        cart_id: "cart-validation-001",
        expected_status: CanonicalStatus::Submitted,
        expected_item_count: 3,
        description: "Submitted cart awaiting ops inventory validation",
    },
    SeedFlowContract {
        flow_type: "negotiation",
        cart_id: "cart-negotiation-001",
        expected_status: CanonicalStatus::Counter,
        expected_item_count: 2,
        description: "Sent quotation with a buyer counter-offer awaiting the seller",
    },
    SeedFlowContract {
        flow_type: "payment_pending",
        cart_id: "cart-payment-001",
        expected_status: CanonicalStatus::PaymentLinkSent,
        expected_item_count: 2,
        description: "Accepted quotation with an approved ops check and a payment link sent",
    },
];

pub struct MarketplaceSeedDataset;

impl MarketplaceSeedDataset {
    /// Writes the seed records through the SQL repositories. Re-running overwrites them.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let carts = SqlCartRepository::new(pool.clone());
        let quotations = SqlQuotationRepository::new(pool.clone());
        let negotiations = SqlNegotiationRepository::new(pool.clone());
        let orders = SqlOrderRepository::new(pool.clone());
        let inventory = SqlInventoryRepository::new(pool.clone());

        for stock in seed_stock() {
            inventory.save_stock(stock).await?;
        }
        for option in seed_sourcing() {
            inventory.save_sourcing_option(option).await?;
        }

        let base = seed_epoch();

        carts.save(validation_cart(base)).await?;

        let engine = NegotiationEngine::new();
        carts.save(quoted_cart("cart-negotiation-001", "neg", base)).await?;
        let negotiation_quote =
            sent_quotation("quo-negotiation-001", "cart-negotiation-001", "neg", base);
        let mut negotiation = engine
            .open(
                NegotiationId("neg-negotiation-001".to_string()),
                &negotiation_quote,
                Party::Buyer,
                base + Duration::hours(26),
            )
            .map_err(seed_error)?;
        engine
            .apply(
                &mut negotiation,
                &negotiation_quote,
                NegotiationCommand::Counter {
                    party: Party::Buyer,
                    proposer_id: "buyer-aurora".to_string(),
                    lines: vec![
                        ProposedLine::new(seed_item_id("neg", 1), Decimal::new(11000, 2), 2),
                        ProposedLine::new(seed_item_id("neg", 2), Decimal::new(5000, 2), 4),
                    ],
                    message: Some("Can you meet us at 420 for the set?".to_string()),
                },
                base + Duration::hours(27),
            )
            .map_err(seed_error)?;
        quotations.save(negotiation_quote).await?;
        negotiations.save(negotiation).await?;

        carts.save(quoted_cart("cart-payment-001", "pay", base)).await?;
        let mut payment_quote = sent_quotation("quo-payment-001", "cart-payment-001", "pay", base);
        payment_quote
            .transition_to(QuotationStatus::Accepted, base + Duration::hours(30))
            .map_err(domain_seed_error)?;
        let mut order = effective_terms(&payment_quote, None).into_order(
            OrderId("ord-payment-001".to_string()),
            &payment_quote,
            None,
            base + Duration::hours(30),
        );
        order.approve_ops_check("ops-meera", base + Duration::hours(31)).map_err(domain_seed_error)?;
        order
            .mark_payment_link_sent(base + Duration::hours(32), false)
            .map_err(domain_seed_error)?;
        quotations.save(payment_quote).await?;
        orders.save(order).await?;

        let flows_seeded = SEED_FLOWS
            .iter()
            .map(|flow| FlowSeedInfo {
                flow_type: flow.flow_type,
                cart_id: flow.cart_id,
                description: flow.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { flows_seeded })
    }

    /// Reloads every seeded cart and checks its item count and derived canonical status.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let carts = SqlCartRepository::new(pool.clone());
        let quotations = SqlQuotationRepository::new(pool.clone());
        let negotiations = SqlNegotiationRepository::new(pool.clone());
        let orders = SqlOrderRepository::new(pool.clone());
        let inventory = SqlInventoryRepository::new(pool.clone());

        let mut checks = Vec::new();

        let catalog = inventory.load_catalog().await?;
        checks.push(("inventory-stock", catalog.stock.len() >= seed_stock().len()));
        checks.push(("sourcing-options", catalog.sourcing.len() >= seed_sourcing().len()));

        for flow in SEED_FLOWS {
            let snapshot = load_workflow_snapshot(
                &carts,
                &quotations,
                &negotiations,
                &orders,
                &CartId(flow.cart_id.to_string()),
            )
            .await?;

            match snapshot {
                Some(snapshot) => {
                    checks.push((flow.cart_label(), true));
                    checks.push((
                        flow.item_count_label(),
                        snapshot.cart.items.len() == flow.expected_item_count,
                    ));
                    checks.push((
                        flow.status_label(),
                        snapshot.canonical_status(DeriveOptions::default()) == flow.expected_status,
                    ));
                }
                None => {
                    checks.push((flow.cart_label(), false));
                }
            }
        }

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded workflow rows. Inventory rows are left in place.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for flow in SEED_FLOWS {
            sqlx::query(
                "DELETE FROM payment WHERE order_id IN
                     (SELECT id FROM marketplace_order WHERE cart_id = ?)",
            )
            .bind(flow.cart_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM marketplace_order WHERE cart_id = ?")
                .bind(flow.cart_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "DELETE FROM negotiation WHERE quotation_id IN
                     (SELECT id FROM quotation WHERE cart_id = ?)",
            )
            .bind(flow.cart_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM cart WHERE id = ?").bind(flow.cart_id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedFlowContract {
    flow_type: &'static str,
    cart_id: &'static str,
    expected_status: CanonicalStatus,
    expected_item_count: usize,
    description: &'static str,
}

impl SeedFlowContract {
    fn cart_label(&self) -> &'static str {
        match self.flow_type {
            "inventory_validation" => "cart-validation-exists",
            "negotiation" => "cart-negotiation-exists",
            _ => "cart-payment-exists",
        }
    }

    fn item_count_label(&self) -> &'static str {
        match self.flow_type {
            "inventory_validation" => "cart-validation-item-count",
            "negotiation" => "cart-negotiation-item-count",
            _ => "cart-payment-item-count",
        }
    }

    fn status_label(&self) -> &'static str {
        match self.flow_type {
            "inventory_validation" => "cart-validation-status",
            "negotiation" => "cart-negotiation-status",
            _ => "cart-payment-status",
        }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub flows_seeded: Vec<FlowSeedInfo>,
}

#[derive(Debug)]
pub struct FlowSeedInfo {
    pub flow_type: &'static str,
    pub cart_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

fn seed_error(error: NegotiationError) -> RepositoryError {
    RepositoryError::Decode(format!("seed negotiation invalid: {error}"))
}

fn domain_seed_error(error: DomainError) -> RepositoryError {
    RepositoryError::Decode(format!("seed record invalid: {error}"))
}

fn seed_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().unwrap_or_else(Utc::now)
}

fn seed_item_id(prefix: &str, index: u32) -> CartItemId {
    CartItemId(format!("ci-{prefix}-{index:03}"))
}

fn internal_item(id: CartItemId, sku: &str, category: &str, quantity: u32) -> CartItem {
    CartItem {
        id,
        quantity,
        customization_note: None,
        catalog_ref: CatalogRef {
            source: CatalogSource::Internal,
            reference: sku.to_string(),
            sku: Some(sku.to_string()),
            category: Some(category.to_string()),
        },
        validation: None,
    }
}

fn validation_cart(base: DateTime<Utc>) -> Cart {
    let mut pendant = internal_item(seed_item_id("val", 3), "PEND-404", "pendants", 2);
    pendant.customization_note = Some("Engrave initials on the back".to_string());
    Cart {
        id: CartId("cart-validation-001".to_string()),
        buyer_id: "buyer-lumen".to_string(),
        status: CartStatus::Submitted,
        items: vec![
            internal_item(seed_item_id("val", 1), "RING-001", "rings", 10),
            internal_item(seed_item_id("val", 2), "EAR-010", "earrings", 5),
            pendant,
        ],
        assigned_sales_id: None,
        created_at: base,
        updated_at: base + Duration::hours(1),
    }
}

fn quoted_cart(cart_id: &str, prefix: &str, base: DateTime<Utc>) -> Cart {
    Cart {
        id: CartId(cart_id.to_string()),
        buyer_id: "buyer-aurora".to_string(),
        status: CartStatus::Quoted,
        items: vec![
            internal_item(seed_item_id(prefix, 1), "RING-001", "rings", 2),
            internal_item(seed_item_id(prefix, 2), "EAR-010", "earrings", 4),
        ],
        assigned_sales_id: Some("sales-kiran".to_string()),
        created_at: base,
        updated_at: base + Duration::hours(24),
    }
}

/// Two lines: 2 x 120.00 + 4 x 55.00 = 460.00.
fn sent_quotation(id: &str, cart_id: &str, prefix: &str, base: DateTime<Utc>) -> Quotation {
    let mut quotation = Quotation {
        id: QuotationId(id.to_string()),
        cart_id: CartId(cart_id.to_string()),
        status: QuotationStatus::Draft,
        items: vec![
            QuotationItem::new(seed_item_id(prefix, 1), Decimal::new(12000, 2), 2),
            QuotationItem::new(seed_item_id(prefix, 2), Decimal::new(5500, 2), 4),
        ],
        total: Decimal::new(46000, 2),
        is_final_offer: false,
        sent_at: None,
        expires_at: None,
        rejection_reason: None,
        created_by: "sales-kiran".to_string(),
        created_at: base + Duration::hours(24),
        updated_at: None,
    };
    quotation.status = QuotationStatus::Sent;
    quotation.sent_at = Some(base + Duration::hours(25));
    quotation.expires_at = Some(base + Duration::hours(25) + Duration::days(30));
    quotation.updated_at = quotation.sent_at;
    quotation
}

fn seed_stock() -> Vec<InventoryStock> {
    vec![
        InventoryStock {
            sku: "RING-001".to_string(),
            location: "mumbai-vault".to_string(),
            available_quantity: 12,
            unit_cost: Some(Decimal::new(4250, 2)),
            lead_time_days: Some(3),
        },
        InventoryStock {
            sku: "EAR-010".to_string(),
            location: "jaipur-vault".to_string(),
            available_quantity: 3,
            unit_cost: Some(Decimal::new(1800, 2)),
            lead_time_days: Some(5),
        },
    ]
}

fn seed_sourcing() -> Vec<SourcingOption> {
    vec![SourcingOption {
        kind: SourcingKind::Manufacturer,
        reference: "MFG-EAR-010".to_string(),
        sku: Some("EAR-010".to_string()),
        category: Some("earrings".to_string()),
        min_unit_cost: Some(Decimal::new(1500, 2)),
        max_unit_cost: Some(Decimal::new(2200, 2)),
        lead_time_days: Some(21),
        manufacturer: Some(sample_manufacturer("mfg-surat-01")),
    }]
}

pub fn sample_manufacturer(manufacturer_id: &str) -> ManufacturerContact {
    ManufacturerContact {
        manufacturer_id: manufacturer_id.to_string(),
        company: "Surat Fine Castings".to_string(),
        contact_person: Some("Devika Shah".to_string()),
        email: Some("orders@suratcastings.example".to_string()),
        phone: Some("+91-261-555-0142".to_string()),
        location: Some("Surat, IN".to_string()),
        minimum_order_value: Some(Decimal::new(500, 0)),
        average_lead_time_days: Some(21),
        verified: true,
    }
}

/// A pending order on quotation prices with an explicit pending ops check.
pub fn sample_order(order_id: &str, cart_id: &str, quotation_id: &str, total: Decimal) -> Order {
    let created_at = seed_epoch();
    let quotation = Quotation {
        id: QuotationId(quotation_id.to_string()),
        cart_id: CartId(cart_id.to_string()),
        status: QuotationStatus::Accepted,
        items: vec![QuotationItem::new(CartItemId("ci-1".to_string()), total, 1)],
        total,
        is_final_offer: false,
        sent_at: Some(created_at),
        expires_at: None,
        rejection_reason: None,
        created_by: "sales-1".to_string(),
        created_at,
        updated_at: Some(created_at),
    };
    let mut order = effective_terms(&quotation, None).into_order(
        OrderId(order_id.to_string()),
        &quotation,
        None,
        created_at,
    );
    order.ops_final_check.status = None;
    order
}

/// Minimal parent row for tests that need a cart foreign key.
pub async fn insert_cart_row(pool: &DbPool, cart_id: &str) -> Result<(), RepositoryError> {
    let at = seed_epoch().to_rfc3339();
    sqlx::query(
        "INSERT INTO cart (id, buyer_id, status, created_at, updated_at)
         VALUES (?, 'buyer-test', 'submitted', ?, ?)",
    )
    .bind(cart_id)
    .bind(&at)
    .bind(&at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Minimal parent row for tests that need a quotation foreign key.
pub async fn insert_quotation_row(
    pool: &DbPool,
    quotation_id: &str,
    cart_id: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation (id, cart_id, status, items_json, total, created_by, created_at)
         VALUES (?, ?, 'accepted', '[]', '0', 'sales-test', ?)",
    )
    .bind(quotation_id)
    .bind(cart_id)
    .bind(seed_epoch().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
