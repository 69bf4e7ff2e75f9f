use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gemsource_core::domain::cart::{
    AvailabilityStatus, Cart, CartId, CartItem, CartItemId, CartStatus, CatalogRef,
    CatalogSource, ItemValidation,
};

use super::codec::{
    format_optional_timestamp, parse_enum, parse_optional_timestamp, parse_optional_u32,
    parse_timestamp, parse_u32,
};
use super::{CartRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCartRepository {
    pool: DbPool,
}

impl SqlCartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CartRepository for SqlCartRepository {
    async fn find_by_id(&self, id: &CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, buyer_id, status, assigned_sales_id, created_at, updated_at
             FROM cart WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            "SELECT id, quantity, customization_note, catalog_source, catalog_reference,
                    catalog_sku, catalog_category, validation_status, validation_source,
                    validation_quantity, validated_by, validated_at
             FROM cart_item WHERE cart_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let items = item_rows.iter().map(cart_item_from_row).collect::<Result<Vec<_>, _>>()?;
        cart_from_row(&row, items).map(Some)
    }

    async fn save(&self, cart: Cart) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO cart (id, buyer_id, status, assigned_sales_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 assigned_sales_id = excluded.assigned_sales_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&cart.id.0)
        .bind(&cart.buyer_id)
        .bind(cart.status.as_str())
        .bind(&cart.assigned_sales_id)
        .bind(cart.created_at.to_rfc3339())
        .bind(cart.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart_item WHERE cart_id = ?")
            .bind(&cart.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, item) in cart.items.iter().enumerate() {
            let validation = item.validation.as_ref();
            sqlx::query(
                "INSERT INTO cart_item (id, cart_id, position, quantity, customization_note,
                                        catalog_source, catalog_reference, catalog_sku,
                                        catalog_category, validation_status, validation_source,
                                        validation_quantity, validated_by, validated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&item.id.0)
            .bind(&cart.id.0)
            .bind(position as i64)
            .bind(i64::from(item.quantity))
            .bind(&item.customization_note)
            .bind(item.catalog_ref.source.as_str())
            .bind(&item.catalog_ref.reference)
            .bind(&item.catalog_ref.sku)
            .bind(&item.catalog_ref.category)
            .bind(validation.map(|validation| validation.status.as_str()))
            .bind(validation.and_then(|validation| validation.available_source.clone()))
            .bind(validation.map(|validation| i64::from(validation.available_quantity)))
            .bind(validation.map(|validation| validation.validated_by.clone()))
            .bind(format_optional_timestamp(validation.map(|validation| validation.validated_at)))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn cart_from_row(row: &SqliteRow, items: Vec<CartItem>) -> Result<Cart, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(Cart {
        id: CartId(row.try_get("id")?),
        buyer_id: row.try_get("buyer_id")?,
        status: parse_enum("status", &status, CartStatus::parse)?,
        items,
        assigned_sales_id: row.try_get("assigned_sales_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn cart_item_from_row(row: &SqliteRow) -> Result<CartItem, RepositoryError> {
    let source: String = row.try_get("catalog_source")?;
    let validation_status: Option<String> = row.try_get("validation_status")?;

    let validation = match validation_status {
        Some(status) => {
            let validated_at =
                parse_optional_timestamp("validated_at", row.try_get("validated_at")?)?
                    .ok_or_else(|| {
                        RepositoryError::Decode(
                            "cart_item has a validation status without `validated_at`".to_string(),
                        )
                    })?;
            Some(ItemValidation {
                status: parse_enum("validation_status", &status, AvailabilityStatus::parse)?,
                available_source: row.try_get("validation_source")?,
                available_quantity: parse_optional_u32(
                    "validation_quantity",
                    row.try_get("validation_quantity")?,
                )?
                .unwrap_or(0),
                validated_by: row
                    .try_get::<Option<String>, _>("validated_by")?
                    .unwrap_or_default(),
                validated_at,
            })
        }
        None => None,
    };

    Ok(CartItem {
        id: CartItemId(row.try_get("id")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        customization_note: row.try_get("customization_note")?,
        catalog_ref: CatalogRef {
            source: parse_enum("catalog_source", &source, CatalogSource::parse)?,
            reference: row.try_get("catalog_reference")?,
            sku: row.try_get("catalog_sku")?,
            category: row.try_get("catalog_category")?,
        },
        validation,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use gemsource_core::domain::cart::{
        AvailabilityStatus, Cart, CartId, CartItem, CartItemId, CartStatus, CatalogRef,
        CatalogSource, ItemValidation,
    };

    use super::SqlCartRepository;
    use crate::repositories::CartRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn item(id: &str, quantity: u32) -> CartItem {
        CartItem {
            id: CartItemId(id.to_string()),
            quantity,
            customization_note: Some("18k yellow gold".to_string()),
            catalog_ref: CatalogRef {
                source: CatalogSource::Internal,
                reference: "RING-001".to_string(),
                sku: Some("RING-001".to_string()),
                category: Some("rings".to_string()),
            },
            validation: None,
        }
    }

    fn sample_cart() -> Cart {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp");
        Cart {
            id: CartId("cart-1".to_string()),
            buyer_id: "buyer-1".to_string(),
            status: CartStatus::Draft,
            items: vec![item("ci-2", 3), item("ci-1", 1)],
            assigned_sales_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn save_and_find_preserves_item_order() {
        let repo = SqlCartRepository::new(setup().await);
        let cart = sample_cart();

        repo.save(cart.clone()).await.expect("save");
        let found = repo.find_by_id(&cart.id).await.expect("find").expect("cart exists");

        assert_eq!(found, cart);
        assert_eq!(found.items[0].id, CartItemId("ci-2".to_string()));
    }

    #[tokio::test]
    async fn save_persists_validation_and_replaces_removed_items() {
        let repo = SqlCartRepository::new(setup().await);
        let mut cart = sample_cart();
        repo.save(cart.clone()).await.expect("save");

        cart.items.truncate(1);
        cart.status = CartStatus::Submitted;
        cart.items[0].validation = Some(ItemValidation {
            status: AvailabilityStatus::PartiallyAvailable,
            available_source: Some("jaipur-vault".to_string()),
            available_quantity: 2,
            validated_by: "ops-7".to_string(),
            validated_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp"),
        });
        repo.save(cart.clone()).await.expect("update");

        let found = repo.find_by_id(&cart.id).await.expect("find").expect("cart exists");
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.status, CartStatus::Submitted);
        assert_eq!(found, cart);
    }

    #[tokio::test]
    async fn missing_cart_is_none() {
        let repo = SqlCartRepository::new(setup().await);
        let found = repo.find_by_id(&CartId("absent".to_string())).await.expect("find");
        assert!(found.is_none());
    }
}
