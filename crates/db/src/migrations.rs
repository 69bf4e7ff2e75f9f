use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "cart",
        "cart_item",
        "quotation",
        "negotiation",
        "negotiation_round",
        "marketplace_order",
        "payment",
        "inventory_stock",
        "sourcing_option",
        "payment_reconciliation_marker",
        "idx_cart_item_cart_id",
        "idx_quotation_cart_id",
        "idx_marketplace_order_cart_id",
        "idx_payment_order_id",
        "idx_sourcing_option_sku",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in [
            "cart",
            "cart_item",
            "quotation",
            "negotiation",
            "negotiation_round",
            "marketplace_order",
            "payment",
            "inventory_stock",
            "sourcing_option",
            "payment_reconciliation_marker",
        ] {
            assert_eq!(table_count(&pool, table).await, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "cart").await, 0);
        assert_eq!(table_count(&pool, "payment_reconciliation_marker").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    #[tokio::test]
    async fn duplicate_gateway_reference_is_rejected_per_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO cart (id, buyer_id, status, created_at, updated_at)
             VALUES ('cart-1', 'buyer-1', 'quoted', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert cart");
        sqlx::query(
            "INSERT INTO quotation (id, cart_id, status, items_json, total, created_by, created_at)
             VALUES ('quo-1', 'cart-1', 'accepted', '[]', '10', 'sales-1', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert quotation");
        sqlx::query(
            "INSERT INTO marketplace_order (id, cart_id, quotation_id, basis_json, status, lines_json,
                                            total_amount, paid_amount, created_at, updated_at)
             VALUES ('ord-1', 'cart-1', 'quo-1', '{\"kind\":\"quotation\"}', 'pending', '[]',
                     '10', '0', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert order");

        let insert_payment = |id: &'static str| {
            sqlx::query(
                "INSERT INTO payment (id, order_id, amount, method, status, gateway_reference, created_at)
                 VALUES (?, 'ord-1', '10', 'card', 'completed', 'pi_123', '2026-01-01T00:00:00Z')",
            )
            .bind(id)
        };

        insert_payment("pay-1").execute(&pool).await.expect("first payment");
        let duplicate = insert_payment("pay-2").execute(&pool).await;

        assert!(duplicate.is_err(), "a gateway reference may only be booked once per order");
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
