use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gemsource_core::domain::cart::CartId;
use gemsource_core::domain::quotation::{Quotation, QuotationId, QuotationItem, QuotationStatus};

use super::codec::{
    format_optional_timestamp, from_json, parse_decimal, parse_enum, parse_optional_timestamp,
    parse_timestamp, to_json,
};
use super::{QuotationRepository, RepositoryError};
use crate::DbPool;

const QUOTATION_COLUMNS: &str = "id, cart_id, status, items_json, total, is_final_offer, sent_at,
     expires_at, rejection_reason, created_by, created_at, updated_at";

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(quotation_from_row).transpose()
    }

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Quotation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotation WHERE cart_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(quotation_from_row).collect()
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let items_json = to_json("items_json", &quotation.items)?;

        sqlx::query(
            "INSERT INTO quotation (id, cart_id, status, items_json, total, is_final_offer, sent_at,
                                    expires_at, rejection_reason, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 is_final_offer = excluded.is_final_offer,
                 sent_at = excluded.sent_at,
                 expires_at = excluded.expires_at,
                 rejection_reason = excluded.rejection_reason,
                 updated_at = excluded.updated_at",
        )
        .bind(&quotation.id.0)
        .bind(&quotation.cart_id.0)
        .bind(quotation.status.as_str())
        .bind(items_json)
        .bind(quotation.total.to_string())
        .bind(i64::from(quotation.is_final_offer))
        .bind(format_optional_timestamp(quotation.sent_at))
        .bind(format_optional_timestamp(quotation.expires_at))
        .bind(&quotation.rejection_reason)
        .bind(&quotation.created_by)
        .bind(quotation.created_at.to_rfc3339())
        .bind(format_optional_timestamp(quotation.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn quotation_from_row(row: &SqliteRow) -> Result<Quotation, RepositoryError> {
    let status: String = row.try_get("status")?;
    let items_json: String = row.try_get("items_json")?;
    let total: String = row.try_get("total")?;
    let items: Vec<QuotationItem> = from_json("items_json", &items_json)?;

    Ok(Quotation {
        id: QuotationId(row.try_get("id")?),
        cart_id: CartId(row.try_get("cart_id")?),
        status: parse_enum("status", &status, QuotationStatus::parse)?,
        items,
        total: parse_decimal("total", &total)?,
        is_final_offer: row.try_get::<i64, _>("is_final_offer")? != 0,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        expires_at: parse_optional_timestamp("expires_at", row.try_get("expires_at")?)?,
        rejection_reason: row.try_get("rejection_reason")?,
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_optional_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use gemsource_core::domain::cart::{CartId, CartItemId};
    use gemsource_core::domain::quotation::{
        Quotation, QuotationId, QuotationItem, QuotationStatus,
    };

    use super::SqlQuotationRepository;
    use crate::fixtures::insert_cart_row;
    use crate::repositories::QuotationRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        insert_cart_row(&pool, "cart-1").await.expect("parent cart");
        pool
    }

    fn quotation(id: &str) -> Quotation {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp");
        Quotation::new_draft(
            QuotationId(id.to_string()),
            CartId("cart-1".to_string()),
            vec![
                QuotationItem::new(CartItemId("ci-1".to_string()), Decimal::new(5000, 2), 4),
                QuotationItem::new(CartItemId("ci-2".to_string()), Decimal::new(12000, 2), 2),
            ],
            "sales-1",
            at,
        )
        .expect("valid quotation")
    }

    #[tokio::test]
    async fn save_and_find_round_trips_decimal_lines() {
        let repo = SqlQuotationRepository::new(setup().await);
        let quotation = quotation("quo-1");

        repo.save(quotation.clone()).await.expect("save");
        let found = repo.find_by_id(&quotation.id).await.expect("find").expect("exists");

        assert_eq!(found, quotation);
        assert_eq!(found.total, Decimal::new(44000, 2));
    }

    #[tokio::test]
    async fn save_updates_status_and_send_window() {
        let repo = SqlQuotationRepository::new(setup().await);
        let mut quotation = quotation("quo-1");
        repo.save(quotation.clone()).await.expect("save");

        let sent_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp");
        quotation.send(sent_at, Duration::days(7)).expect("send");
        repo.save(quotation.clone()).await.expect("update");

        let found = repo.find_by_id(&quotation.id).await.expect("find").expect("exists");
        assert_eq!(found.status, QuotationStatus::Sent);
        assert_eq!(found.expires_at, Some(sent_at + Duration::days(7)));
    }

    #[tokio::test]
    async fn list_for_cart_returns_every_quotation() {
        let repo = SqlQuotationRepository::new(setup().await);
        repo.save(quotation("quo-1")).await.expect("save first");
        repo.save(quotation("quo-2")).await.expect("save second");

        let listed =
            repo.list_for_cart(&CartId("cart-1".to_string())).await.expect("list quotations");
        let ids: Vec<_> = listed.iter().map(|quotation| quotation.id.0.as_str()).collect();

        assert_eq!(ids, vec!["quo-1", "quo-2"]);
    }
}
