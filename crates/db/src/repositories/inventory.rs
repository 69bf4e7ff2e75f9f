use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gemsource_core::domain::inventory::{
    InventoryCatalog, InventoryStock, ManufacturerContact, SourcingKind, SourcingOption,
};

use super::codec::{
    from_json, parse_enum, parse_optional_decimal, parse_optional_u32, parse_u32, to_json,
};
use super::{InventoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInventoryRepository {
    pool: DbPool,
}

impl SqlInventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InventoryRepository for SqlInventoryRepository {
    async fn load_catalog(&self) -> Result<InventoryCatalog, RepositoryError> {
        let stock_rows = sqlx::query(
            "SELECT sku, location, available_quantity, unit_cost, lead_time_days
             FROM inventory_stock ORDER BY sku ASC, location ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let sourcing_rows = sqlx::query(
            "SELECT kind, reference, sku, category, min_unit_cost, max_unit_cost, lead_time_days,
                    manufacturer_json
             FROM sourcing_option ORDER BY kind ASC, reference ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let stock = stock_rows.iter().map(stock_from_row).collect::<Result<Vec<_>, _>>()?;
        let sourcing =
            sourcing_rows.iter().map(sourcing_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(InventoryCatalog::new(stock, sourcing))
    }

    async fn save_stock(&self, stock: InventoryStock) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO inventory_stock (sku, location, available_quantity, unit_cost, lead_time_days)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sku, location) DO UPDATE SET
                 available_quantity = excluded.available_quantity,
                 unit_cost = excluded.unit_cost,
                 lead_time_days = excluded.lead_time_days",
        )
        .bind(&stock.sku)
        .bind(&stock.location)
        .bind(i64::from(stock.available_quantity))
        .bind(stock.unit_cost.map(|cost| cost.to_string()))
        .bind(stock.lead_time_days.map(i64::from))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_sourcing_option(&self, option: SourcingOption) -> Result<(), RepositoryError> {
        let manufacturer_json = option
            .manufacturer
            .as_ref()
            .map(|contact| to_json("manufacturer_json", contact))
            .transpose()?;

        sqlx::query(
            "INSERT INTO sourcing_option (kind, reference, sku, category, min_unit_cost,
                                          max_unit_cost, lead_time_days, manufacturer_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(kind, reference) DO UPDATE SET
                 sku = excluded.sku,
                 category = excluded.category,
                 min_unit_cost = excluded.min_unit_cost,
                 max_unit_cost = excluded.max_unit_cost,
                 lead_time_days = excluded.lead_time_days,
                 manufacturer_json = excluded.manufacturer_json",
        )
        .bind(option.kind.as_str())
        .bind(&option.reference)
        .bind(&option.sku)
        .bind(&option.category)
        .bind(option.min_unit_cost.map(|cost| cost.to_string()))
        .bind(option.max_unit_cost.map(|cost| cost.to_string()))
        .bind(option.lead_time_days.map(i64::from))
        .bind(manufacturer_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn stock_from_row(row: &SqliteRow) -> Result<InventoryStock, RepositoryError> {
    Ok(InventoryStock {
        sku: row.try_get("sku")?,
        location: row.try_get("location")?,
        available_quantity: parse_u32("available_quantity", row.try_get("available_quantity")?)?,
        unit_cost: parse_optional_decimal("unit_cost", row.try_get("unit_cost")?)?,
        lead_time_days: parse_optional_u32("lead_time_days", row.try_get("lead_time_days")?)?,
    })
}

fn sourcing_from_row(row: &SqliteRow) -> Result<SourcingOption, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let manufacturer_json: Option<String> = row.try_get("manufacturer_json")?;
    let manufacturer = manufacturer_json
        .map(|json| from_json::<ManufacturerContact>("manufacturer_json", &json))
        .transpose()?;

    Ok(SourcingOption {
        kind: parse_enum("kind", &kind, SourcingKind::parse)?,
        reference: row.try_get("reference")?,
        sku: row.try_get("sku")?,
        category: row.try_get("category")?,
        min_unit_cost: parse_optional_decimal("min_unit_cost", row.try_get("min_unit_cost")?)?,
        max_unit_cost: parse_optional_decimal("max_unit_cost", row.try_get("max_unit_cost")?)?,
        lead_time_days: parse_optional_u32("lead_time_days", row.try_get("lead_time_days")?)?,
        manufacturer,
    })
}
