use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stock held in one internal location for one SKU.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStock {
    pub sku: String,
    pub location: String,
    pub available_quantity: u32,
    pub unit_cost: Option<Decimal>,
    pub lead_time_days: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerContact {
    pub manufacturer_id: String,
    pub company: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub minimum_order_value: Option<Decimal>,
    pub average_lead_time_days: Option<u32>,
    pub verified: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcingKind {
    Manufacturer,
    Marketplace,
}

impl SourcingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manufacturer => "manufacturer",
            Self::Marketplace => "marketplace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manufacturer" => Some(Self::Manufacturer),
            "marketplace" => Some(Self::Marketplace),
            _ => None,
        }
    }
}

/// An external way to produce or buy an item: a manufacturer catalog entry or a
/// marketplace listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcingOption {
    pub kind: SourcingKind,
    pub reference: String,
    pub sku: Option<String>,
    pub category: Option<String>,
    pub min_unit_cost: Option<Decimal>,
    pub max_unit_cost: Option<Decimal>,
    pub lead_time_days: Option<u32>,
    pub manufacturer: Option<ManufacturerContact>,
}

/// Snapshot of every source the validator may draw from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCatalog {
    pub stock: Vec<InventoryStock>,
    pub sourcing: Vec<SourcingOption>,
}

impl InventoryCatalog {
    pub fn new(stock: Vec<InventoryStock>, sourcing: Vec<SourcingOption>) -> Self {
        Self { stock, sourcing }
    }

    pub fn stock_for_sku<'a>(&'a self, sku: &'a str) -> impl Iterator<Item = &'a InventoryStock> {
        self.stock.iter().filter(move |record| record.sku.eq_ignore_ascii_case(sku))
    }
}
