//! Inventory classification of cart lines against internal stock and external sourcing.
//!
//! Every run starts from the cart and catalog alone; a report is never merged with an earlier one.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::{
    AvailabilityStatus, Cart, CartId, CartItem, CartItemId, CatalogSource, ItemValidation,
};
use crate::domain::inventory::{InventoryCatalog, InventoryStock, ManufacturerContact, SourcingOption};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl CostRange {
    fn add(self, other: CostRange) -> CostRange {
        CostRange { min: self.min + other.min, max: self.max + other.max }
    }
}

/// The single internal location a line draws from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalAllocation {
    pub location: String,
    pub available_quantity: u32,
    pub allocated_quantity: u32,
    pub unit_cost: Option<Decimal>,
    pub lead_time_days: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSource {
    pub reference: String,
    pub kind: String,
    pub min_unit_cost: Option<Decimal>,
    pub max_unit_cost: Option<Decimal>,
    pub lead_time_days: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub cart_item_id: CartItemId,
    pub sku: Option<String>,
    pub status: AvailabilityStatus,
    pub requested_quantity: u32,
    pub available_quantity: u32,
    pub shortfall: u32,
    pub available_source: Option<String>,
    pub internal: Option<InternalAllocation>,
    pub external_sources: Vec<ExternalSource>,
    pub manufacturer_contacts: Vec<ManufacturerContact>,
    pub estimated_internal_cost: Option<Decimal>,
    pub estimated_external_cost: Option<CostRange>,
    pub lead_time_days: Option<u32>,
    /// Set when a price the line depends on is unknown.
    pub low_confidence: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_items: usize,
    pub fully_available: usize,
    pub partially_available: usize,
    pub needs_external_manufacturer: usize,
    pub unavailable: usize,
    pub total_requested: u64,
    pub total_available: u64,
    pub total_shortfall: u64,
    pub estimated_internal_cost: Option<Decimal>,
    pub estimated_external_cost: Option<CostRange>,
    pub longest_lead_time_days: Option<u32>,
    pub low_confidence_items: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub cart_id: CartId,
    pub fully_available: Vec<ValidationItem>,
    pub partially_available: Vec<ValidationItem>,
    pub needs_external_manufacturer: Vec<ValidationItem>,
    pub unavailable: Vec<ValidationItem>,
    pub summary: ValidationSummary,
}

impl ValidationReport {
    pub fn items(&self) -> impl Iterator<Item = &ValidationItem> {
        self.fully_available
            .iter()
            .chain(&self.partially_available)
            .chain(&self.needs_external_manufacturer)
            .chain(&self.unavailable)
    }

    pub fn item(&self, cart_item_id: &CartItemId) -> Option<&ValidationItem> {
        self.items().find(|item| &item.cart_item_id == cart_item_id)
    }

    /// Writes each line's outcome onto the cart, replacing whatever an earlier run left there.
    pub fn apply_to_cart(&self, cart: &mut Cart, validator_id: &str, validated_at: DateTime<Utc>) {
        for cart_item in &mut cart.items {
            cart_item.validation = self.item(&cart_item.id).map(|outcome| ItemValidation {
                status: outcome.status,
                available_source: outcome.available_source.clone(),
                available_quantity: outcome.available_quantity,
                validated_by: validator_id.to_owned(),
                validated_at,
            });
        }
        cart.updated_at = validated_at;
    }
}

pub fn validate_cart(cart: &Cart, catalog: &InventoryCatalog) -> ValidationReport {
    let mut report = ValidationReport {
        cart_id: cart.id.clone(),
        fully_available: Vec::new(),
        partially_available: Vec::new(),
        needs_external_manufacturer: Vec::new(),
        unavailable: Vec::new(),
        summary: ValidationSummary::default(),
    };

    for cart_item in &cart.items {
        let item = classify_item(cart_item, catalog);
        accumulate(&mut report.summary, &item);
        match item.status {
            AvailabilityStatus::FullyAvailable => report.fully_available.push(item),
            AvailabilityStatus::PartiallyAvailable => report.partially_available.push(item),
            AvailabilityStatus::NeedsExternalManufacturer => {
                report.needs_external_manufacturer.push(item)
            }
            AvailabilityStatus::Unavailable => report.unavailable.push(item),
        }
    }

    report
}

pub fn classify_item(cart_item: &CartItem, catalog: &InventoryCatalog) -> ValidationItem {
    let requested = cart_item.quantity;
    let sku = item_sku(cart_item);
    let best = sku.and_then(|sku| best_internal_source(catalog, sku));
    let externals: Vec<&SourcingOption> =
        catalog.sourcing.iter().filter(|option| matches_external(option, cart_item, sku)).collect();

    let available = best.map(|stock| stock.available_quantity).unwrap_or(0);
    let status = if available > 0 && available >= requested {
        AvailabilityStatus::FullyAvailable
    } else if available > 0 {
        AvailabilityStatus::PartiallyAvailable
    } else if !externals.is_empty() {
        AvailabilityStatus::NeedsExternalManufacturer
    } else {
        AvailabilityStatus::Unavailable
    };

    let allocated = available.min(requested);
    let external_quantity = match status {
        AvailabilityStatus::PartiallyAvailable | AvailabilityStatus::NeedsExternalManufacturer => {
            requested - allocated
        }
        AvailabilityStatus::FullyAvailable | AvailabilityStatus::Unavailable => 0,
    };
    let uses_external = external_quantity > 0;

    let internal = best.filter(|_| allocated > 0).map(|stock| InternalAllocation {
        location: stock.location.clone(),
        available_quantity: stock.available_quantity,
        allocated_quantity: allocated,
        unit_cost: stock.unit_cost,
        lead_time_days: stock.lead_time_days,
    });

    let mut gaps = Vec::new();
    let estimated_internal_cost = match &internal {
        Some(allocation) => match allocation.unit_cost {
            Some(cost) => Some(cost * Decimal::from(allocation.allocated_quantity)),
            None => {
                gaps.push(format!("no internal unit cost at {}", allocation.location));
                None
            }
        },
        None => None,
    };

    let estimated_external_cost = if uses_external {
        let range = external_unit_range(&externals)
            .map(|unit| CostRange {
                min: unit.min * Decimal::from(external_quantity),
                max: unit.max * Decimal::from(external_quantity),
            });
        if range.is_none() {
            gaps.push("no external cost data".to_owned());
        }
        range
    } else {
        None
    };

    let internal_lead = internal.as_ref().and_then(|allocation| allocation.lead_time_days);
    let external_lead = if uses_external {
        externals.iter().filter_map(|option| option_lead_time(option)).max()
    } else {
        None
    };
    let lead_time_days = internal_lead.into_iter().chain(external_lead).max();

    let manufacturer_contacts = if uses_external { contacts_of(&externals) } else { Vec::new() };
    let external_sources = if uses_external {
        externals
            .iter()
            .map(|option| ExternalSource {
                reference: option.reference.clone(),
                kind: option.kind.as_str().to_owned(),
                min_unit_cost: option.min_unit_cost,
                max_unit_cost: option.max_unit_cost,
                lead_time_days: option_lead_time(option),
            })
            .collect()
    } else {
        Vec::new()
    };

    let available_source = match status {
        AvailabilityStatus::FullyAvailable | AvailabilityStatus::PartiallyAvailable => {
            internal.as_ref().map(|allocation| allocation.location.clone())
        }
        AvailabilityStatus::NeedsExternalManufacturer => {
            externals.first().map(|option| option.reference.clone())
        }
        AvailabilityStatus::Unavailable => None,
    };

    ValidationItem {
        cart_item_id: cart_item.id.clone(),
        sku: sku.map(str::to_owned),
        status,
        requested_quantity: requested,
        available_quantity: allocated,
        shortfall: external_quantity,
        available_source,
        internal,
        external_sources,
        manufacturer_contacts,
        estimated_internal_cost,
        estimated_external_cost,
        lead_time_days,
        low_confidence: if gaps.is_empty() {
            None
        } else {
            Some(format!("low confidence estimate: {}", gaps.join("; ")))
        },
    }
}

fn accumulate(summary: &mut ValidationSummary, item: &ValidationItem) {
    summary.total_items += 1;
    match item.status {
        AvailabilityStatus::FullyAvailable => summary.fully_available += 1,
        AvailabilityStatus::PartiallyAvailable => summary.partially_available += 1,
        AvailabilityStatus::NeedsExternalManufacturer => summary.needs_external_manufacturer += 1,
        AvailabilityStatus::Unavailable => summary.unavailable += 1,
    }
    summary.total_requested += u64::from(item.requested_quantity);
    summary.total_available += u64::from(item.available_quantity);
    summary.total_shortfall += u64::from(item.shortfall);

    if let Some(cost) = item.estimated_internal_cost {
        summary.estimated_internal_cost =
            Some(summary.estimated_internal_cost.unwrap_or(Decimal::ZERO) + cost);
    }
    if let Some(range) = item.estimated_external_cost {
        summary.estimated_external_cost = Some(match summary.estimated_external_cost {
            Some(existing) => existing.add(range),
            None => range,
        });
    }
    summary.longest_lead_time_days = summary.longest_lead_time_days.max(item.lead_time_days);
    if item.low_confidence.is_some() {
        summary.low_confidence_items += 1;
    }
}

fn item_sku(cart_item: &CartItem) -> Option<&str> {
    cart_item.catalog_ref.sku.as_deref().or_else(|| {
        (cart_item.catalog_ref.source == CatalogSource::Internal)
            .then_some(cart_item.catalog_ref.reference.as_str())
    })
}

/// Largest single stock record; ties go to the cheaper known cost, then location name.
fn best_internal_source<'a>(catalog: &'a InventoryCatalog, sku: &'a str) -> Option<&'a InventoryStock> {
    catalog
        .stock_for_sku(sku)
        .filter(|stock| stock.available_quantity > 0)
        .min_by(|left, right| {
            right
                .available_quantity
                .cmp(&left.available_quantity)
                .then_with(|| compare_cost(left.unit_cost, right.unit_cost))
                .then_with(|| left.location.cmp(&right.location))
        })
}

fn compare_cost(left: Option<Decimal>, right: Option<Decimal>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn matches_external(option: &SourcingOption, cart_item: &CartItem, sku: Option<&str>) -> bool {
    let by_sku = match (option.sku.as_deref(), sku) {
        (Some(option_sku), Some(sku)) => option_sku.eq_ignore_ascii_case(sku),
        _ => false,
    };
    let by_reference = cart_item.catalog_ref.source != CatalogSource::Internal
        && option.reference == cart_item.catalog_ref.reference;
    let by_category = match (option.category.as_deref(), cart_item.catalog_ref.category.as_deref()) {
        (Some(option_category), Some(category)) => option_category.eq_ignore_ascii_case(category),
        _ => false,
    };
    by_sku || by_reference || by_category
}

fn option_lead_time(option: &SourcingOption) -> Option<u32> {
    option.lead_time_days.or_else(|| {
        option.manufacturer.as_ref().and_then(|manufacturer| manufacturer.average_lead_time_days)
    })
}

/// Cheapest and dearest unit cost across matching sources. A source quoting only one bound uses
/// it for both.
fn external_unit_range(options: &[&SourcingOption]) -> Option<CostRange> {
    options
        .iter()
        .filter_map(|option| match (option.min_unit_cost, option.max_unit_cost) {
            (Some(min), Some(max)) => Some(CostRange { min: min.min(max), max: min.max(max) }),
            (Some(only), None) | (None, Some(only)) => Some(CostRange { min: only, max: only }),
            (None, None) => None,
        })
        .reduce(|acc, range| CostRange { min: acc.min.min(range.min), max: acc.max.max(range.max) })
}

fn contacts_of(options: &[&SourcingOption]) -> Vec<ManufacturerContact> {
    let mut contacts: Vec<ManufacturerContact> = Vec::new();
    for contact in options.iter().filter_map(|option| option.manufacturer.as_ref()) {
        if !contacts.iter().any(|known| known.manufacturer_id == contact.manufacturer_id) {
            contacts.push(contact.clone());
        }
    }
    contacts
}
