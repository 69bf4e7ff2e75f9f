use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartId(pub String);

impl fmt::Display for CartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartItemId(pub String);

impl fmt::Display for CartItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Draft,
    Submitted,
    UnderReview,
    Quoted,
    Closed,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Quoted => "quoted",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "under_review" => Some(Self::UnderReview),
            "quoted" => Some(Self::Quoted),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Where a recommended catalog entry comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Internal,
    Manufacturer,
    Marketplace,
}

impl CatalogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Manufacturer => "manufacturer",
            Self::Marketplace => "marketplace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "internal" => Some(Self::Internal),
            "manufacturer" => Some(Self::Manufacturer),
            "marketplace" => Some(Self::Marketplace),
            _ => None,
        }
    }
}

/// The recommendation a cart line was created from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRef {
    pub source: CatalogSource,
    /// SKU for internal entries, listing/product reference for external ones.
    pub reference: String,
    pub sku: Option<String>,
    pub category: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    FullyAvailable,
    PartiallyAvailable,
    NeedsExternalManufacturer,
    Unavailable,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyAvailable => "fully_available",
            Self::PartiallyAvailable => "partially_available",
            Self::NeedsExternalManufacturer => "needs_external_manufacturer",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fully_available" => Some(Self::FullyAvailable),
            "partially_available" => Some(Self::PartiallyAvailable),
            "needs_external_manufacturer" => Some(Self::NeedsExternalManufacturer),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// Validation outcome persisted onto a cart line by ops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemValidation {
    pub status: AvailabilityStatus,
    pub available_source: Option<String>,
    pub available_quantity: u32,
    pub validated_by: String,
    pub validated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub quantity: u32,
    pub customization_note: Option<String>,
    pub catalog_ref: CatalogRef,
    pub validation: Option<ItemValidation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub buyer_id: String,
    pub status: CartStatus,
    pub items: Vec<CartItem>,
    pub assigned_sales_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn can_transition_to(&self, next: CartStatus) -> bool {
        matches!(
            (self.status, next),
            (CartStatus::Draft, CartStatus::Submitted)
                | (CartStatus::Submitted, CartStatus::UnderReview)
                | (CartStatus::Submitted, CartStatus::Quoted)
                | (CartStatus::UnderReview, CartStatus::Quoted)
                | (CartStatus::Quoted, CartStatus::UnderReview)
                | (CartStatus::Draft, CartStatus::Closed)
                | (CartStatus::Submitted, CartStatus::Closed)
                | (CartStatus::UnderReview, CartStatus::Closed)
                | (CartStatus::Quoted, CartStatus::Closed)
        )
    }

    pub fn transition_to(&mut self, next: CartStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidCartTransition { from: self.status, to: next })
    }

    pub fn is_editable_by_buyer(&self) -> bool {
        self.status == CartStatus::Draft
    }

    pub fn item(&self, id: &CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn add_item(&mut self, item: CartItem) -> Result<(), DomainError> {
        self.ensure_editable()?;
        if item.quantity == 0 {
            return Err(DomainError::InvariantViolation(format!(
                "cart item `{}` must have quantity of at least 1",
                item.id
            )));
        }
        if self.item(&item.id).is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "cart item `{}` already exists in cart `{}`",
                item.id, self.id
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Buyer edit of quantity and customization note. Only allowed while drafting.
    pub fn update_item(
        &mut self,
        id: &CartItemId,
        quantity: u32,
        customization_note: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_editable()?;
        if quantity == 0 {
            return Err(DomainError::InvariantViolation(format!(
                "cart item `{id}` must have quantity of at least 1"
            )));
        }

        let cart_id = self.id.clone();
        let item = self.items.iter_mut().find(|item| &item.id == id).ok_or_else(|| {
            DomainError::InvariantViolation(format!("cart item `{id}` is not part of `{cart_id}`"))
        })?;
        item.quantity = quantity;
        item.customization_note = customization_note;
        Ok(())
    }

    pub fn remove_item(&mut self, id: &CartItemId) -> Result<(), DomainError> {
        self.ensure_editable()?;
        let before = self.items.len();
        self.items.retain(|item| &item.id != id);
        if self.items.len() == before {
            return Err(DomainError::InvariantViolation(format!(
                "cart item `{id}` is not part of `{}`",
                self.id
            )));
        }
        Ok(())
    }

    /// Gate used before quoting and forwarding: every line carries a validation outcome.
    pub fn all_items_validated(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| item.validation.is_some())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.is_editable_by_buyer() {
            Ok(())
        } else {
            Err(DomainError::CartLocked { cart_id: self.id.clone(), status: self.status })
        }
    }
}
