//! Server-side pricing of checkout items against the event catalog.
//!
//! Charged amounts always come from the catalog. A client-submitted price is
//! only checked for agreement; integer cents is the canonical unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::models::CheckoutItemRequest;
use crate::errors::CheckoutError;
use crate::services::catalog::{Catalog, CatalogPriceItem};

/// Which convention a submitted price agreed with the catalog under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMatch {
    Cents,
    /// `price == price_cents / 100`
    LegacyMajorUnits,
    /// `round(price * 100) == price_cents`
    LegacyRoundedCents,
}

impl PriceMatch {
    pub fn is_legacy(&self) -> bool {
        !matches!(self, PriceMatch::Cents)
    }
}

/// A cart line priced from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedItem {
    pub photo_id: Uuid,
    pub quantity: i32,
    pub price_list_item_id: Uuid,
    pub item_type: String,
    pub label: String,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

/// Explicit price-list id first, then price type, then the sole entry of a
/// single-item catalog.
pub fn resolve_catalog_entry<'a>(
    catalog: &'a Catalog,
    item: &CheckoutItemRequest,
) -> Option<&'a CatalogPriceItem> {
    item.price_list_item_id
        .and_then(|id| catalog.find_by_id(id))
        .or_else(|| {
            item.price_type
                .as_deref()
                .and_then(|item_type| catalog.find_by_type(item_type))
        })
        .or_else(|| catalog.single())
}

/// Checks a submitted price against the authoritative `price_cents`.
pub fn reconcile_price(
    submitted: Decimal,
    price_cents: i64,
    accept_legacy_units: bool,
) -> Option<PriceMatch> {
    if submitted == Decimal::from(price_cents) {
        return Some(PriceMatch::Cents);
    }
    if !accept_legacy_units {
        return None;
    }
    if submitted == Decimal::new(price_cents, 2) {
        return Some(PriceMatch::LegacyMajorUnits);
    }
    let rounded = submitted
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round())
        .and_then(|cents| cents.to_i64());
    if rounded == Some(price_cents) {
        return Some(PriceMatch::LegacyRoundedCents);
    }
    None
}

/// Prices every requested item, failing on the first item that cannot be
/// matched to the catalog or whose submitted price disagrees with it.
pub fn price_items(
    catalog: &Catalog,
    items: &[CheckoutItemRequest],
    accept_legacy_units: bool,
) -> Result<Vec<PricedItem>, CheckoutError> {
    items
        .iter()
        .map(|item| price_item(catalog, item, accept_legacy_units))
        .collect()
}

fn price_item(
    catalog: &Catalog,
    item: &CheckoutItemRequest,
    accept_legacy_units: bool,
) -> Result<PricedItem, CheckoutError> {
    if item.quantity < 1 {
        return Err(CheckoutError::bad_request("Invalid item quantity").with_details(json!({
            "photoId": item.photo_id,
            "quantity": item.quantity,
        })));
    }

    let entry = resolve_catalog_entry(catalog, item).ok_or_else(|| {
        CheckoutError::bad_request("Selected price option is not available for this event")
            .with_details(json!({
                "photoId": item.photo_id,
                "priceListItemId": item.price_list_item_id,
                "priceType": item.price_type,
            }))
    })?;

    if entry.price_cents <= 0 {
        return Err(
            CheckoutError::bad_request("Invalid price configured for the selected option")
                .with_details(json!({
                    "photoId": item.photo_id,
                    "priceListItemId": entry.id,
                })),
        );
    }

    if let Some(submitted) = item.price {
        match reconcile_price(submitted, entry.price_cents, accept_legacy_units) {
            Some(matched) if matched.is_legacy() => {
                warn!(
                    photo_id = %item.photo_id,
                    price_list_item_id = %entry.id,
                    convention = ?matched,
                    "Submitted price matched a legacy unit convention"
                );
            }
            Some(_) => {}
            None => {
                return Err(CheckoutError::bad_request(
                    "Submitted prices do not match the official price list",
                )
                .with_details(json!({
                    "photoId": item.photo_id,
                    "priceListItemId": entry.id,
                    "submitted": submitted.to_string(),
                    "expectedCents": entry.price_cents,
                })));
            }
        }
    }

    let subtotal_cents = entry
        .price_cents
        .checked_mul(i64::from(item.quantity))
        .ok_or_else(|| CheckoutError::bad_request("Invalid computed total"))?;

    Ok(PricedItem {
        photo_id: item.photo_id,
        quantity: item.quantity,
        price_list_item_id: entry.id,
        item_type: entry.item_type.clone(),
        label: entry.label.clone(),
        unit_price_cents: entry.price_cents,
        subtotal_cents,
    })
}

/// Sum of subtotals; `None` on overflow.
pub fn total_cents(items: &[PricedItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |acc, item| acc.checked_add(item.subtotal_cents))
}
