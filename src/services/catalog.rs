use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entities::{event, price_list_item};
use crate::errors::ServiceError;

/// Authoritative price of one purchasable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPriceItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub item_type: String,
    pub label: String,
    pub price_cents: i64,
}

/// Event-scoped price list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub items: Vec<CatalogPriceItem>,
    pub currency: String,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<&CatalogPriceItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn find_by_type(&self, item_type: &str) -> Option<&CatalogPriceItem> {
        self.items.iter().find(|item| item.item_type == item_type)
    }

    /// The only entry of a single-item catalog.
    pub fn single(&self) -> Option<&CatalogPriceItem> {
        match self.items.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Resolves the authoritative catalog for an event.
///
/// "No pricing configured" is `Ok(None)` (or an empty catalog), never an error.
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    async fn get_catalog_for_event(&self, event_id: Uuid) -> Result<Option<Catalog>, ServiceError>;
}

/// Catalog read from the `price_list_items` table
#[derive(Clone)]
pub struct DbCatalogResolver {
    db: Arc<DatabaseConnection>,
    default_currency: String,
}

impl DbCatalogResolver {
    pub fn new(db: Arc<DatabaseConnection>, default_currency: impl Into<String>) -> Self {
        Self {
            db,
            default_currency: default_currency.into(),
        }
    }
}

#[async_trait]
impl CatalogResolver for DbCatalogResolver {
    async fn get_catalog_for_event(&self, event_id: Uuid) -> Result<Option<Catalog>, ServiceError> {
        let Some(event) = event::Entity::find_by_id(event_id).one(&*self.db).await? else {
            return Ok(None);
        };

        let rows = price_list_item::Entity::find()
            .filter(price_list_item::Column::EventId.eq(event_id))
            .filter(price_list_item::Column::IsActive.eq(true))
            .order_by_asc(price_list_item::Column::SortOrder)
            .all(&*self.db)
            .await?;

        debug!(%event_id, entries = rows.len(), "Loaded catalog");
        if rows.is_empty() {
            return Ok(None);
        }

        Ok(Some(Catalog {
            items: rows
                .into_iter()
                .map(|row| CatalogPriceItem {
                    id: row.id,
                    item_type: row.item_type,
                    label: row.label,
                    price_cents: row.price_cents,
                })
                .collect(),
            currency: event
                .currency
                .unwrap_or_else(|| self.default_currency.clone()),
        }))
    }
}
