use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::entities::{event, folder, order, order_item, photo, OrderStatus};
use crate::errors::ServiceError;

/// Persistence used by the checkout orchestrator
#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    async fn find_published_folder_by_token(
        &self,
        token: &str,
    ) -> Result<Option<folder::Model>, ServiceError>;

    async fn find_event(&self, event_id: Uuid) -> Result<Option<event::Model>, ServiceError>;

    /// Photos among `photo_ids` that exist; missing ids are simply absent.
    async fn find_photos(&self, photo_ids: &[Uuid]) -> Result<Vec<photo::Model>, ServiceError>;

    async fn insert_order(&self, order: order::Model) -> Result<order::Model, ServiceError>;

    async fn insert_order_items(&self, items: Vec<order_item::Model>) -> Result<(), ServiceError>;

    async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError>;

    /// Stores an order together with its items, or neither.
    ///
    /// The provided implementation inserts the order, then the items, and
    /// deletes the order again when the items fail. This is weaker than a
    /// transaction: a crash between the two writes can leave an orphaned
    /// order. Backends with transactions should override it.
    async fn persist_order(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<order::Model, ServiceError> {
        let saved = self.insert_order(order).await?;
        if let Err(err) = self.insert_order_items(items).await {
            error!(order_id = %saved.id, error = %err, "Order item insert failed; deleting order");
            if let Err(cleanup) = self.delete_order(saved.id).await {
                error!(order_id = %saved.id, error = %cleanup, "Compensating order delete failed");
            }
            return Err(err);
        }
        Ok(saved)
    }

    /// Bumps the folder view counter and last-viewed timestamp.
    async fn touch_folder(&self, folder_id: Uuid) -> Result<(), ServiceError>;

    async fn attach_preference(
        &self,
        order_id: Uuid,
        preference_id: &str,
        external_reference: &str,
    ) -> Result<(), ServiceError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError>;

    async fn find_order_items(&self, order_id: Uuid)
        -> Result<Vec<order_item::Model>, ServiceError>;

    /// Cancels pending orders created before `before` that never received a
    /// payment preference. Returns the number of orders cancelled.
    async fn cancel_stale_pending_orders(&self, before: DateTime<Utc>)
        -> Result<u64, ServiceError>;
}

/// Checkout persistence over SeaORM
#[derive(Clone)]
pub struct SeaOrmCheckoutRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCheckoutRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn order_active_model(order: order::Model) -> order::ActiveModel {
    order::ActiveModel {
        id: Set(order.id),
        order_number: Set(order.order_number),
        folder_id: Set(order.folder_id),
        event_id: Set(order.event_id),
        contact_info: Set(order.contact_info),
        total_cents: Set(order.total_cents),
        currency: Set(order.currency),
        status: Set(order.status),
        payment_method: Set(order.payment_method),
        preference_id: Set(order.preference_id),
        external_reference: Set(order.external_reference),
        metadata: Set(order.metadata),
        created_at: Set(order.created_at),
        updated_at: Set(order.updated_at),
    }
}

fn item_active_model(item: order_item::Model) -> order_item::ActiveModel {
    order_item::ActiveModel {
        id: Set(item.id),
        order_id: Set(item.order_id),
        photo_id: Set(item.photo_id),
        quantity: Set(item.quantity),
        unit_price_cents: Set(item.unit_price_cents),
        subtotal_cents: Set(item.subtotal_cents),
        price_list_item_id: Set(item.price_list_item_id),
    }
}

#[async_trait]
impl CheckoutRepository for SeaOrmCheckoutRepository {
    async fn find_published_folder_by_token(
        &self,
        token: &str,
    ) -> Result<Option<folder::Model>, ServiceError> {
        Ok(folder::Entity::find()
            .filter(folder::Column::ShareToken.eq(token))
            .filter(folder::Column::IsPublished.eq(true))
            .one(&*self.db)
            .await?)
    }

    async fn find_event(&self, event_id: Uuid) -> Result<Option<event::Model>, ServiceError> {
        Ok(event::Entity::find_by_id(event_id).one(&*self.db).await?)
    }

    async fn find_photos(&self, photo_ids: &[Uuid]) -> Result<Vec<photo::Model>, ServiceError> {
        if photo_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(photo::Entity::find()
            .filter(photo::Column::Id.is_in(photo_ids.iter().copied()))
            .all(&*self.db)
            .await?)
    }

    async fn insert_order(&self, order: order::Model) -> Result<order::Model, ServiceError> {
        Ok(order_active_model(order).insert(&*self.db).await?)
    }

    async fn insert_order_items(&self, items: Vec<order_item::Model>) -> Result<(), ServiceError> {
        if items.is_empty() {
            return Ok(());
        }
        order_item::Entity::insert_many(items.into_iter().map(item_active_model))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&*self.db)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&*self.db).await?;
        Ok(())
    }

    #[instrument(skip(self, order, items), fields(order_id = %order.id, items = items.len()))]
    async fn persist_order(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let saved = order_active_model(order).insert(&txn).await?;
        if !items.is_empty() {
            order_item::Entity::insert_many(items.into_iter().map(item_active_model))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(saved)
    }

    async fn touch_folder(&self, folder_id: Uuid) -> Result<(), ServiceError> {
        let result = folder::Entity::update_many()
            .col_expr(
                folder::Column::ViewCount,
                Expr::col(folder::Column::ViewCount).add(1),
            )
            .col_expr(folder::Column::LastViewedAt, Expr::value(Utc::now()))
            .filter(folder::Column::Id.eq(folder_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            warn!(%folder_id, "Folder touch matched no rows");
        }
        Ok(())
    }

    async fn attach_preference(
        &self,
        order_id: Uuid,
        preference_id: &str,
        external_reference: &str,
    ) -> Result<(), ServiceError> {
        let existing = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut update: order::ActiveModel = existing.into();
        update.preference_id = Set(Some(preference_id.to_string()));
        update.external_reference = Set(Some(external_reference.to_string()));
        update.updated_at = Set(Utc::now());
        update.update(&*self.db).await?;
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(order_id).one(&*self.db).await?)
    }

    async fn find_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn cancel_stale_pending_orders(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.into_value()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PreferenceId.is_null())
            .filter(order::Column::CreatedAt.lt(before))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
