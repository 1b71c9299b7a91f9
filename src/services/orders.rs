use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        order_item::{self, Entity as OrderItem},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::InventoryService,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order lifecycle management.
///
/// Status changes are validated against the transition table on
/// `OrderStatus`; any transition into `Cancelled`, and any deletion of an
/// order that has not already been cancelled, releases the stock recorded
/// on the order lines atomically with the write.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    inventory: Arc<InventoryService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        inventory: Arc<InventoryService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            inventory,
        }
    }

    /// Retrieves an order by id.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let order = Order::find_by_id(order_id).one(&*self.db).await?;
        Ok(order)
    }

    /// Retrieves an order by its order number.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?;
        Ok(order)
    }

    /// Retrieves the frozen lines of an order.
    #[instrument(skip(self))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(items)
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Lists a user's orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Applies a lifecycle transition (admin path).
    ///
    /// A transition into `Cancelled` releases every line's recorded stock
    /// in the same transaction as the status write.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            warn!(%order_id, %old_status, %new_status, "Rejected order status transition");
            return Err(ServiceError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        let mut released = Vec::new();
        if new_status == OrderStatus::Cancelled {
            released = self.release_order_stock(&txn, order_id).await?;
        }

        let user_id = order.user_id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(%order_id, %old_status, %new_status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        if new_status == OrderStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled { order_id, user_id })
                .await;
        }
        self.emit_released(&released).await;

        Ok(updated)
    }

    /// Cancels an order on behalf of the user who placed it.
    ///
    /// Only pending orders can be cancelled through this path; once the
    /// order is being processed or has shipped, the request is refused.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let released = self.release_order_stock(&txn, order_id).await?;

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(%order_id, %user_id, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id, user_id })
            .await;
        self.emit_released(&released).await;

        Ok(updated)
    }

    /// Deletes an order (admin path), reversing its stock effect first
    /// unless the order was already cancelled. The guard keeps stock from
    /// ever being credited twice for the same order.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut released = Vec::new();
        if order.status != OrderStatus::Cancelled {
            released = self.release_order_stock(&txn, order_id).await?;
        }

        OrderItem::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order.delete(&txn).await?;

        txn.commit().await?;

        info!(%order_id, "Order deleted");
        self.event_sender
            .send_or_log(Event::OrderDeleted { order_id })
            .await;
        self.emit_released(&released).await;

        Ok(())
    }

    /// Releases every line's recorded quantity back to stock, inside the
    /// caller's transaction. Quantities come from the order lines, never
    /// from the caller. Returns the (product, quantity) pairs released so
    /// events can go out after the commit.
    async fn release_order_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, ServiceError> {
        let lines = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        let mut released = Vec::with_capacity(lines.len());
        for line in &lines {
            self.inventory
                .release(conn, line.product_id, line.quantity)
                .await?;
            released.push((line.product_id, line.quantity));
        }

        Ok(released)
    }

    async fn emit_released(&self, released: &[(Uuid, i32)]) {
        for (product_id, quantity) in released {
            self.event_sender
                .send_or_log(Event::StockReleased {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .await;
        }
    }
}
