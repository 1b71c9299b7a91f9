use crate::{
    entities::{
        cart_item::{self, Entity as CartItem},
        product::{Entity as Product, ProductStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// A cart line joined with its live product for display.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_subtotal: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub user_id: Uuid,
    pub lines: Vec<CartLineView>,
    pub subtotal: Decimal,
}

/// Cart line management for a user.
///
/// The cart is mutable right up until checkout; the totals shown here are
/// display-only and computed from live prices. The authoritative amounts
/// are frozen by the checkout service when the order is assembled.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Adds a product to the user's cart, incrementing the quantity when a
    /// line for it already exists.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(input.product_id.to_string()))?;

        if product.status == ProductStatus::Discontinued {
            return Err(ServiceError::InvalidOperation(format!(
                "Product '{}' has been discontinued",
                product.name
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        let line = if let Some(item) = existing {
            let new_quantity = item.quantity + input.quantity;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(new_quantity);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?
        } else {
            let now = Utc::now();
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                product_id: Set(input.product_id),
                quantity: Set(input.quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?
        };

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                user_id,
                product_id: input.product_id,
            })
            .await;

        info!(%user_id, product_id = %input.product_id, "Added item to cart");
        Ok(line)
    }

    /// Sets the quantity of a cart line; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let line = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No cart line for product {}", product_id))
            })?;

        if quantity <= 0 {
            line.delete(&*self.db).await?;
        } else {
            let mut active: cart_item::ActiveModel = line.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
        }

        Ok(())
    }

    /// Removes a product from the user's cart.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let deleted = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "No cart line for product {}",
                product_id
            )));
        }

        Ok(())
    }

    /// Returns the user's cart joined with live product names and prices.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let lines = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        for (line, product) in lines {
            let product = product.ok_or_else(|| {
                ServiceError::ProductNotFound(line.product_id.to_string())
            })?;
            let line_subtotal = product.price * Decimal::from(line.quantity);
            subtotal += line_subtotal;
            views.push(CartLineView {
                product_id: line.product_id,
                product_name: product.name,
                unit_price: product.price,
                quantity: line.quantity,
                line_subtotal,
            });
        }

        Ok(CartView {
            user_id,
            lines: views,
            subtotal,
        })
    }

    /// Empties the user's cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        Self::clear_snapshot(&*self.db, user_id).await?;

        self.event_sender
            .send_or_log(Event::CartCleared { user_id })
            .await;
        Ok(())
    }

    /// Deletes the user's cart lines inside the caller's transaction. The
    /// checkout service calls this after the order rows are written so the
    /// clearing is atomic with the rest of the assembly.
    pub async fn clear_snapshot<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Loads the user's cart lines inside the caller's transaction. This is
    /// the snapshot the checkout service assembles an order from.
    pub async fn load_snapshot<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        let lines = CartItem::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(conn)
            .await?;
        Ok(lines)
    }
}
