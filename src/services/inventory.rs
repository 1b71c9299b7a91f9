use crate::{
    entities::product::{self, Entity as Product, ProductStatus},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The inventory ledger: the only component allowed to mutate
/// `products.available_stock`.
///
/// Both mutations run against a caller-supplied connection so they always
/// execute inside the enclosing transaction (order assembly, cancellation,
/// deletion). The decrement is a single conditional UPDATE, so the
/// stock check and the write cannot be split by a concurrent checkout.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    low_stock_threshold: i32,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, low_stock_threshold: i32) -> Self {
        Self {
            db,
            low_stock_threshold,
        }
    }

    /// Current available stock for a product (read-side).
    #[instrument(skip(self))]
    pub async fn available_stock(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))?;
        Ok(product.available_stock)
    }

    /// Atomically decrements available stock for a product.
    ///
    /// Issues `UPDATE products SET available_stock = available_stock - q
    /// WHERE id = ? AND available_stock >= q`; zero affected rows means the
    /// stock was gone at the instant of the decrement and the reservation
    /// fails with `InsufficientStock` naming the product and what remains.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let result = Product::update_many()
            .col_expr(
                product::Column::AvailableStock,
                Expr::col(product::Column::AvailableStock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::AvailableStock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let current = Product::find_by_id(product_id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))?;
            return Err(ServiceError::InsufficientStock {
                product: current.name,
                available: current.available_stock,
            });
        }

        self.refresh_status(conn, product_id).await?;

        info!(%product_id, quantity, "Reserved stock");
        Ok(())
    }

    /// Atomically increments available stock for a product.
    ///
    /// Used on cancellation and deletion. The quantity must come from the
    /// recorded order line, never from caller input, so an order can only
    /// ever credit back exactly what it reserved.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Release quantity must be positive".to_string(),
            ));
        }

        let result = Product::update_many()
            .col_expr(
                product::Column::AvailableStock,
                Expr::col(product::Column::AvailableStock).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ProductNotFound(product_id.to_string()));
        }

        self.refresh_status(conn, product_id).await?;

        info!(%product_id, quantity, "Released stock");
        Ok(())
    }

    /// Re-derives the availability status from the current stock level.
    /// Discontinued products stay discontinued regardless of stock.
    async fn refresh_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let current = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::ProductNotFound(product_id.to_string()))?;

        if current.status == ProductStatus::Discontinued {
            return Ok(());
        }

        let next = status_for_stock(current.available_stock, self.low_stock_threshold);
        if next != current.status {
            let mut active: product::ActiveModel = current.into();
            active.status = Set(next);
            active.updated_at = Set(Utc::now());
            active.update(conn).await?;
        }

        Ok(())
    }
}

/// Availability status for a given stock level.
fn status_for_stock(available_stock: i32, low_stock_threshold: i32) -> ProductStatus {
    if available_stock <= 0 {
        ProductStatus::OutOfStock
    } else if available_stock <= low_stock_threshold {
        ProductStatus::LowStock
    } else {
        ProductStatus::Available
    }
}
