use crate::{
    config::AppConfig,
    entities::{
        order::{self, Entity as Order, OrderStatus, PaymentStatus},
        order_item,
        product::{Entity as Product, ProductStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        inventory::InventoryService,
        promotions::{self, PromotionService},
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

const ORDER_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderInput {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub recipient_name: String,
    #[validate(length(min = 1, message = "Recipient phone is required"))]
    pub recipient_phone: String,
    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, message = "Shipping city is required"))]
    pub shipping_city: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    pub promotion_code: Option<String>,
    pub notes: Option<String>,
}

/// A committed order together with its frozen lines.
#[derive(Debug, Serialize)]
pub struct PlacedOrder {
    pub order: order::Model,
    pub lines: Vec<order_item::Model>,
}

/// Converts a user's cart into a committed order.
///
/// Everything from the stock validation through the cart clearing runs in
/// one transaction: a failure at any step (missing product, insufficient
/// stock, unusable promotion, exhausted order numbers) unwinds the whole
/// attempt, leaving the cart populated and stock untouched. Notifications
/// go out only after the commit.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
    inventory: Arc<InventoryService>,
    promotions: Arc<PromotionService>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        inventory: Arc<InventoryService>,
        promotions: Arc<PromotionService>,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
            inventory,
            promotions,
        }
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn place_order(&self, input: PlaceOrderInput) -> Result<PlacedOrder, ServiceError> {
        input.validate()?;

        let user_id = input.user_id;
        let txn = self.db.begin().await?;

        // 1. Cart snapshot
        let cart_lines = CartService::load_snapshot(&txn, user_id).await?;
        if cart_lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // 2-3. Re-load live products, check stock, snapshot prices
        let mut subtotal = Decimal::ZERO;
        let mut pending = Vec::with_capacity(cart_lines.len());
        for line in &cart_lines {
            let product = Product::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(line.product_id.to_string()))?;

            if product.status == ProductStatus::Discontinued {
                return Err(ServiceError::ProductNotFound(product.name));
            }
            if product.available_stock < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    product: product.name,
                    available: product.available_stock,
                });
            }

            subtotal += product.price * Decimal::from(line.quantity);
            pending.push((line.quantity, product));
        }

        // 4. Promotion
        let now = Utc::now();
        let promotion_code = input
            .promotion_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());

        let mut discount = Decimal::ZERO;
        let mut applied_promotion = None;
        if let Some(code) = promotion_code {
            let promotion = self
                .promotions
                .find_by_code(&txn, code)
                .await?
                .ok_or_else(|| ServiceError::PromotionNotFound(code.to_uppercase()))?;

            let quote = promotions::evaluate(&promotion, subtotal, now)?;
            discount = quote.discount;
            applied_promotion = Some(promotion);
        }

        // 5. Totals
        let shipping_fee = self.config.shipping_fee_for(subtotal);
        let total_amount = (subtotal + shipping_fee - discount).max(Decimal::ZERO);

        // 6. Order number
        let order_number = generate_order_number(&txn).await?;

        // 7. Persist order and lines
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(subtotal),
            shipping_fee: Set(shipping_fee),
            discount: Set(discount),
            total_amount: Set(total_amount),
            payment_method: Set(input.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            promotion_code: Set(applied_promotion.as_ref().map(|p| p.code.clone())),
            recipient_name: Set(input.recipient_name),
            recipient_phone: Set(input.recipient_phone),
            shipping_address: Set(input.shipping_address),
            shipping_city: Set(input.shipping_city),
            postal_code: Set(input.postal_code),
            notes: Set(input.notes),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        let mut lines = Vec::with_capacity(pending.len());
        for (quantity, product) in &pending {
            let line = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                unit_price: Set(product.price),
                quantity: Set(*quantity),
                line_subtotal: Set(product.price * Decimal::from(*quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            lines.push(line);
        }

        // 8. Reserve stock; a failure here unwinds the rows written above
        for (quantity, product) in &pending {
            self.inventory.reserve(&txn, product.id, *quantity).await?;
        }

        // 9. Clear the cart
        CartService::clear_snapshot(&txn, user_id).await?;

        // 10. Consume the promotion within the same atomic scope
        if let Some(promotion) = &applied_promotion {
            self.promotions.consume(&txn, promotion.id).await?;
        }

        // 11. Commit, then best-effort notifications
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
                user_id,
            })
            .await;
        for line in &lines {
            self.event_sender
                .send_or_log(Event::StockReserved {
                    product_id: line.product_id,
                    quantity: line.quantity,
                })
                .await;
        }
        if let Some(promotion) = &applied_promotion {
            self.event_sender
                .send_or_log(Event::PromotionApplied {
                    promotion_id: promotion.id,
                    order_id,
                })
                .await;
        }

        info!(
            %order_id,
            %order_number,
            %user_id,
            %total_amount,
            "Order placed"
        );

        Ok(PlacedOrder { order, lines })
    }
}

/// Generates a human-readable order number, retrying on the unlikely
/// collision with an existing order.
async fn generate_order_number<C: ConnectionTrait>(conn: &C) -> Result<String, ServiceError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        let candidate = format!("ORD-{}-{:06}", Utc::now().format("%Y%m%d"), suffix);

        let exists = Order::find()
            .filter(order::Column::OrderNumber.eq(&candidate))
            .one(conn)
            .await?
            .is_some();
        if !exists {
            return Ok(candidate);
        }
    }

    Err(ServiceError::InternalError(
        "Could not generate a unique order number".to_string(),
    ))
}
