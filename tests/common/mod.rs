#![allow(dead_code)] // not every test binary uses every helper

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_api::{
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::{
        cart_item,
        product::{self, ProductStatus},
        promotion::{self, PromotionStatus, PromotionType},
    },
    events::{self, EventSender},
    handlers::AppServices,
    services::checkout::PlaceOrderInput,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Test harness backed by an in-memory SQLite database.
///
/// A single pooled connection keeps every query on the same in-memory
/// database; the embedded migrations create the schema fresh per test.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust checkout
    /// settings (shipping fee, free-shipping threshold) before services
    /// are built.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        customize(&mut cfg);
        let config = Arc::new(cfg);

        let services = AppServices::new(db.clone(), event_sender, config.clone());

        Self {
            db,
            config,
            services,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            sku: Set(format!("SKU-{}", &id.to_string()[..8].to_uppercase())),
            name: Set(name.to_string()),
            price: Set(price),
            available_stock: Set(stock),
            status: Set(ProductStatus::Available),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_promotion(
        &self,
        code: &str,
        promotion_type: PromotionType,
        value: Decimal,
    ) -> promotion::Model {
        self.seed_promotion_with(code, promotion_type, value, |_| {})
            .await
    }

    pub async fn seed_promotion_with(
        &self,
        code: &str,
        promotion_type: PromotionType,
        value: Decimal,
        customize: impl FnOnce(&mut promotion::ActiveModel),
    ) -> promotion::Model {
        let now = Utc::now();
        let mut model = promotion::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            description: Set(None),
            promotion_type: Set(promotion_type),
            value: Set(value),
            min_order_amount: Set(None),
            max_discount_amount: Set(None),
            usage_limit: Set(None),
            used_count: Set(0),
            starts_at: Set(now - Duration::days(1)),
            ends_at: Set(now + Duration::days(30)),
            status: Set(PromotionStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };
        customize(&mut model);
        model.insert(&*self.db).await.expect("seed promotion")
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        self.services
            .cart
            .add_item(
                user_id,
                storefront_api::services::carts::AddToCartInput {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.services
            .inventory
            .available_stock(product_id)
            .await
            .expect("query stock")
    }

    pub async fn product_status(&self, product_id: Uuid) -> ProductStatus {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("query product")
            .expect("product exists")
            .status
    }

    pub async fn cart_line_count(&self, user_id: Uuid) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(&*self.db)
            .await
            .expect("query cart")
            .len()
    }

    pub async fn promotion_used_count(&self, promotion_id: Uuid) -> i32 {
        promotion::Entity::find_by_id(promotion_id)
            .one(&*self.db)
            .await
            .expect("query promotion")
            .expect("promotion exists")
            .used_count
    }
}

/// A checkout request with placeholder shipping fields.
pub fn place_order_input(user_id: Uuid, promotion_code: Option<&str>) -> PlaceOrderInput {
    PlaceOrderInput {
        user_id,
        recipient_name: "Pat Tester".to_string(),
        recipient_phone: "555-0100".to_string(),
        shipping_address: "1 Harbor Street".to_string(),
        shipping_city: "Porttown".to_string(),
        postal_code: "10000".to_string(),
        payment_method: "cod".to_string(),
        promotion_code: promotion_code.map(str::to_string),
        notes: None,
    }
}
