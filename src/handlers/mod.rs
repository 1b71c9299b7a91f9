pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod promotions;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    carts::CartService, checkout::CheckoutService, inventory::InventoryService,
    orders::OrderService, promotions::PromotionService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub inventory: Arc<InventoryService>,
    pub order: Arc<OrderService>,
    pub promotion: Arc<PromotionService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, config: Arc<AppConfig>) -> Self {
        let inventory = Arc::new(InventoryService::new(
            db.clone(),
            config.low_stock_threshold,
        ));
        let promotion = Arc::new(PromotionService::new(db.clone(), event_sender.clone()));
        let cart = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            config,
            event_sender.clone(),
            inventory.clone(),
            promotion.clone(),
        ));
        let order = Arc::new(OrderService::new(db, event_sender, inventory.clone()));

        Self {
            cart,
            checkout,
            inventory,
            order,
            promotion,
        }
    }
}
