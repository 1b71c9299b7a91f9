//! End-to-end tests for the cart-to-order checkout flow: totals, promotion
//! handling, snapshotting, and the all-or-nothing failure semantics.

mod common;

use assert_matches::assert_matches;
use common::{place_order_input, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::entities::order::{OrderStatus, PaymentStatus};
use storefront_api::entities::product::{self, ProductStatus};
use storefront_api::entities::promotion::PromotionType;
use storefront_api::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn checkout_with_promotion_computes_expected_totals() {
    let app = TestApp::with_config(|cfg| {
        cfg.shipping_fee = dec!(30000);
    })
    .await;
    let user_id = Uuid::new_v4();

    let product_a = app.seed_product("Canvas Tote", dec!(100000), 2).await;
    let product_b = app.seed_product("Enamel Mug", dec!(50000), 5).await;
    let promotion = app
        .seed_promotion("SALE10", PromotionType::Percentage, dec!(10))
        .await;

    app.add_to_cart(user_id, product_a.id, 2).await;
    app.add_to_cart(user_id, product_b.id, 1).await;

    let placed = app
        .services
        .checkout
        .place_order(place_order_input(user_id, Some("SALE10")))
        .await
        .expect("checkout should succeed");

    assert_eq!(placed.order.subtotal, dec!(250000));
    assert_eq!(placed.order.discount, dec!(25000));
    assert_eq!(placed.order.shipping_fee, dec!(30000));
    assert_eq!(placed.order.total_amount, dec!(255000));
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
    assert_eq!(placed.order.promotion_code.as_deref(), Some("SALE10"));
    assert!(placed.order.order_number.starts_with("ORD-"));
    assert_eq!(placed.lines.len(), 2);

    // Stock reserved, cart cleared, promotion consumed exactly once.
    assert_eq!(app.stock_of(product_a.id).await, 0);
    assert_eq!(app.stock_of(product_b.id).await, 4);
    assert_eq!(app.product_status(product_a.id).await, ProductStatus::OutOfStock);
    assert_eq!(app.cart_line_count(user_id).await, 0);
    assert_eq!(app.promotion_used_count(promotion.id).await, 1);
}

#[tokio::test]
async fn insufficient_stock_aborts_whole_checkout() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product_a = app.seed_product("Canvas Tote", dec!(100000), 1).await;
    let product_b = app.seed_product("Enamel Mug", dec!(50000), 5).await;

    app.add_to_cart(user_id, product_a.id, 2).await;
    app.add_to_cart(user_id, product_b.id, 1).await;

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, None))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { ref product, available } if product == "Canvas Tote" && available == 1
    );

    // Nothing happened: stock, cart, and order table are all untouched.
    assert_eq!(app.stock_of(product_a.id).await, 1);
    assert_eq!(app.stock_of(product_b.id).await, 5);
    assert_eq!(app.cart_line_count(user_id).await, 2);

    let orders = storefront_api::entities::Order::find()
        .all(&*app.db)
        .await
        .unwrap();
    assert!(orders.is_empty());
    let lines = storefront_api::entities::OrderItem::find()
        .all(&*app.db)
        .await
        .unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn product_deleted_between_cart_and_checkout_is_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 3).await;
    app.add_to_cart(user_id, product.id, 1).await;

    product::Entity::delete_by_id(product.id)
        .exec(&*app.db)
        .await
        .unwrap();

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound(_));
}

#[tokio::test]
async fn order_lines_snapshot_price_and_name() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 5).await;
    app.add_to_cart(user_id, product.id, 2).await;

    let placed = app
        .services
        .checkout
        .place_order(place_order_input(user_id, None))
        .await
        .unwrap();

    // Reprice and rename the product after the order is placed.
    use sea_orm::{ActiveModelTrait, Set};
    let mut active: product::ActiveModel = product::Entity::find_by_id(product.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.price = Set(dec!(999999));
    active.name = Set("Renamed Tote".to_string());
    active.update(&*app.db).await.unwrap();

    let lines = app
        .services
        .order
        .get_order_items(placed.order.id)
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].unit_price, dec!(100000));
    assert_eq!(lines[0].product_name, "Canvas Tote");
    assert_eq!(lines[0].line_subtotal, dec!(200000));

    let order = app
        .services
        .order
        .get_order(placed.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.subtotal, dec!(200000));
}

#[tokio::test]
async fn promotion_validation_is_side_effect_free() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 5).await;
    let promotion = app
        .seed_promotion("SAVE10", PromotionType::Percentage, dec!(10))
        .await;

    for _ in 0..5 {
        app.services
            .promotion
            .validate_code("save10", dec!(100000))
            .await
            .expect("validation should succeed");
    }
    assert_eq!(app.promotion_used_count(promotion.id).await, 0);

    app.add_to_cart(user_id, product.id, 1).await;
    app.services
        .checkout
        .place_order(place_order_input(user_id, Some("save10")))
        .await
        .unwrap();
    assert_eq!(app.promotion_used_count(promotion.id).await, 1);
}

#[tokio::test]
async fn percentage_discount_is_capped() {
    let app = TestApp::new().await;

    app.seed_promotion_with("BIGSALE", PromotionType::Percentage, dec!(10), |model| {
        use sea_orm::Set;
        model.max_discount_amount = Set(Some(dec!(50000)));
    })
    .await;

    let quote = app
        .services
        .promotion
        .validate_code("BIGSALE", dec!(1000000))
        .await
        .unwrap();
    assert_eq!(quote.discount, dec!(50000));
    assert_eq!(quote.final_amount, dec!(950000));
}

#[tokio::test]
async fn exhausted_promotion_aborts_checkout_without_side_effects() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 5).await;
    let promotion = app
        .seed_promotion_with("ONCE", PromotionType::Fixed, dec!(10000), |model| {
            use sea_orm::Set;
            model.usage_limit = Set(Some(1));
            model.used_count = Set(1);
        })
        .await;

    app.add_to_cart(user_id, product.id, 1).await;

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, Some("ONCE")))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PromotionNotUsable(_));

    assert_eq!(app.stock_of(product.id).await, 5);
    assert_eq!(app.cart_line_count(user_id).await, 1);
    assert_eq!(app.promotion_used_count(promotion.id).await, 1);
}

#[tokio::test]
async fn below_minimum_order_aborts_checkout() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Enamel Mug", dec!(50000), 5).await;
    app.seed_promotion_with("MIN100", PromotionType::Fixed, dec!(10000), |model| {
        use sea_orm::Set;
        model.min_order_amount = Set(Some(dec!(100000)));
    })
    .await;

    app.add_to_cart(user_id, product.id, 1).await;

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, Some("MIN100")))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::BelowMinimumOrder { minimum } if minimum == dec!(100000));
    assert_eq!(app.stock_of(product.id).await, 5);
    assert_eq!(app.cart_line_count(user_id).await, 1);
}

#[tokio::test]
async fn unknown_promotion_code_aborts_checkout() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Enamel Mug", dec!(50000), 5).await;
    app.add_to_cart(user_id, product.id, 1).await;

    let err = app
        .services
        .checkout
        .place_order(place_order_input(user_id, Some("NOSUCH")))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PromotionNotFound(code) if code == "NOSUCH");
    assert_eq!(app.stock_of(product.id).await, 5);
    assert_eq!(app.cart_line_count(user_id).await, 1);
}

#[tokio::test]
async fn free_shipping_threshold_zeroes_the_fee() {
    let app = TestApp::with_config(|cfg| {
        cfg.shipping_fee = dec!(30000);
        cfg.free_shipping_threshold = Some(dec!(200000));
    })
    .await;
    let user_id = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 10).await;
    app.add_to_cart(user_id, product.id, 2).await;

    let placed = app
        .services
        .checkout
        .place_order(place_order_input(user_id, None))
        .await
        .unwrap();
    assert_eq!(placed.order.shipping_fee, dec!(0));
    assert_eq!(placed.order.total_amount, dec!(200000));
}

#[tokio::test]
async fn two_checkouts_race_for_the_last_units() {
    let app = TestApp::new().await;
    let first_user = Uuid::new_v4();
    let second_user = Uuid::new_v4();

    let product = app.seed_product("Canvas Tote", dec!(100000), 3).await;
    app.add_to_cart(first_user, product.id, 2).await;
    app.add_to_cart(second_user, product.id, 2).await;

    let first = app
        .services
        .checkout
        .place_order(place_order_input(first_user, None))
        .await;
    let second = app
        .services
        .checkout
        .place_order(place_order_input(second_user, None))
        .await;

    // Only one of the two can win the remaining stock.
    assert!(first.is_ok());
    assert_matches!(
        second.unwrap_err(),
        ServiceError::InsufficientStock { available: 1, .. }
    );
    assert_eq!(app.stock_of(product.id).await, 1);
    assert_eq!(app.cart_line_count(second_user).await, 1);
}
