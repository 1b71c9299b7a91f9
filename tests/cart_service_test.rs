//! Tests for cart line management: merging, quantity updates, removal,
//! and display totals.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_api::entities::product::{self, ProductStatus};
use storefront_api::errors::ServiceError;
use storefront_api::services::carts::AddToCartInput;
use uuid::Uuid;

#[tokio::test]
async fn adding_the_same_product_merges_the_line() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app.seed_product("Field Notebook", dec!(25000), 10).await;

    app.add_to_cart(user_id, product.id, 2).await;
    app.add_to_cart(user_id, product.id, 3).await;

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, 5);
    assert_eq!(cart.subtotal, dec!(125000));
}

#[tokio::test]
async fn zero_quantity_update_removes_the_line() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app.seed_product("Field Notebook", dec!(25000), 10).await;

    app.add_to_cart(user_id, product.id, 2).await;
    app.services
        .cart
        .update_item_quantity(user_id, product.id, 0)
        .await
        .unwrap();

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert!(cart.lines.is_empty());
    assert_eq!(cart.subtotal, dec!(0));
}

#[tokio::test]
async fn quantity_update_recomputes_the_line() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app.seed_product("Field Notebook", dec!(25000), 10).await;

    app.add_to_cart(user_id, product.id, 1).await;
    app.services
        .cart
        .update_item_quantity(user_id, product.id, 4)
        .await
        .unwrap();

    let cart = app.services.cart.get_cart(user_id).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 4);
    assert_eq!(cart.lines[0].line_subtotal, dec!(100000));
}

#[tokio::test]
async fn removing_a_missing_line_is_an_error() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let err = app
        .services
        .cart
        .remove_item(user_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn discontinued_products_cannot_be_added() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app.seed_product("Retired Widget", dec!(10000), 10).await;

    let mut active: product::ActiveModel = product::Entity::find_by_id(product.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.status = Set(ProductStatus::Discontinued);
    active.update(&*app.db).await.unwrap();

    let err = app
        .services
        .cart
        .add_item(
            user_id,
            AddToCartInput {
                product_id: product.id,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn carts_are_isolated_per_user() {
    let app = TestApp::new().await;
    let first_user = Uuid::new_v4();
    let second_user = Uuid::new_v4();
    let product = app.seed_product("Field Notebook", dec!(25000), 10).await;

    app.add_to_cart(first_user, product.id, 1).await;
    app.add_to_cart(second_user, product.id, 2).await;

    app.services.cart.clear(first_user).await.unwrap();

    assert_eq!(app.cart_line_count(first_user).await, 0);
    assert_eq!(app.cart_line_count(second_user).await, 1);
}
