use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{errors::ApiError, services::carts::AddToCartInput, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/{user_id}", get(get_cart).delete(clear_cart))
        .route("/{user_id}/items", post(add_item))
        .route(
            "/{user_id}/items/{product_id}",
            put(update_item_quantity).delete(remove_item),
        )
}

async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

async fn add_item(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let line = state
        .services
        .cart
        .add_item(user_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(line))
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

async fn update_item_quantity(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .update_item_quantity(user_id, product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

async fn remove_item(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(user_id, product_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear(user_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
