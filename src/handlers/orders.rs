use crate::handlers::common::{
    map_service_error, no_content_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::{entities::order::OrderStatus, errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/{id}", get(get_order).delete(delete_order))
        .route("/by-number/{order_number}", get(get_order_by_number))
        .route("/{id}/items", get(get_order_items))
        .route("/{id}/status", put(update_order_status))
        .route("/{id}/cancel", post(cancel_order))
        .route("/user/{user_id}", get(list_user_orders))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .order
        .list_orders(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .order
        .list_user_orders(user_id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .get_order(id)
        .await
        .map_err(map_service_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", id)))?;
    Ok(success_response(order))
}

async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .get_order_by_number(&order_number)
        .await
        .map_err(map_service_error)?
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_number)))?;
    Ok(success_response(order))
}

async fn get_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .services
        .order
        .get_order_items(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(items))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub user_id: Uuid,
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .cancel_order(id, payload.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .order
        .delete_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
