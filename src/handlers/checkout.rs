use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::{errors::ApiError, services::checkout::PlaceOrderInput, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(place_order))
}

/// Converts the caller's cart into a committed order.
async fn place_order(
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let placed = state
        .services
        .checkout
        .place_order(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(placed))
}
