use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    errors::ApiError,
    services::promotions::CreatePromotionInput,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for promotion endpoints
pub fn promotions_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_promotion).get(list_promotions))
        .route("/validate", post(validate_promotion))
        .route("/{id}/deactivate", post(deactivate_promotion))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidatePromotionRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
    pub amount: Decimal,
}

/// Quotes the discount a code would yield. Read-only: `used_count` is
/// untouched no matter how often this is called.
async fn validate_promotion(
    State(state): State<AppState>,
    Json(payload): Json<ValidatePromotionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let quote = state
        .services
        .promotion
        .validate_code(&payload.code, payload.amount)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(quote))
}

async fn create_promotion(
    State(state): State<AppState>,
    Json(payload): Json<CreatePromotionInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let promotion = state
        .services
        .promotion
        .create_promotion(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(promotion))
}

async fn list_promotions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (promotions, total) = state
        .services
        .promotion
        .list_promotions(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        promotions,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

async fn deactivate_promotion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let promotion = state
        .services
        .promotion
        .deactivate(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(promotion))
}
