use crate::{
    entities::promotion::{self, Entity as Promotion, PromotionStatus, PromotionType},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Result of evaluating a promotion against an order amount.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PromotionQuote {
    pub discount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePromotionInput {
    #[validate(length(min = 1, max = 32, message = "Code must be between 1 and 32 characters"))]
    pub code: String,
    pub description: Option<String>,
    pub promotion_type: PromotionType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Promotion evaluation and management.
///
/// `validate_code` is side-effect free and may be called any number of
/// times; `consume` is the only path that moves `used_count`, and it only
/// runs inside the order-assembly transaction.
#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates a promotion. The code is stored upper-cased so lookups can
    /// normalize instead of matching case-insensitively per query.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_promotion(
        &self,
        input: CreatePromotionInput,
    ) -> Result<promotion::Model, ServiceError> {
        input.validate()?;

        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Promotion value must be positive".to_string(),
            ));
        }
        if input.promotion_type == PromotionType::Percentage && input.value > Decimal::from(100) {
            return Err(ServiceError::ValidationError(
                "Percentage value cannot exceed 100".to_string(),
            ));
        }
        if input.ends_at <= input.starts_at {
            return Err(ServiceError::ValidationError(
                "Promotion end date must be after its start date".to_string(),
            ));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let model = promotion::ActiveModel {
            id: Set(id),
            code: Set(input.code.trim().to_uppercase()),
            description: Set(input.description),
            promotion_type: Set(input.promotion_type),
            value: Set(input.value),
            min_order_amount: Set(input.min_order_amount),
            max_discount_amount: Set(input.max_discount_amount),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            starts_at: Set(input.starts_at),
            ends_at: Set(input.ends_at),
            status: Set(PromotionStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        self.event_sender.send_or_log(Event::PromotionCreated(id)).await;

        info!(promotion_id = %id, code = %created.code, "Promotion created");
        Ok(created)
    }

    /// Lists promotions with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_promotions(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<promotion::Model>, u64), ServiceError> {
        let paginator = Promotion::find()
            .order_by_desc(promotion::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let promotions = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((promotions, total))
    }

    /// Deactivates a promotion so it can no longer be applied.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, promotion_id: Uuid) -> Result<promotion::Model, ServiceError> {
        let promo = Promotion::find_by_id(promotion_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Promotion {} not found", promotion_id))
            })?;

        let mut active: promotion::ActiveModel = promo.into();
        active.status = Set(PromotionStatus::Inactive);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PromotionDeactivated(promotion_id))
            .await;
        Ok(updated)
    }

    /// Looks a promotion up by code, normalized to upper-case, against the
    /// caller's connection.
    pub async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<Option<promotion::Model>, ServiceError> {
        let normalized = code.trim().to_uppercase();
        let promotion = Promotion::find()
            .filter(promotion::Column::Code.eq(normalized))
            .one(conn)
            .await?;
        Ok(promotion)
    }

    /// Side-effect-free validation: quotes the discount a code would yield
    /// for the given order amount. Never touches `used_count`.
    #[instrument(skip(self))]
    pub async fn validate_code(
        &self,
        code: &str,
        order_amount: Decimal,
    ) -> Result<PromotionQuote, ServiceError> {
        let promotion = self
            .find_by_code(&*self.db, code)
            .await?
            .ok_or_else(|| ServiceError::PromotionNotFound(code.trim().to_uppercase()))?;

        evaluate(&promotion, order_amount, Utc::now())
    }

    /// Consumes one use of a promotion inside the caller's transaction.
    ///
    /// The usage-cap check and the increment are a single conditional
    /// UPDATE, so two concurrent checkouts cannot both take the last use.
    pub async fn consume<C: ConnectionTrait>(
        &self,
        conn: &C,
        promotion_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Promotion::update_many()
            .col_expr(
                promotion::Column::UsedCount,
                Expr::col(promotion::Column::UsedCount).add(1),
            )
            .filter(promotion::Column::Id.eq(promotion_id))
            .filter(
                Condition::any()
                    .add(promotion::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(promotion::Column::UsedCount)
                            .lt(Expr::col(promotion::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::PromotionNotUsable(
                "usage limit reached".to_string(),
            ));
        }

        Ok(())
    }
}

/// Pure evaluation of a promotion against an order amount.
///
/// Checks usability (status, date window, usage cap) and the minimum order
/// amount, then computes the discount: fixed amounts are capped at the
/// order amount, percentages at `max_discount_amount` when set. The final
/// amount is floored at zero.
pub fn evaluate(
    promotion: &promotion::Model,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<PromotionQuote, ServiceError> {
    if promotion.status != PromotionStatus::Active {
        return Err(ServiceError::PromotionNotUsable(
            "promotion is inactive".to_string(),
        ));
    }
    if now < promotion.starts_at {
        return Err(ServiceError::PromotionNotUsable(
            "promotion is not active yet".to_string(),
        ));
    }
    if now > promotion.ends_at {
        return Err(ServiceError::PromotionNotUsable(
            "promotion has expired".to_string(),
        ));
    }
    if let Some(limit) = promotion.usage_limit {
        if promotion.used_count >= limit {
            return Err(ServiceError::PromotionNotUsable(
                "usage limit reached".to_string(),
            ));
        }
    }
    if let Some(minimum) = promotion.min_order_amount {
        if order_amount < minimum {
            return Err(ServiceError::BelowMinimumOrder { minimum });
        }
    }

    let discount = match promotion.promotion_type {
        PromotionType::Fixed => promotion.value.min(order_amount),
        PromotionType::Percentage => {
            let raw = order_amount * promotion.value / Decimal::from(100);
            match promotion.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
    };

    let final_amount = (order_amount - discount).max(Decimal::ZERO);
    Ok(PromotionQuote {
        discount,
        final_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn promo(promotion_type: PromotionType, value: Decimal) -> promotion::Model {
        let now = Utc::now();
        promotion::Model {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            description: None,
            promotion_type,
            value,
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(30),
            status: PromotionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentage_discount() {
        let p = promo(PromotionType::Percentage, dec!(10));
        let quote = evaluate(&p, dec!(250000), Utc::now()).unwrap();
        assert_eq!(quote.discount, dec!(25000));
        assert_eq!(quote.final_amount, dec!(225000));
    }

    #[test]
    fn percentage_discount_capped_at_max() {
        let mut p = promo(PromotionType::Percentage, dec!(10));
        p.max_discount_amount = Some(dec!(50000));
        let quote = evaluate(&p, dec!(1000000), Utc::now()).unwrap();
        assert_eq!(quote.discount, dec!(50000));
        assert_eq!(quote.final_amount, dec!(950000));
    }

    #[test]
    fn fixed_discount_capped_at_order_amount() {
        let p = promo(PromotionType::Fixed, dec!(20000));
        let quote = evaluate(&p, dec!(15000), Utc::now()).unwrap();
        assert_eq!(quote.discount, dec!(15000));
        assert_eq!(quote.final_amount, Decimal::ZERO);
    }

    #[test]
    fn below_minimum_order_rejected() {
        let mut p = promo(PromotionType::Fixed, dec!(5000));
        p.min_order_amount = Some(dec!(100000));
        let err = evaluate(&p, dec!(99999), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::BelowMinimumOrder { minimum } if minimum == dec!(100000));
    }

    #[test]
    fn inactive_promotion_rejected() {
        let mut p = promo(PromotionType::Fixed, dec!(5000));
        p.status = PromotionStatus::Inactive;
        let err = evaluate(&p, dec!(100000), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::PromotionNotUsable(_));
    }

    #[test]
    fn expired_promotion_rejected() {
        let mut p = promo(PromotionType::Fixed, dec!(5000));
        p.ends_at = Utc::now() - Duration::days(1);
        let err = evaluate(&p, dec!(100000), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::PromotionNotUsable(_));
    }

    #[test]
    fn not_yet_started_promotion_rejected() {
        let mut p = promo(PromotionType::Fixed, dec!(5000));
        p.starts_at = Utc::now() + Duration::days(1);
        let err = evaluate(&p, dec!(100000), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::PromotionNotUsable(_));
    }

    #[test]
    fn usage_cap_reached_rejected() {
        let mut p = promo(PromotionType::Fixed, dec!(5000));
        p.usage_limit = Some(3);
        p.used_count = 3;
        let err = evaluate(&p, dec!(100000), Utc::now()).unwrap_err();
        assert_matches!(err, ServiceError::PromotionNotUsable(_));
    }

    #[test]
    fn evaluation_does_not_mutate_usage() {
        let mut p = promo(PromotionType::Percentage, dec!(10));
        p.usage_limit = Some(1);
        for _ in 0..5 {
            evaluate(&p, dec!(100000), Utc::now()).unwrap();
        }
        assert_eq!(p.used_count, 0);
    }
}
