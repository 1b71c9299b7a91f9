use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PromotionStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PromotionType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

/// A discount code.
///
/// `code` is stored upper-cased and matched case-insensitively by
/// normalizing lookups. `used_count` only moves forward, and only inside
/// the order-assembly transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub description: Option<String>,
    pub promotion_type: PromotionType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub min_order_amount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: PromotionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Usability per the promotion rules: active, inside the date window,
    /// and below the usage cap when one is set.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == PromotionStatus::Active
            && now >= self.starts_at
            && now <= self.ends_at
            && self
                .usage_limit
                .map_or(true, |limit| self.used_count < limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "WELCOME".to_string(),
            description: None,
            promotion_type: PromotionType::Fixed,
            value: Decimal::from(1000),
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            status: PromotionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn usable_requires_status_window_and_cap() {
        let now = Utc::now();
        assert!(base().is_usable(now));

        let mut inactive = base();
        inactive.status = PromotionStatus::Inactive;
        assert!(!inactive.is_usable(now));

        let mut expired = base();
        expired.ends_at = now - Duration::hours(1);
        assert!(!expired.is_usable(now));

        let mut capped = base();
        capped.usage_limit = Some(2);
        capped.used_count = 2;
        assert!(!capped.is_usable(now));

        let mut below_cap = base();
        below_cap.usage_limit = Some(2);
        below_cap.used_count = 1;
        assert!(below_cap.is_usable(now));
    }
}
