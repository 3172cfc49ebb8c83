use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle status of an order, persisted as its integer code.
///
/// The codes are part of the public data format. Transition rules live in
/// `services::order_status` and never compare codes numerically.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(num_value = 0)]
    PendingPayment,
    #[sea_orm(num_value = 1)]
    Paid,
    #[sea_orm(num_value = 2)]
    Shipped,
    #[sea_orm(num_value = 3)]
    Delivered,
    #[sea_orm(num_value = 4)]
    Completed,
    #[sea_orm(num_value = 5)]
    Cancelled,
    #[sea_orm(num_value = 6)]
    Refunding,
    #[sea_orm(num_value = 7)]
    Refunded,
}

impl OrderStatus {
    /// Integer code as stored and as accepted by list filters.
    pub fn code(self) -> i32 {
        self.to_value()
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::try_from_value(&code).ok()
    }

    /// Statuses no operation may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }

    /// Statuses whose totals count as realised revenue.
    pub fn counts_as_revenue(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Shipped | Self::Delivered | Self::Completed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub order_no: String,
    pub user_id: i32,
    pub total_amount: Decimal,
    pub shipping_fee: Decimal,
    pub status: OrderStatus,
    pub address_id: i32,
    /// JSON copy of the shipping address taken at checkout.
    #[sea_orm(column_type = "Text")]
    pub address_snapshot: String,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
