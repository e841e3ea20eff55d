use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable record of every developer-notification delivery. The unique
/// `delivery_id` is the dedup key: redeliveries insert-conflict and no-op.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_deliveries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub delivery_id: String,
    pub notification_type: i32,
    pub purchase_token: Option<String>,
    pub event_time: TimeDateTimeWithTimeZone,
    /// created | applied | stale | duplicate | unattributed | test | ignored
    pub outcome: String,
    pub received_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
