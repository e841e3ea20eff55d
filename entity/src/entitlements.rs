use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sea_orm_active_enums::PaymentState;

/// One row per subscriber identity. Created on first successful
/// verification, mutated only by the reconciler, never deleted
/// (soft-expired via `premium_active`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entitlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub subscriber_id: String,
    pub product_id: String,
    pub plan: String,
    pub premium_active: bool,
    pub payment_state: PaymentState,
    pub expiry_at: Option<TimeDateTimeWithTimeZone>,
    pub auto_renew: bool,
    pub purchase_token: String,
    pub last_checksum: String,
    pub event_time: TimeDateTimeWithTimeZone,
    pub revision: i64,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Premium status recomputed from payment state and expiry at query
    /// time. The stored `premium_active` flag is a reconciler output, not
    /// the source of truth: a row whose expiry has passed since the last
    /// reconciliation reads as non-premium here without a write.
    /// A pending state never carries an expiry it did not earn (the
    /// reconciler leaves `expiry_at` untouched on pending), so a paid
    /// period runs to its natural end even while a follow-up payment is
    /// pending, and a fresh pending record reads as non-premium.
    pub fn premium_at(&self, now: TimeDateTimeWithTimeZone) -> bool {
        if self.payment_state.revokes_access() {
            return false;
        }
        self.expiry_at.map(|expiry| expiry > now).unwrap_or(false)
    }
}
