use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment state of the latest known purchase, as normalized from the
/// storefront status API or a developer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "revoked")]
    Revoked,
}

impl PaymentState {
    /// Refunds and revocations cut access immediately, even before the
    /// natural expiry timestamp.
    pub fn revokes_access(&self) -> bool {
        matches!(self, Self::Refunded | Self::Revoked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Refunded => "refunded",
            Self::Revoked => "revoked",
        }
    }
}
