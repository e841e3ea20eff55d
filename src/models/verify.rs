use entity::sea_orm_active_enums::PaymentState;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

/// Verify Request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[validate(length(min = 1, max = 200))]
    pub subscriber_id: String,
    #[validate(length(min = 1, max = 200))]
    pub product_id: String,
    #[validate(length(min = 1, max = 4096))]
    pub purchase_token: String,
}

/// Verify Response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub data: EntitlementData,
}

/// Entitlement Response (keyed lookup for the authorization layer)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    pub success: bool,
    pub data: EntitlementData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementData {
    pub subscriber_id: String,
    pub product_id: String,
    pub plan: String,
    /// Recomputed from payment state and expiry at response time, not read
    /// from the stored flag.
    pub premium_active: bool,
    pub payment_state: PaymentState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub revision: i64,
}

impl EntitlementData {
    pub fn from_record(record: &entity::entitlements::Model, now: OffsetDateTime) -> Self {
        Self {
            subscriber_id: record.subscriber_id.clone(),
            product_id: record.product_id.clone(),
            plan: record.plan.clone(),
            premium_active: record.premium_at(now),
            payment_state: record.payment_state,
            expires_at: record.expiry_at,
            auto_renew: record.auto_renew,
            revision: record.revision,
        }
    }
}

/// Internal result of one storefront status lookup. Ephemeral: produced by
/// the verifier, consumed by the reconciler. Serializable so the dedup
/// window can cache it in redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub subscriber_id: String,
    pub product_id: String,
    pub plan: String,
    pub purchase_token: String,
    pub payment_state: PaymentState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiry_at: Option<OffsetDateTime>,
    pub auto_renew: bool,
    /// Storefront-side event timestamp. Reconciliation orders by this, not
    /// by arrival order.
    #[serde(with = "time::serde::rfc3339")]
    pub event_time: OffsetDateTime,
    /// SHA-256 of the raw storefront response (or notification payload),
    /// used as the idempotent-replay dedup key.
    pub checksum: String,
}
