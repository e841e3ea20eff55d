use crate::{
    config::{PlayConfig, VerifierConfig},
    error::{ApiError, Result},
    models::{common::timestamp_from_millis, verify::VerificationOutcome},
};
use entity::sea_orm_active_enums::PaymentState;
use redis::AsyncCommands;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Calls the Play subscription-status API and normalizes the response.
/// Performs no state mutation, so calls are idempotent and safe to cancel.
pub struct ReceiptVerifier {
    play: PlayConfig,
    settings: VerifierConfig,
    http_client: reqwest::Client,
    redis: Arc<redis::Client>,
}

/// purchases.subscriptions resource, only the fields reconciliation needs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatusResponse {
    /// 0 = pending, 1 = received, 2 = free trial, 3 = deferred
    payment_state: Option<i32>,
    expiry_time_millis: Option<String>,
    start_time_millis: Option<String>,
    #[serde(default)]
    auto_renewing: Option<bool>,
    #[serde(default)]
    user_cancellation_time_millis: Option<String>,
    /// 0 = user, 1 = system, 2 = replaced, 3 = developer (issued with refunds)
    #[serde(default)]
    cancel_reason: Option<i32>,
}

impl ReceiptVerifier {
    pub fn new(
        play: &PlayConfig,
        settings: &VerifierConfig,
        redis: Arc<redis::Client>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;

        Ok(Self {
            play: play.clone(),
            settings: settings.clone(),
            http_client,
            redis,
        })
    }

    /// Verify a purchase token against the storefront and normalize the
    /// result. Repeated calls for the same subscriber/product/token within
    /// the dedup window are served from cache without a storefront call.
    #[instrument(skip(self, purchase_token))]
    pub async fn verify(
        &self,
        subscriber_id: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<VerificationOutcome> {
        self.verify_inner(subscriber_id, product_id, purchase_token, true)
            .await
    }

    /// Verify bypassing the dedup window. Notification-driven lookups use
    /// this: the notification is evidence the storefront state just
    /// changed, so a cached pre-change response must not be replayed.
    #[instrument(skip(self, purchase_token))]
    pub async fn verify_fresh(
        &self,
        subscriber_id: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<VerificationOutcome> {
        self.verify_inner(subscriber_id, product_id, purchase_token, false)
            .await
    }

    async fn verify_inner(
        &self,
        subscriber_id: &str,
        product_id: &str,
        purchase_token: &str,
        use_cache: bool,
    ) -> Result<VerificationOutcome> {
        if purchase_token.trim().is_empty() {
            return Err(ApiError::InvalidPurchase(
                "empty purchase token".to_string(),
            ));
        }

        let plan = self
            .play
            .catalog_plan(product_id)
            .ok_or_else(|| {
                ApiError::InvalidPurchase(format!("unknown product id: {}", product_id))
            })?
            .to_string();

        let cache_key = dedup_key(subscriber_id, product_id, purchase_token);
        if use_cache {
            if let Some(cached) = self.cached_outcome(&cache_key).await {
                debug!("Serving verification from dedup cache");
                return Ok(cached);
            }
        }

        let raw_body = self
            .fetch_subscription_status(product_id, purchase_token)
            .await?;

        let status: SubscriptionStatusResponse =
            serde_json::from_str(&raw_body).map_err(|e| {
                // An unparseable storefront body must never upgrade an
                // entitlement; surface it as transient so the client retries.
                ApiError::StorefrontUnavailable(format!("malformed status response: {}", e))
            })?;

        let outcome = normalize(
            subscriber_id,
            product_id,
            &plan,
            purchase_token,
            &status,
            &raw_body,
        );

        self.store_outcome(&cache_key, &outcome).await;

        info!(
            "Verified subscription: subscriber={}, product={}, state={:?}, expiry={:?}",
            subscriber_id, product_id, outcome.payment_state, outcome.expiry_at
        );

        Ok(outcome)
    }

    /// GET the subscription status with bounded exponential backoff.
    /// Network failures, timeouts, 429 and 5xx are retryable; any other
    /// 4xx is a permanent invalid purchase.
    async fn fetch_subscription_status(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/androidpublisher/v3/applications/{}/purchases/subscriptions/{}/tokens/{}",
            self.play.api_base, self.play.package_name, product_id, purchase_token
        );

        let attempts = self.settings.retry_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = backoff_delay(self.settings.backoff_base_ms, attempt);
                debug!("Retrying storefront call in {:?} (attempt {})", backoff, attempt + 1);
                tokio::time::sleep(backoff).await;
            }

            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&self.play.service_token)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(|e| {
                            ApiError::StorefrontUnavailable(format!(
                                "failed to read status body: {}",
                                e
                            ))
                        });
                    }
                    if is_retryable_status(status.as_u16()) {
                        last_failure = format!("storefront returned {}", status);
                        warn!("{} (attempt {})", last_failure, attempt + 1);
                        continue;
                    }
                    // Malformed token, unknown product, expired link: permanent
                    return Err(ApiError::InvalidPurchase(format!(
                        "storefront rejected purchase with {}",
                        status
                    )));
                }
                Err(e) => {
                    last_failure = format!("storefront call failed: {}", e);
                    warn!("{} (attempt {})", last_failure, attempt + 1);
                }
            }
        }

        Err(ApiError::StorefrontUnavailable(last_failure))
    }

    /// Dedup cache read. Redis trouble degrades to a direct storefront
    /// call; verification never fails because the cache is down.
    async fn cached_outcome(&self, key: &str) -> Option<VerificationOutcome> {
        let mut conn = match self.redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Dedup cache unavailable, calling storefront directly: {}", e);
                return None;
            }
        };

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Dedup cache read failed: {}", e);
                None
            }
        }
    }

    async fn store_outcome(&self, key: &str, outcome: &VerificationOutcome) {
        let json = match serde_json::to_string(outcome) {
            Ok(json) => json,
            Err(_) => return,
        };

        let mut conn = match self.redis.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Dedup cache unavailable, skipping store: {}", e);
                return;
            }
        };

        if let Err(e) = conn
            .set_ex::<_, _, ()>(key, json, self.settings.dedup_window_seconds)
            .await
        {
            warn!("Dedup cache write failed: {}", e);
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Exponential backoff before retry `attempt` (1-based). The exponent is
/// clamped so a misconfigured retry count cannot overflow the shift.
fn backoff_delay(base_ms: u64, attempt: u8) -> Duration {
    let exponent = u32::from(attempt.saturating_sub(1)).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

fn dedup_key(subscriber_id: &str, product_id: &str, purchase_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subscriber_id.as_bytes());
    hasher.update(b"|");
    hasher.update(product_id.as_bytes());
    hasher.update(b"|");
    hasher.update(purchase_token.as_bytes());
    format!("verify:{:x}", hasher.finalize())
}

/// SHA-256 hex digest of a raw payload, the idempotent-replay dedup key.
pub fn payload_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Normalize a storefront status response into the internal outcome shape.
/// Ambiguous or missing payment data normalizes to pending: denying free
/// access beats granting it.
fn normalize(
    subscriber_id: &str,
    product_id: &str,
    plan: &str,
    purchase_token: &str,
    status: &SubscriptionStatusResponse,
    raw_body: &str,
) -> VerificationOutcome {
    let payment_state = match (status.cancel_reason, status.payment_state) {
        // Developer-initiated cancellation is issued alongside refunds
        (Some(3), _) => PaymentState::Revoked,
        (_, Some(1)) | (_, Some(2)) | (_, Some(3)) => PaymentState::Received,
        (_, Some(0)) => PaymentState::Pending,
        _ => PaymentState::Pending,
    };

    let expiry_at = status
        .expiry_time_millis
        .as_deref()
        .and_then(timestamp_from_millis);

    let start = status
        .start_time_millis
        .as_deref()
        .and_then(timestamp_from_millis);
    let cancelled = status
        .user_cancellation_time_millis
        .as_deref()
        .and_then(timestamp_from_millis);

    // The status API carries no explicit event timestamp; the most recent
    // state-change time stands in. Notification-driven lookups override
    // this with the notification's own event time.
    let event_time = match (start, cancelled) {
        (Some(s), Some(c)) => s.max(c),
        (Some(s), None) => s,
        (None, Some(c)) => c,
        (None, None) => time::OffsetDateTime::now_utc(),
    };

    VerificationOutcome {
        subscriber_id: subscriber_id.to_string(),
        product_id: product_id.to_string(),
        plan: plan.to_string(),
        purchase_token: purchase_token.to_string(),
        payment_state,
        expiry_at,
        auto_renew: status.auto_renewing.unwrap_or(false),
        event_time,
        checksum: payload_checksum(raw_body.as_bytes()),
    }
}
