use base64::Engine;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::models::{common::timestamp_from_millis, verify::VerificationOutcome};

/// Pub/Sub push envelope wrapping a Play developer notification.
#[derive(Debug, Deserialize)]
pub struct PubSubEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64-encoded developer notification JSON
    pub data: String,
    /// Unique per delivery; the dedup key for redeliveries
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

impl PubSubEnvelope {
    /// Decode the base64 `data` field into the developer notification it
    /// carries, returning the decoded bytes alongside for checksumming.
    pub fn decode(&self) -> anyhow::Result<(DeveloperNotification, Vec<u8>)> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.message.data)?;
        let notification = serde_json::from_slice(&bytes)?;
        Ok((notification, bytes))
    }
}

/// Real-time developer notification, as published by Play to the
/// notification topic.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperNotification {
    pub version: String,
    pub package_name: String,
    pub event_time_millis: String,
    #[serde(default)]
    pub subscription_notification: Option<SubscriptionNotification>,
    #[serde(default)]
    pub test_notification: Option<TestNotification>,
}

impl DeveloperNotification {
    pub fn event_time(&self) -> Option<OffsetDateTime> {
        timestamp_from_millis(&self.event_time_millis)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotification {
    pub version: String,
    pub notification_type: i32,
    pub purchase_token: String,
    pub subscription_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNotification {
    pub version: String,
}

/// Subscription notification types (androidpublisher). Only revocation is
/// special-cased; every other type triggers a fresh status lookup so the
/// status API stays the single source of truth.
pub const SUBSCRIPTION_REVOKED: i32 = 12;

impl SubscriptionNotification {
    pub fn is_revocation(&self) -> bool {
        self.notification_type == SUBSCRIPTION_REVOKED
    }
}

/// A developer notification coerced into the common reconciliation shape:
/// the verification-outcome fields plus the delivery identifier used for
/// deduplication.
#[derive(Debug, Clone)]
pub struct RenewalEvent {
    pub delivery_id: String,
    pub notification_type: i32,
    pub outcome: VerificationOutcome,
}
