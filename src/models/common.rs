use serde::Serialize;
use time::OffsetDateTime;

/// Acknowledgement body for the notification push endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Convert a storefront millisecond timestamp into an `OffsetDateTime`.
/// Play serializes these as decimal strings.
pub fn timestamp_from_millis(millis: &str) -> Option<OffsetDateTime> {
    let ms: i64 = millis.parse().ok()?;
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()
}
