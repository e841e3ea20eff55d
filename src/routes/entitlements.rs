use axum::{
    extract::{Path, State},
    Json,
};
use tracing::instrument;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    models::verify::{EntitlementData, EntitlementResponse},
};

/// GET /api/v1/entitlements/{subscriber_id}
///
/// Keyed lookup for the authorization layer ("is this user premium").
/// Premium is recomputed from state and expiry at query time.
#[instrument(skip(state))]
pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> Result<Json<EntitlementResponse>> {
    let record = state
        .reconciler
        .get(&subscriber_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No entitlement for subscriber {}", subscriber_id))
        })?;

    let now = time::OffsetDateTime::now_utc();
    Ok(Json(EntitlementResponse {
        success: true,
        data: EntitlementData::from_record(&record, now),
    }))
}
