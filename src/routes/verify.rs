use axum::{extract::State, Json};
use tracing::instrument;
use validator::Validate;

use crate::{
    app_state::AppState,
    error::{ApiError, Result},
    models::verify::{EntitlementData, VerifyRequest, VerifyResponse},
};

/// POST /api/v1/subscriptions/verify
#[instrument(skip(state, request))]
pub async fn verify_subscription(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Validation error: {}", e)))?;

    // Verification never mutates state; a client disconnect here has no
    // side effects.
    let outcome = state
        .verifier
        .verify(
            &request.subscriber_id,
            &request.product_id,
            &request.purchase_token,
        )
        .await?;

    let (record, disposition) = state.reconciler.reconcile(&outcome).await?;

    tracing::debug!(
        "Reconciled verification for {} as {}",
        record.subscriber_id,
        disposition.as_str()
    );

    let now = time::OffsetDateTime::now_utc();
    Ok(Json(VerifyResponse {
        success: true,
        data: EntitlementData::from_record(&record, now),
    }))
}
