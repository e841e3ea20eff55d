use axum::{extract::State, Json};
use tracing::instrument;

use crate::{
    app_state::AppState,
    error::Result,
    models::{common::AckResponse, notification::PubSubEnvelope},
};

/// POST /api/v1/notifications/play
///
/// Storefront push channel. A 200 acknowledges the delivery; it is
/// returned only after the delivery row and any entitlement change are
/// durably committed, so redeliveries of acknowledged messages no-op and
/// unacknowledged failures are redelivered.
#[instrument(skip(state, envelope), fields(delivery_id = %envelope.message.message_id))]
pub async fn receive_play_notification(
    State(state): State<AppState>,
    Json(envelope): Json<PubSubEnvelope>,
) -> Result<Json<AckResponse>> {
    let ack = state.ingestor.handle(&envelope).await?;

    tracing::debug!("Notification resolved as {:?}", ack);

    Ok(Json(AckResponse::ok()))
}
