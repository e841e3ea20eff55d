// Route modules
pub mod entitlements;
pub mod notifications;
pub mod verify;

use crate::{
    app_state::AppState,
    middleware::{logging_middleware, notification_auth_middleware},
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state.clone()))
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes(state: AppState) -> Router<AppState> {
    // Storefront push channel, gated on the shared notification token
    let notification_routes = Router::new()
        .route(
            "/notifications/play",
            post(notifications::receive_play_notification),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            notification_auth_middleware,
        ));

    // Client-facing verification and the entitlement read path
    let subscription_routes = Router::new()
        .route("/subscriptions/verify", post(verify::verify_subscription))
        .route(
            "/entitlements/{subscriber_id}",
            get(entitlements::get_entitlement),
        );

    Router::new()
        .merge(notification_routes)
        .merge(subscription_routes)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
