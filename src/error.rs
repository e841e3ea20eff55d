use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Permanent, user-caused. The purchase token or product id is bad and
    /// retrying the same input cannot succeed.
    #[error("Invalid purchase: {0}")]
    InvalidPurchase(String),

    /// Transient. The storefront could not be reached or rate-limited us
    /// after bounded retries; the caller should try again later.
    #[error("Storefront unavailable: {0}")]
    StorefrontUnavailable(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::InvalidPurchase(ref msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_PURCHASE",
                format!("This purchase is invalid: {}", msg),
            ),
            ApiError::StorefrontUnavailable(ref msg) => {
                tracing::warn!("Storefront unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STOREFRONT_UNAVAILABLE",
                    "Your purchase could not be confirmed yet, please try again".to_string(),
                )
            }
            ApiError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound(ref msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Unauthorized(ref msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ApiError>;
