// Middleware modules
pub mod logging;
pub mod notification_auth;

// Export logging middleware
pub use logging::logging_middleware;

// Export notification channel auth
pub use notification_auth::notification_auth_middleware;
