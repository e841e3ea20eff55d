// Request/Response models
pub mod common;
pub mod notification;
pub mod verify;
