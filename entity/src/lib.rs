pub mod entitlements;
pub mod notification_deliveries;
pub mod sea_orm_active_enums;
