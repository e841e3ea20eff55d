use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationDeliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationDeliveries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::DeliveryId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::NotificationType)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::PurchaseToken)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::EventTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::Outcome)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationDeliveries::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Delivery id is the dedup key; redeliveries conflict here and no-op
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_deliveries_delivery_id")
                    .table(NotificationDeliveries::Table)
                    .col(NotificationDeliveries::DeliveryId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(NotificationDeliveries::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationDeliveries {
    Table,
    DeliveryId,
    Id,
    NotificationType,
    PurchaseToken,
    EventTime,
    Outcome,
    ReceivedAt,
}
