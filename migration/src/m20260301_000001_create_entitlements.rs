use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One entitlement row per subscriber, updated only by the reconciler
        manager
            .create_table(
                Table::create()
                    .table(Entitlements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Entitlements::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::SubscriberId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Entitlements::ProductId).string().not_null())
                    .col(ColumnDef::new(Entitlements::Plan).string().not_null())
                    .col(
                        ColumnDef::new(Entitlements::PremiumActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Entitlements::PaymentState)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::ExpiryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::AutoRenew)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Entitlements::PurchaseToken)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::LastChecksum)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::EventTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Entitlements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Entitlements::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Subscriber id is the reconciliation key
        manager
            .create_index(
                Index::create()
                    .name("idx_entitlements_subscriber_id")
                    .table(Entitlements::Table)
                    .col(Entitlements::SubscriberId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Notifications carry only the purchase token; attribution looks up here
        manager
            .create_index(
                Index::create()
                    .name("idx_entitlements_purchase_token")
                    .table(Entitlements::Table)
                    .col(Entitlements::PurchaseToken)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entitlements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Entitlements {
    Table,
    Id,
    SubscriberId,
    ProductId,
    Plan,
    PremiumActive,
    PaymentState,
    ExpiryAt,
    AutoRenew,
    PurchaseToken,
    LastChecksum,
    EventTime,
    Revision,
    CreatedAt,
    UpdatedAt,
}
