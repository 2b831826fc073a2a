use sea_orm_migration::prelude::*;

use super::m20250301_000005_create_orders_table::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Owner-scoped order listings, newest first.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_created")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_guest_created")
                    .table(Orders::Table)
                    .col(Orders::GuestId)
                    .col((Orders::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // Duplicate-submission guard: pending online orders are looked up by
        // owner plus the hash of their snapshotted lines.
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_cart_hash")
                    .table(Orders::Table)
                    .col(Orders::CartHash)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_orders_user_created",
            "idx_orders_guest_created",
            "idx_orders_cart_hash",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Orders::Table).to_owned())
                .await?;
        }
        Ok(())
    }
}
