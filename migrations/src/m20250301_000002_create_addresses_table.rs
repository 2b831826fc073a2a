use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Addresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Addresses::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Addresses::UserId).uuid().null())
                    .col(ColumnDef::new(Addresses::GuestId).string_len(64).null())
                    .col(ColumnDef::new(Addresses::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Addresses::Email).string_len(255).null())
                    .col(ColumnDef::new(Addresses::Phone).string_len(32).null())
                    .col(ColumnDef::new(Addresses::Line1).string_len(255).not_null())
                    .col(ColumnDef::new(Addresses::Line2).string_len(255).null())
                    .col(ColumnDef::new(Addresses::City).string_len(100).not_null())
                    .col(ColumnDef::new(Addresses::State).string_len(100).not_null())
                    .col(
                        ColumnDef::new(Addresses::PostalCode)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Addresses::Country)
                            .string_len(2)
                            .not_null()
                            .default("IN"),
                    )
                    .col(
                        ColumnDef::new(Addresses::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Addresses::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Addresses::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_addresses_user_id")
                    .table(Addresses::Table)
                    .col(Addresses::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_addresses_guest_id")
                    .table(Addresses::Table)
                    .col(Addresses::GuestId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Addresses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Addresses {
    Table,
    Id,
    UserId,
    GuestId,
    Name,
    Email,
    Phone,
    Line1,
    Line2,
    City,
    State,
    PostalCode,
    Country,
    IsDefault,
    CreatedAt,
    UpdatedAt,
}
