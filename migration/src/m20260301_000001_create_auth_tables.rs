use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Users::Address)
                            .string_len(42)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        // One outstanding challenge per address; re-issuing upserts the row.
        manager
            .create_table(
                Table::create()
                    .table(AuthChallenges::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthChallenges::Address)
                            .string_len(42)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuthChallenges::Code)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthChallenges::IssuedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthChallenges::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Address,
}

#[derive(DeriveIden)]
enum AuthChallenges {
    Table,
    Address,
    Code,
    IssuedAt,
}
