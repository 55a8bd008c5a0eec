use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The primary key on user_id is what makes the faucet a one-shot grant.
        manager
            .create_table(
                Table::create()
                    .table(FaucetGrants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FaucetGrants::UserId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FaucetGrants::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FaucetGrants::TxId)
                            .string_len(66)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_faucet_grants_user")
                            .from(FaucetGrants::Table, FaucetGrants::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RewardGrants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RewardGrants::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RewardGrants::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RewardGrants::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RewardGrants::TxId).string_len(66).null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reward_grants_user")
                            .from(RewardGrants::Table, RewardGrants::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Daily-limit check: count by user inside a trailing window.
        manager
            .create_index(
                Index::create()
                    .name("idx_reward_grants_user_time")
                    .table(RewardGrants::Table)
                    .col(RewardGrants::UserId)
                    .col(RewardGrants::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Reconciler scan: pending rows older than a day.
        manager
            .create_index(
                Index::create()
                    .name("idx_reward_grants_pending")
                    .table(RewardGrants::Table)
                    .col(RewardGrants::TxId)
                    .col(RewardGrants::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RewardGrants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FaucetGrants::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum FaucetGrants {
    Table,
    UserId,
    CreatedAt,
    TxId,
}

#[derive(DeriveIden)]
enum RewardGrants {
    Table,
    Id,
    UserId,
    CreatedAt,
    TxId,
}
