//! Outstanding sign-in challenge, one per wallet address.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_challenges")]
pub struct Model {
    /// Lowercase `0x`-prefixed wallet address
    #[sea_orm(primary_key, auto_increment = false)]
    pub address: String,
    /// Full message text the wallet has to sign
    pub code: String,
    /// Issue time in Unix milliseconds
    pub issued_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
