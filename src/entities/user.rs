use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub address: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::faucet_grant::Entity")]
    FaucetGrant,
    #[sea_orm(has_many = "super::reward_grant::Entity")]
    RewardGrant,
}

impl Related<super::faucet_grant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FaucetGrant.def()
    }
}

impl Related<super::reward_grant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RewardGrant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
