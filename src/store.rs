//! Transaction helper and the queries shared by the auth and disbursement flows.
//!
//! Every query is generic over [`ConnectionTrait`] so the same function runs
//! inside a [`DatabaseTransaction`] or directly on the pool. A transaction that
//! is dropped without [`commit`] is rolled back by SeaORM, which is how every
//! early `?` return in the services discards partial writes.

use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    TransactionTrait,
};

use crate::entities::{auth_challenge, faucet_grant, reward_grant, user};
use crate::error::{ServiceResult, database_error};

#[derive(Clone)]
pub struct Store {
    database: DatabaseConnection,
}

impl Store {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.database
    }

    pub async fn begin(&self) -> ServiceResult<DatabaseTransaction> {
        self.database.begin().await.map_err(database_error)
    }
}

pub async fn commit(txn: DatabaseTransaction) -> ServiceResult<()> {
    txn.commit().await.map_err(database_error)
}

/// A reward grant waiting for its batch mint, joined to the owner's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReward {
    pub id: i64,
    pub address: String,
}

pub async fn upsert_challenge<C: ConnectionTrait>(
    conn: &C,
    address: &str,
    code: &str,
    issued_at: i64,
) -> ServiceResult<()> {
    let challenge = auth_challenge::ActiveModel {
        address: Set(address.to_string()),
        code: Set(code.to_string()),
        issued_at: Set(issued_at),
    };
    auth_challenge::Entity::insert(challenge)
        .on_conflict(
            OnConflict::column(auth_challenge::Column::Address)
                .update_columns([auth_challenge::Column::Code, auth_challenge::Column::IssuedAt])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Removes the challenge for `address` and hands back what was stored.
pub async fn take_challenge<C: ConnectionTrait>(
    conn: &C,
    address: &str,
) -> ServiceResult<Option<auth_challenge::Model>> {
    let Some(challenge) = auth_challenge::Entity::find_by_id(address.to_string())
        .one(conn)
        .await?
    else {
        return Ok(None);
    };
    auth_challenge::Entity::delete_by_id(address.to_string())
        .exec(conn)
        .await?;
    Ok(Some(challenge))
}

pub async fn find_user<C: ConnectionTrait>(conn: &C, id: i64) -> ServiceResult<Option<user::Model>> {
    Ok(user::Entity::find_by_id(id).one(conn).await?)
}

pub async fn find_user_by_address<C: ConnectionTrait>(
    conn: &C,
    address: &str,
) -> ServiceResult<Option<user::Model>> {
    Ok(user::Entity::find()
        .filter(user::Column::Address.eq(address))
        .one(conn)
        .await?)
}

/// `address` must already be normalized. Concurrent creators for the same
/// address converge on one row through the unique key.
pub async fn find_or_create_user<C: ConnectionTrait>(
    conn: &C,
    address: &str,
) -> ServiceResult<user::Model> {
    if let Some(existing) = find_user_by_address(conn, address).await? {
        return Ok(existing);
    }
    let candidate = user::ActiveModel {
        id: NotSet,
        address: Set(address.to_string()),
    };
    user::Entity::insert(candidate)
        .on_conflict(
            OnConflict::column(user::Column::Address)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    find_user_by_address(conn, address)
        .await?
        .ok_or_else(|| database_error(sea_orm::DbErr::RecordNotFound(address.to_string())))
}

pub async fn has_faucet_grant<C: ConnectionTrait>(conn: &C, user_id: i64) -> ServiceResult<bool> {
    let count = faucet_grant::Entity::find()
        .filter(faucet_grant::Column::UserId.eq(user_id))
        .count(conn)
        .await?;
    Ok(count > 0)
}

pub async fn insert_faucet_grant<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    created_at: i64,
    tx_id: &str,
) -> ServiceResult<faucet_grant::Model> {
    let grant = faucet_grant::ActiveModel {
        user_id: Set(user_id),
        created_at: Set(created_at),
        tx_id: Set(tx_id.to_string()),
    };
    Ok(grant.insert(conn).await?)
}

/// Grants for `user_id` created strictly after `since` (Unix millis).
pub async fn count_rewards_since<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    since: i64,
) -> ServiceResult<u64> {
    Ok(reward_grant::Entity::find()
        .filter(reward_grant::Column::UserId.eq(user_id))
        .filter(reward_grant::Column::CreatedAt.gt(since))
        .count(conn)
        .await?)
}

pub async fn insert_reward<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    created_at: i64,
) -> ServiceResult<reward_grant::Model> {
    let grant = reward_grant::ActiveModel {
        id: NotSet,
        user_id: Set(user_id),
        created_at: Set(created_at),
        tx_id: Set(None),
    };
    Ok(grant.insert(conn).await?)
}

pub async fn list_rewards<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
) -> ServiceResult<Vec<reward_grant::Model>> {
    Ok(reward_grant::Entity::find()
        .filter(reward_grant::Column::UserId.eq(user_id))
        .order_by_desc(reward_grant::Column::Id)
        .all(conn)
        .await?)
}

/// Unminted grants created at or before `created_before`, oldest id first.
pub async fn pending_rewards<C: ConnectionTrait>(
    conn: &C,
    created_before: i64,
) -> ServiceResult<Vec<PendingReward>> {
    let rows = reward_grant::Entity::find()
        .select_only()
        .column(reward_grant::Column::Id)
        .column(user::Column::Address)
        .join(JoinType::InnerJoin, reward_grant::Relation::User.def())
        .filter(reward_grant::Column::TxId.is_null())
        .filter(reward_grant::Column::CreatedAt.lte(created_before))
        .order_by_asc(reward_grant::Column::Id)
        .into_tuple::<(i64, String)>()
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, address)| PendingReward { id, address })
        .collect())
}

/// Stamps `tx_id` on the listed grants that are still pending.
pub async fn assign_reward_transaction<C: ConnectionTrait>(
    conn: &C,
    ids: &[i64],
    tx_id: &str,
) -> ServiceResult<u64> {
    let result = reward_grant::Entity::update_many()
        .col_expr(reward_grant::Column::TxId, Expr::value(tx_id.to_string()))
        .filter(reward_grant::Column::Id.is_in(ids.iter().copied()))
        .filter(reward_grant::Column::TxId.is_null())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_store;

    #[tokio::test]
    async fn challenge_upsert_replaces_previous() {
        let store = memory_store().await;
        let conn = store.connection();
        upsert_challenge(conn, "0xabc", "first", 1).await.unwrap();
        upsert_challenge(conn, "0xabc", "second", 2).await.unwrap();

        let taken = take_challenge(conn, "0xabc").await.unwrap().unwrap();
        assert_eq!(taken.code, "second");
        assert_eq!(taken.issued_at, 2);
        assert!(take_challenge(conn, "0xabc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_are_created_once() {
        let store = memory_store().await;
        let conn = store.connection();
        let first = find_or_create_user(conn, "0xaaa").await.unwrap();
        let again = find_or_create_user(conn, "0xaaa").await.unwrap();
        let other = find_or_create_user(conn, "0xbbb").await.unwrap();
        assert_eq!(first, again);
        assert!(other.id > first.id);
        assert_eq!(find_user(conn, first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = memory_store().await;
        {
            let txn = store.begin().await.unwrap();
            find_or_create_user(&txn, "0xccc").await.unwrap();
        }
        assert!(
            find_user_by_address(store.connection(), "0xccc")
                .await
                .unwrap()
                .is_none()
        );

        let txn = store.begin().await.unwrap();
        find_or_create_user(&txn, "0xccc").await.unwrap();
        commit(txn).await.unwrap();
        assert!(
            find_user_by_address(store.connection(), "0xccc")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn pending_rewards_filter_and_assignment() {
        let store = memory_store().await;
        let conn = store.connection();
        let user = find_or_create_user(conn, "0xddd").await.unwrap();
        let old = insert_reward(conn, user.id, 1_000).await.unwrap();
        let edge = insert_reward(conn, user.id, 2_000).await.unwrap();
        insert_reward(conn, user.id, 3_000).await.unwrap();

        let pending = pending_rewards(conn, 2_000).await.unwrap();
        assert_eq!(
            pending,
            vec![
                PendingReward { id: old.id, address: "0xddd".into() },
                PendingReward { id: edge.id, address: "0xddd".into() },
            ]
        );

        let updated = assign_reward_transaction(conn, &[old.id], "0xfeed").await.unwrap();
        assert_eq!(updated, 1);
        // Already stamped rows keep their first transaction id.
        let updated = assign_reward_transaction(conn, &[old.id], "0xbeef").await.unwrap();
        assert_eq!(updated, 0);

        let listed = list_rewards(conn, user.id).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].id > listed[1].id);
        assert_eq!(listed[2].tx_id.as_deref(), Some("0xfeed"));
        assert_eq!(count_rewards_since(conn, user.id, 1_000).await.unwrap(), 2);
    }
}
