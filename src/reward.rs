use std::sync::Arc;

use chrono::Duration;
use sea_orm::DatabaseTransaction;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::checked_address;
use crate::clock::Clock;
use crate::entities::{reward_grant, user};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{self, Store};

/// Rolling window the daily limit applies to.
pub const REWARD_WINDOW: Duration = Duration::hours(24);

pub struct RewardService {
    store: Store,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    lock: Arc<Mutex<()>>,
}

impl RewardService {
    pub fn new(store: Store, clock: Arc<dyn Clock>, daily_limit: u32) -> Self {
        assert!(daily_limit > 0, "Daily limit must be positive");
        Self {
            store,
            clock,
            daily_limit,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Lock serializing grant creation with batch minting.
    pub fn lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    pub async fn apply(&self, user_id: i64) -> ServiceResult<reward_grant::Model> {
        let _guard = self.lock.lock().await;
        let txn = self.store.begin().await?;
        let Some(user) = store::find_user(&txn, user_id).await? else {
            error!("Reward requested for unknown user {user_id}");
            return Err(ServiceError::InternalError);
        };
        self.grant(txn, user).await
    }

    pub async fn apply_by_address(&self, address: &str) -> ServiceResult<reward_grant::Model> {
        let address = checked_address(address)?;
        let _guard = self.lock.lock().await;
        let txn = self.store.begin().await?;
        let user = store::find_or_create_user(&txn, &address).await?;
        self.grant(txn, user).await
    }

    /// Newest first.
    pub async fn list(&self, user_id: i64) -> ServiceResult<Vec<reward_grant::Model>> {
        store::list_rewards(self.store.connection(), user_id).await
    }

    pub async fn list_by_address(&self, address: &str) -> ServiceResult<Vec<reward_grant::Model>> {
        let address = checked_address(address)?;
        match store::find_user_by_address(self.store.connection(), &address).await? {
            Some(user) => self.list(user.id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn grant(
        &self,
        txn: DatabaseTransaction,
        user: user::Model,
    ) -> ServiceResult<reward_grant::Model> {
        let now = self.clock.now_millis();
        let since = now - REWARD_WINDOW.num_milliseconds();
        let recent = store::count_rewards_since(&txn, user.id, since).await?;
        if recent >= u64::from(self.daily_limit) {
            return Err(ServiceError::LimitReached);
        }

        let grant = store::insert_reward(&txn, user.id, now).await?;
        store::commit(txn).await?;
        info!(
            "Reward grant {} queued for user {} ({} of {} today)",
            grant.id,
            user.id,
            recent + 1,
            self.daily_limit
        );
        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    use crate::clock::ManualClock;
    use crate::testing::memory_store;

    const ADDRESS: &str = "0x7c342c036160c749d1b43192e98b4776854be2c4";

    async fn harness(limit: u32) -> (Arc<ManualClock>, RewardService, Store) {
        let store = memory_store().await;
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let service = RewardService::new(store.clone(), clock.clone(), limit);
        (clock, service, store)
    }

    #[tokio::test]
    async fn daily_limit_is_enforced() {
        let (_, service, store) = harness(3).await;
        let user = store::find_or_create_user(store.connection(), ADDRESS)
            .await
            .unwrap();

        for _ in 0..3 {
            let grant = service.apply(user.id).await.unwrap();
            assert_eq!(grant.user_id, user.id);
            assert!(grant.tx_id.is_none());
        }
        assert_eq!(service.apply(user.id).await, Err(ServiceError::LimitReached));
        assert_eq!(service.list(user.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn window_rolls_with_the_clock() {
        let (clock, service, store) = harness(2).await;
        let user = store::find_or_create_user(store.connection(), ADDRESS)
            .await
            .unwrap();

        let first = service.apply(user.id).await.unwrap();
        clock.advance(Duration::hours(12));
        let second = service.apply(user.id).await.unwrap();
        assert_eq!(service.apply(user.id).await, Err(ServiceError::LimitReached));

        clock.advance(Duration::hours(12) - Duration::milliseconds(1));
        assert_eq!(service.apply(user.id).await, Err(ServiceError::LimitReached));

        // The first grant leaves the window 24h after it was made.
        clock.advance(Duration::milliseconds(1));
        let third = service.apply(user.id).await.unwrap();

        let listed: Vec<i64> = service
            .list(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|grant| grant.id)
            .collect();
        assert_eq!(listed, vec![third.id, second.id, first.id]);
    }

    #[tokio::test]
    async fn address_variants_create_and_list() {
        let (_, service, _) = harness(1).await;
        assert!(service.list_by_address(ADDRESS).await.unwrap().is_empty());

        let grant = service
            .apply_by_address(&ADDRESS.to_ascii_uppercase().replacen("0X", "0x", 1))
            .await
            .unwrap();
        assert_eq!(service.list_by_address(ADDRESS).await.unwrap(), vec![grant]);
        assert_eq!(
            service.apply_by_address(ADDRESS).await,
            Err(ServiceError::LimitReached)
        );
        assert!(matches!(
            service.list_by_address("0x12").await,
            Err(ServiceError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_internal_error() {
        let (_, service, _) = harness(1).await;
        assert_eq!(service.apply(404).await, Err(ServiceError::InternalError));
    }
}
