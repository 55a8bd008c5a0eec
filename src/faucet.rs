//! One-time native-token payout to empty wallets.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseTransaction;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::auth::checked_address;
use crate::clock::Clock;
use crate::entities::{faucet_grant, user};
use crate::error::{ServiceError, ServiceResult};
use crate::ethereum::{
    Address, GWEI, LegacyTransaction, Signer, U256, format_address, parse_address,
};
use crate::rpc::ChainClient;
use crate::store::{self, Store};

pub const TRANSFER_GAS_PRICE_GWEI: u64 = 10;

/// Taken off the request deadline before the transfer is broadcast.
pub const SUBMIT_SAFETY_MARGIN: Duration = Duration::from_secs(2);

pub struct FaucetService {
    store: Store,
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    signer: Signer,
    chain_id: u64,
    payout: U256,
    lock: Mutex<()>,
}

impl FaucetService {
    pub fn new(
        store: Store,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        signer: Signer,
        chain_id: u64,
        payout_gwei: u64,
    ) -> Self {
        assert!(payout_gwei > 0, "Faucet payout must be positive");
        Self {
            store,
            chain,
            clock,
            signer,
            chain_id,
            payout: U256::from(payout_gwei) * U256::from(GWEI),
            lock: Mutex::new(()),
        }
    }

    pub async fn faucet(&self, user_id: i64, deadline: Instant) -> ServiceResult<faucet_grant::Model> {
        let _guard = self.lock.lock().await;
        let txn = self.store.begin().await?;
        let Some(user) = store::find_user(&txn, user_id).await? else {
            error!("Faucet requested for unknown user {user_id}");
            return Err(ServiceError::InternalError);
        };
        self.grant(txn, user, deadline).await
    }

    /// Same as [`faucet`](Self::faucet) for a wallet that may not have signed in yet.
    pub async fn faucet_by_address(
        &self,
        address: &str,
        deadline: Instant,
    ) -> ServiceResult<faucet_grant::Model> {
        let address = checked_address(address)?;
        let _guard = self.lock.lock().await;
        let txn = self.store.begin().await?;
        let user = store::find_or_create_user(&txn, &address).await?;
        self.grant(txn, user, deadline).await
    }

    async fn grant(
        &self,
        txn: DatabaseTransaction,
        user: user::Model,
        deadline: Instant,
    ) -> ServiceResult<faucet_grant::Model> {
        if store::has_faucet_grant(&txn, user.id).await? {
            return Err(ServiceError::AlreadyGranted);
        }

        let recipient = parse_address(&user.address).map_err(|err| {
            error!("Stored address for user {} is malformed: {err}", user.id);
            ServiceError::InternalError
        })?;
        let balance = self.chain.balance_at(recipient).await.map_err(|err| {
            error!("Balance lookup for {} failed: {err:#}", user.address);
            ServiceError::ServiceUnavailable
        })?;
        if !balance.is_zero() {
            return Err(ServiceError::BalanceNonZero);
        }

        let submit_deadline = deadline
            .checked_sub(SUBMIT_SAFETY_MARGIN)
            .unwrap_or_else(Instant::now);
        let tx_id = tokio::time::timeout_at(submit_deadline, self.submit_transfer(recipient))
            .await
            .map_err(|_| {
                error!("Faucet transfer to {} missed its deadline", user.address);
                ServiceError::ServiceUnavailable
            })?
            .map_err(|err| {
                error!("Faucet transfer to {} failed: {err:#}", user.address);
                ServiceError::ServiceUnavailable
            })?;

        let grant =
            store::insert_faucet_grant(&txn, user.id, self.clock.now_millis(), &tx_id).await?;
        if let Err(err) = store::commit(txn).await {
            error!(
                "Faucet transfer {tx_id} to {} was broadcast but not recorded",
                user.address
            );
            return Err(err);
        }

        info!("Faucet paid user {} in transaction {tx_id}", user.id);
        Ok(grant)
    }

    async fn submit_transfer(&self, recipient: Address) -> anyhow::Result<String> {
        let nonce = self.chain.pending_nonce_at(self.signer.address()).await?;
        let gas_price = U256::from(TRANSFER_GAS_PRICE_GWEI) * U256::from(GWEI);
        let transaction = LegacyTransaction::transfer(nonce, gas_price, recipient, self.payout);
        let signed = transaction.sign(&self.signer, self.chain_id)?;
        debug!(
            "Sending faucet transfer nonce={nonce} to {}",
            format_address(&recipient)
        );
        self.chain.send_transaction(&signed).await
    }
}
