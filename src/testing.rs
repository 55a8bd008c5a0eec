//! In-process collaborators for unit tests: a migrated in-memory SQLite store
//! and a scripted chain.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database};

use crate::ethereum::{Address, SignedTransaction, Signer, U256, format_address};
use crate::rpc::ChainClient;
use crate::store::Store;

pub const FAUCET_KEY: &str = "4b11948482dd58d5a79511d4ba14c66f8109d96876b66d6e68ee97f76025402a";
pub const REWARD_ADMIN_KEY: &str =
    "acc4b11cbdc439dc0ddf1cc63ff54a485d419904721202682a1140843aa05e4c";
pub const WALLET_KEYS: [&str; 3] = [
    "791b12c1dfaebcf1f7cf2e3a12099fa67b3715fb14f70b1cfa03a4ba83108361",
    "24b0f6e41cd60af0e093f39cb819b56abee3896cb5298ec0e143d349c73819be",
    "879f64ddc23c6b5a3bfd432509dfef14b548dd639c517bfff5c7a56b092a9bc6",
];

pub async fn memory_store() -> Store {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    // A single connection keeps every query on the same in-memory database.
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false)
        .idle_timeout(Duration::from_secs(3_600));
    let database = Database::connect(options)
        .await
        .expect("in-memory sqlite connects");
    migration::Migrator::up(&database, None)
        .await
        .expect("migrations apply");
    Store::new(database)
}

pub fn wallet(index: usize) -> Signer {
    Signer::from_hex(WALLET_KEYS[index]).expect("test key parses")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintCall {
    pub event_id: U256,
    pub recipients: Vec<String>,
    pub tx_hash: String,
}

/// Scripted `ChainClient`: balances and mint capacity are set by the test and
/// every submission is recorded.
#[derive(Default)]
pub struct FakeChain {
    balances: Mutex<HashMap<Address, U256>>,
    capacity: Mutex<Option<U256>>,
    sent: Mutex<Vec<SignedTransaction>>,
    mints: Mutex<Vec<MintCall>>,
    mint_counter: AtomicU64,
    fail_balance: AtomicBool,
    fail_send: AtomicBool,
    failing_mints: AtomicU64,
    send_delay: Mutex<Option<Duration>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    /// `None` means unlimited: `can_mint` echoes the requested count.
    pub fn set_capacity(&self, capacity: Option<U256>) {
        *self.capacity.lock().unwrap() = capacity;
    }

    pub fn fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, AtomicOrdering::SeqCst);
    }

    /// The next `count` mint submissions fail.
    pub fn fail_next_mints(&self, count: u64) {
        self.failing_mints.store(count, AtomicOrdering::SeqCst);
    }

    pub fn delay_send(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn mints(&self) -> Vec<MintCall> {
        self.mints.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn balance_at(&self, address: Address) -> Result<U256> {
        if self.fail_balance.load(AtomicOrdering::SeqCst) {
            return Err(anyhow!("balance lookup unavailable"));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn pending_nonce_at(&self, _address: Address) -> Result<u64> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn send_transaction(&self, transaction: &SignedTransaction) -> Result<String> {
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_send.load(AtomicOrdering::SeqCst) {
            return Err(anyhow!("node rejected transaction"));
        }
        self.sent.lock().unwrap().push(transaction.clone());
        Ok(transaction.hash.clone())
    }

    async fn can_mint(&self, _event_id: U256, count: U256) -> Result<U256> {
        let capacity = *self.capacity.lock().unwrap();
        Ok(capacity.map_or(count, |capacity| capacity.min(count)))
    }

    async fn mint_for_multiple(
        &self,
        _signer: &Signer,
        event_id: U256,
        recipients: &[Address],
    ) -> Result<String> {
        let failing = self
            .failing_mints
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |left| {
                left.checked_sub(1)
            });
        if failing.is_ok() {
            return Err(anyhow!("mint reverted"));
        }
        let sequence = self.mint_counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let tx_hash = format!("0x{sequence:064x}");
        self.mints.lock().unwrap().push(MintCall {
            event_id,
            recipients: recipients.iter().map(format_address).collect(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }
}
