use std::sync::Arc;
use std::time::{Duration, Instant};

use sea_orm::DatabaseConnection;

use crate::auth::AuthService;
use crate::faucet::FaucetService;
use crate::reward::RewardService;

/// Upper bound on a single request's work, chain submission included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub auth: Arc<AuthService>,
    pub faucet: Arc<FaucetService>,
    pub rewards: Arc<RewardService>,
    pub rpc_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        auth: Arc<AuthService>,
        faucet: Arc<FaucetService>,
        rewards: Arc<RewardService>,
        rpc_timeout: Duration,
    ) -> Self {
        assert!(
            rpc_timeout < REQUEST_TIMEOUT,
            "RPC timeout must fit inside the request timeout"
        );
        Self {
            database,
            auth,
            faucet,
            rewards,
            rpc_timeout,
            start_time: Instant::now(),
        }
    }
}
