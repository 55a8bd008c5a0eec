mod auth;
mod clock;
mod config;
mod credential;
mod entities;
mod error;
mod ethereum;
mod faucet;
mod http;
mod reconciler;
mod reward;
mod rpc;
mod state;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthService;
use crate::clock::{Clock, SystemClock};
use crate::config::ApiConfig;
use crate::credential::CredentialIssuer;
use crate::ethereum::{Signer, parse_address};
use crate::faucet::FaucetService;
use crate::reconciler::BatchReconciler;
use crate::reward::RewardService;
use crate::rpc::{ChainClient, EthereumChain, RpcClient};
use crate::state::AppState;
use crate::store::Store;
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let rpc_client = RpcClient::new(&config.chain.rpc_url, config.chain.request_timeout())
        .context("Failed to initialize RPC client")?;
    let reward_token =
        parse_address(&config.reward.token_address).context("Invalid reward token address")?;
    let chain: Arc<dyn ChainClient> = Arc::new(EthereumChain::new(
        rpc_client.clone(),
        config.chain.chain_id,
        reward_token,
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Store::new(database.clone());

    let faucet_signer =
        Signer::from_hex(&config.faucet.private_key).context("Invalid faucet private key")?;
    let reward_signer = Signer::from_hex(&config.reward.admin_private_key)
        .context("Invalid reward admin private key")?;
    info!(
        "Faucet account {:?}, reward admin {:?}",
        faucet_signer, reward_signer
    );

    let credentials = CredentialIssuer::new(config.auth.token_key.as_bytes(), Arc::clone(&clock));
    let auth = Arc::new(AuthService::new(
        store.clone(),
        Arc::clone(&clock),
        credentials,
    ));
    let faucet = Arc::new(FaucetService::new(
        store.clone(),
        Arc::clone(&chain),
        Arc::clone(&clock),
        faucet_signer,
        config.chain.chain_id,
        config.faucet.value_gwei,
    ));
    let rewards = Arc::new(RewardService::new(
        store.clone(),
        Arc::clone(&clock),
        config.reward.daily_limit,
    ));

    let reconciler = BatchReconciler::new(
        store.clone(),
        Arc::clone(&chain),
        Arc::clone(&clock),
        reward_signer,
        config.reward.event_id,
        config.reconciler.clone(),
        rewards.lock(),
    );

    let app_state = AppState::new(
        database.clone(),
        auth,
        faucet,
        rewards,
        rpc_client.timeout(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = tokio::spawn(async move {
        if let Err(err) = reconciler.run(shutdown_rx).await {
            error!("Reconciler terminated with error: {err}");
        }
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Wallet rewards API listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = reconciler_handle.await {
        error!("Reconciler task join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &ApiConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.database.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to the database")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
