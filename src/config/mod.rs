use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::ethereum;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub auth: AuthConfig,
    pub faucet: FaucetConfig,
    pub reward: RewardConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Optional TOML file holding secrets, merged over the main file.
    #[serde(default)]
    pub credentials_path: Option<String>,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("REWARDS_API_CONFIG")
            .unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("REWARDS_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;

        // Secrets live in a separate file so the main one can be committed.
        let settings = match settings.get_string("credentials_path") {
            Ok(credentials) if !credentials.is_empty() => Config::builder()
                .add_source(settings)
                .add_source(File::new(&credentials, FileFormat::Toml).required(true))
                .build()
                .map_err(|err| map_config_error(err, &credentials))?,
            _ => settings,
        };

        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(self.chain.chain_id > 0, "Chain id must be positive");
        assert!(
            self.auth.token_key.len() >= 16,
            "Token key must be at least 16 bytes"
        );
        assert!(self.faucet.value_gwei > 0, "Faucet payout must be positive");
        assert!(
            self.reward.daily_limit > 0,
            "Reward daily limit must be positive"
        );
        ethereum::Signer::from_hex(&self.faucet.private_key)
            .context("Invalid faucet private key")?;
        ethereum::Signer::from_hex(&self.reward.admin_private_key)
            .context("Invalid reward admin private key")?;
        ethereum::parse_address(&self.reward.token_address)
            .context("Invalid reward token address")?;
        self.reconciler.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub request_timeout_ms: Option<u64>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(3_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(
            millis < 5_000,
            "RPC timeout must stay under the 5 second request timeout"
        );
        Duration::from_millis(millis)
    }
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens
    pub token_key: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct FaucetConfig {
    pub private_key: String,
    /// Payout per wallet, in gwei
    pub value_gwei: u64,
}

impl std::fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("value_gwei", &self.value_gwei)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
pub struct RewardConfig {
    pub token_address: String,
    pub admin_private_key: String,
    pub event_id: u64,
    pub daily_limit: u32,
}

impl std::fmt::Debug for RewardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardConfig")
            .field("token_address", &self.token_address)
            .field("event_id", &self.event_id)
            .field("daily_limit", &self.daily_limit)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "ReconcilerConfig::default_period_seconds")]
    pub period_seconds: u64,
    #[serde(default = "ReconcilerConfig::default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            period_seconds: Self::default_period_seconds(),
            batch_size: Self::default_batch_size(),
        }
    }
}

impl ReconcilerConfig {
    pub fn period(&self) -> Duration {
        assert!(self.period_seconds >= 1, "Reconciler period must be >= 1s");
        Duration::from_secs(self.period_seconds)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.period_seconds >= 1,
            "Reconciler period must be at least one second"
        );
        assert!(
            self.period_seconds <= 86_400,
            "Reconciler period cannot exceed one day"
        );
        assert!(self.batch_size > 0, "Batch size must be positive");
        assert!(self.batch_size <= 1_000, "Batch size exceeds defensive limit");
        Ok(())
    }

    const fn default_period_seconds() -> u64 {
        300
    }

    const fn default_batch_size() -> usize {
        100
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
