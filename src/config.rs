//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Chain network selection and RPC endpoints
//! - Signature freshness and per-route rate limits
//! - Contract registry and default prize tiers

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::FreshnessWindow;
use crate::chain::{Network, DEFAULT_CHAIN_TIMEOUT};
use crate::gate::ContractRegistry;
use crate::model::Address;
use crate::prize::{validate_tiers, CoveragePolicy, PrizeCalculator, PrizeTier};
use crate::rate_limit::{RateLimit, RateLimiter};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Registry name -> contract address
    #[serde(default)]
    pub contracts: BTreeMap<String, Address>,
    #[serde(default)]
    pub prizes: PrizesConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: Network,
    /// Network name -> JSON-RPC endpoint
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            endpoints: BTreeMap::new(),
            timeout_secs: DEFAULT_CHAIN_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub max_age_secs: i64,
    pub max_future_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let window = FreshnessWindow::default();
        Self {
            max_age_secs: window.max_age_secs,
            max_future_secs: window.max_future_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(flatten)]
    pub default: RateLimit,
    /// Overrides keyed by route
    #[serde(default)]
    pub routes: BTreeMap<String, RateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: RateLimit::default(),
            routes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrizesConfig {
    #[serde(default)]
    pub coverage: CoveragePolicy,
    /// Tiers used when a request does not supply its own
    #[serde(default)]
    pub tiers: Vec<PrizeTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub persist_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            persist_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

/// SQLite location; PostgreSQL is selected with DATABASE_URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "geo-prize.sqlite".to_string(),
        }
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::embedded()?
        };

        config.validate()?;
        Ok(config)
    }

    /// The config.toml compiled into the binary
    pub fn embedded() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
    }

    /// Reject settings the services cannot start with.
    pub fn validate(&self) -> Result<()> {
        validate_tiers(&self.prizes.tiers).context("Invalid default prize tiers")?;
        if self.auth.max_age_secs < 0 || self.auth.max_future_secs < 0 {
            anyhow::bail!("auth windows must not be negative");
        }
        if self.rate_limit.default.window_secs <= 0 {
            anyhow::bail!("rate limit window must be positive");
        }
        for (route, limit) in &self.rate_limit.routes {
            if limit.window_secs <= 0 {
                anyhow::bail!("rate limit window for '{}' must be positive", route);
            }
        }
        Ok(())
    }

    /// Network selector (GEO_NETWORK takes precedence)
    pub fn network(&self) -> Result<Network> {
        match std::env::var("GEO_NETWORK") {
            Ok(value) if !value.is_empty() => value
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid GEO_NETWORK"),
            _ => Ok(self.chain.network),
        }
    }

    /// RPC endpoint for `network` (RPC_URL takes precedence)
    pub fn rpc_url(&self, network: Network) -> Option<String> {
        match std::env::var("RPC_URL") {
            Ok(url) if !url.is_empty() => Some(url),
            _ => self.chain.endpoints.get(&network.to_string()).cloned(),
        }
    }

    pub fn chain_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.timeout_secs)
    }

    /// Server bind address (SERVER_HOST / SERVER_PORT take precedence)
    pub fn bind_address(&self) -> (String, u16) {
        let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| self.server.host.clone());
        let port = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.server.port);
        (host, port)
    }

    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
    }

    pub fn freshness(&self) -> FreshnessWindow {
        FreshnessWindow {
            max_age_secs: self.auth.max_age_secs,
            max_future_secs: self.auth.max_future_secs,
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        self.rate_limit
            .routes
            .iter()
            .fold(RateLimiter::new(self.rate_limit.default), |limiter, (route, limit)| {
                limiter.with_route_limit(route.clone(), *limit)
            })
    }

    pub fn contract_registry(&self) -> ContractRegistry {
        self.contracts
            .iter()
            .map(|(name, address)| (name.clone(), *address))
            .collect()
    }

    pub fn calculator(&self) -> PrizeCalculator {
        PrizeCalculator::new(self.prizes.coverage)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.distribution.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = Config::embedded().unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chain.network, Network::Testnet);
        assert!(config.rpc_url(Network::Mainnet).is_some());
        assert_eq!(config.freshness(), FreshnessWindow::default());
        assert_eq!(config.prizes.coverage, CoveragePolicy::ZeroUncovered);
        assert_eq!(config.prizes.tiers.len(), 3);
        assert!(config.contract_registry().resolve("prize-pool").is_some());
    }

    #[test]
    fn test_route_limits_override_default() {
        let config: Config = toml::from_str(
            r#"
            [rate_limit]
            window_secs = 60
            max_requests = 100

            [rate_limit.routes.distribute]
            window_secs = 30
            max_requests = 2
            "#,
        )
        .unwrap();

        let limiter = config.rate_limiter();
        assert_eq!(limiter.limit_for("distribute").max_requests, 2);
        assert_eq!(limiter.limit_for("preview").max_requests, 100);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.auth.max_age_secs, 300);
        assert_eq!(config.distribution.persist_attempts, 3);
        assert!(config.prizes.tiers.is_empty());
    }

    #[test]
    fn test_invalid_default_tiers_are_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[prizes.tiers]]
            id = "a"
            lower = 1
            upper = 2
            share = { kind = "fraction", numerator = 3, denominator = 4 }

            [[prizes.tiers]]
            id = "b"
            lower = 3
            upper = 3
            share = { kind = "fraction", numerator = 1, denominator = 2 }
            "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_contract_address_fails_to_parse() {
        let parsed: Result<Config, _> = toml::from_str(
            r#"
            [contracts]
            prize-pool = "not-an-address"
            "#,
        );
        assert!(parsed.is_err());
    }
}
