use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const CONFIG_PATH_ENV: &str = "MINTPULSE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub server: Server,
    pub rate_limits: RateLimits,
    pub retention: Retention,
    pub chain: Chain,
    pub cleanup: Cleanup,
    pub observability: Observability,
    pub web: Option<Web>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimits {
    pub window_secs: u64,
    /// Threshold for actions without an entry in `per_action`.
    pub default: u32,
    #[serde(default)]
    pub per_action: HashMap<String, u32>,
}

impl RateLimits {
    pub fn limit_for(&self, action: &str) -> u32 {
        self.per_action.get(action).copied().unwrap_or(self.default)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        let per_action = [
            ("mint_click", 20),
            ("collection_view", 60),
            ("wallet_connect", 10),
            ("page_view", 100),
            ("mint_success", 100),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            window_secs: 60,
            default: 100,
            per_action,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retention {
    pub daily_days: u32,
    pub weekly_days: u32,
    pub idempotency_secs: u64,
}

impl Retention {
    pub fn daily_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.daily_days) * 86_400)
    }

    pub fn weekly_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.weekly_days) * 86_400)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_secs)
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            daily_days: 90,
            weekly_days: 56,
            idempotency_secs: 7 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chain {
    pub enabled: bool,
    pub rpc_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cleanup {
    /// Fraction of requests that kick off a background sweep.
    pub sweep_probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Web {
    pub port: u16,
    pub host: String,
}

impl Config {
    /// Load from `MINTPULSE_CONFIG` if set, otherwise `config/default.toml`.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.rate_limits.window_secs > 0,
            "rate_limits.window_secs must be > 0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.cleanup.sweep_probability),
            "cleanup.sweep_probability must be in [0, 1]"
        );
        anyhow::ensure!(
            self.retention.daily_days > 0 && self.retention.weekly_days > 0,
            "retention windows must be > 0 days"
        );
        anyhow::ensure!(
            self.retention.idempotency_secs > 0,
            "retention.idempotency_secs must be > 0"
        );
        anyhow::ensure!(self.chain.timeout_ms > 0, "chain.timeout_ms must be > 0");
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_TOML: &str = include_str!("../../../config/default.toml");

    #[test]
    fn test_load_default_config() {
        let config = Config::from_toml_str(DEFAULT_TOML).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.rate_limits.limit_for("mint_click"), 20);
        assert_eq!(config.rate_limits.limit_for("collection_view"), 60);
        assert_eq!(config.rate_limits.limit_for("wallet_connect"), 10);
        assert_eq!(config.rate_limits.limit_for("gallery_view"), 100);
        assert_eq!(config.retention.daily_days, 90);
        assert_eq!(config.retention.weekly_days, 56);
        assert_eq!(config.retention.idempotency_ttl(), Duration::from_secs(604_800));
        assert!(config.cleanup.sweep_probability > 0.0);
    }

    #[test]
    fn test_web_config_section() {
        let config = Config::from_toml_str(DEFAULT_TOML).unwrap();
        let web = config.web.expect("web section should be present");
        assert_eq!(web.port, 8090);
        assert_eq!(web.host, "0.0.0.0");
    }

    #[test]
    fn test_rate_limit_defaults_match_config_file() {
        let config = Config::from_toml_str(DEFAULT_TOML).unwrap();
        let defaults = RateLimits::default();
        for action in ["mint_click", "collection_view", "page_view", "click"] {
            assert_eq!(
                config.rate_limits.limit_for(action),
                defaults.limit_for(action)
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let content = DEFAULT_TOML.replace("sweep_probability = 0.01", "sweep_probability = 1.5");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(err
            .to_string()
            .contains("cleanup.sweep_probability must be in [0, 1]"));
    }

    #[test]
    fn test_parse_invalid_config_missing_section() {
        let bad = "
[general]
log_level = \"info\"
";
        assert!(Config::from_toml_str(bad).is_err());
    }
}
