use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

use crate::checkin::DEFAULT_MAX_DISTANCE_M;
use crate::rate_limit::{ActionKind, RateLimitConfig, RateLimitPolicy};
use crate::session::SessionPolicy;

/// Configuration for the trust engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Session and lockdown policy
    pub session: SessionPolicy,
    /// Check-in verification configuration
    pub checkin: CheckinConfig,
    /// Per-action rate-limit ceilings
    pub rate_limits: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory fallback)
    pub postgres_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug)
    pub level: String,
    /// Enable request/response logging
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinConfig {
    /// Geofence radius in meters
    pub max_distance_meters: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/trustgate".to_string(),
            postgres_enabled: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8580,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: true,
            },
            session: SessionPolicy::default(),
            checkin: CheckinConfig {
                max_distance_meters: DEFAULT_MAX_DISTANCE_M,
            },
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server configuration
        if let Ok(host) = env::var("TRUSTGATE_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = env::var("TRUSTGATE_PORT") {
            config.server.port = port.parse().context("Invalid TRUSTGATE_PORT value")?;
        }

        // Database configuration
        if let Ok(url) = env::var("TRUSTGATE_POSTGRES_URL") {
            config.database.postgres_url = url;
        }

        if let Ok(enabled) = env::var("TRUSTGATE_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("Invalid TRUSTGATE_POSTGRES_ENABLED value")?;
        }

        // Logging configuration
        if let Ok(log_level) = env::var("TRUSTGATE_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        if let Ok(log_requests) = env::var("TRUSTGATE_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("Invalid TRUSTGATE_LOG_REQUESTS value")?;
        }

        // Session policy
        if let Ok(threshold) = env::var("TRUSTGATE_FAILED_LOGIN_THRESHOLD") {
            config.session.failed_login_threshold = threshold
                .parse()
                .context("Invalid TRUSTGATE_FAILED_LOGIN_THRESHOLD value")?;
        }

        if let Ok(minutes) = env::var("TRUSTGATE_FAILED_LOGIN_WINDOW_MINUTES") {
            config.session.failed_login_window_minutes = minutes
                .parse()
                .context("Invalid TRUSTGATE_FAILED_LOGIN_WINDOW_MINUTES value")?;
        }

        if let Ok(minutes) = env::var("TRUSTGATE_LOCKOUT_MINUTES") {
            config.session.lockout_minutes = minutes
                .parse()
                .context("Invalid TRUSTGATE_LOCKOUT_MINUTES value")?;
        }

        if let Ok(threshold) = env::var("TRUSTGATE_ACCOUNT_LOCK_THRESHOLD") {
            config.session.account_lock_threshold = threshold
                .parse()
                .context("Invalid TRUSTGATE_ACCOUNT_LOCK_THRESHOLD value")?;
        }

        // Check-in configuration
        if let Ok(meters) = env::var("TRUSTGATE_CHECKIN_MAX_DISTANCE_METERS") {
            config.checkin.max_distance_meters = meters
                .parse()
                .context("Invalid TRUSTGATE_CHECKIN_MAX_DISTANCE_METERS value")?;
        }

        // Rate-limit overrides, one variable per action kind
        config.load_rate_limit_overrides()?;

        config.validate()?;

        Ok(config)
    }

    /// Per-action ceiling overrides: `TRUSTGATE_LIMIT_<ACTION>=<max>/<window_minutes>`,
    /// e.g. `TRUSTGATE_LIMIT_COMMENT=10/1`.
    fn load_rate_limit_overrides(&mut self) -> Result<()> {
        let actions = [
            ActionKind::Comment,
            ActionKind::Like,
            ActionKind::Follow,
            ActionKind::Tip,
            ActionKind::Report,
            ActionKind::Post,
            ActionKind::Message,
            ActionKind::RewardClaim,
        ];

        for action in actions {
            let var = format!("TRUSTGATE_LIMIT_{}", action.as_str().to_uppercase());
            if let Ok(raw) = env::var(&var) {
                let (max, window) = raw
                    .split_once('/')
                    .with_context(|| format!("{var} must be <max>/<window_minutes>"))?;
                let policy = RateLimitPolicy::new(
                    max.trim().parse().with_context(|| format!("Invalid {var} max"))?,
                    window
                        .trim()
                        .parse()
                        .with_context(|| format!("Invalid {var} window"))?,
                );
                self.rate_limits.set_policy(action, policy);
                info!(
                    action = action.as_str(),
                    max_count = policy.max_count,
                    window_minutes = policy.window_minutes,
                    "rate-limit override applied"
                );
            }
        }

        Ok(())
    }

    /// Validate configuration for consistency
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but TRUSTGATE_POSTGRES_URL is empty"
            ));
        }

        if !self.checkin.max_distance_meters.is_finite() || self.checkin.max_distance_meters <= 0.0
        {
            return Err(anyhow::anyhow!(
                "Check-in max distance must be a positive number of meters"
            ));
        }

        if self.session.failed_login_threshold == 0 {
            return Err(anyhow::anyhow!(
                "Failed-login threshold must be at least 1"
            ));
        }

        for (action, policy) in &self.rate_limits.policies {
            if policy.max_count == 0 || policy.window_minutes == 0 {
                return Err(anyhow::anyhow!(
                    "Rate limit for {} must have non-zero max and window",
                    action.as_str()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = EngineConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_distance_rejected() {
        let mut config = EngineConfig::default();
        config.checkin.max_distance_meters = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_enabled_requires_url() {
        let mut config = EngineConfig::default();
        config.database.postgres_enabled = true;
        config.database.postgres_url = String::new();
        assert!(config.validate().is_err());
    }
}
