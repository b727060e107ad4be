//! Configuration for the account service.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::services::token::TokenStrategy;

/// Account service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountServiceConfig {
    /// Service configuration.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Persistence deadlines.
    #[serde(default)]
    pub deadlines: DeadlineConfig,
    /// Password sealing configuration.
    #[serde(default)]
    pub password: PasswordConfig,
}

/// Service endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Prefix for every route.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session and cookie lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    /// Sweeper interval in seconds, 0 disables the sweeper.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// How tokens are produced at login.
    #[serde(default)]
    pub token_strategy: TokenStrategy,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` or a Postgres connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum pool size.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Pool acquire timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Apply embedded migrations at start-up.
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Persistence deadlines in milliseconds, per entry point.
#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineConfig {
    /// Signup.
    #[serde(default = "default_signup_deadline")]
    pub signup_ms: u64,
    /// Login.
    #[serde(default = "default_login_deadline")]
    pub login_ms: u64,
    /// Profile reads and writes.
    #[serde(default = "default_profile_deadline")]
    pub profile_ms: u64,
    /// Secret reads and writes.
    #[serde(default = "default_secret_deadline")]
    pub secret_ms: u64,
}

/// Password sealing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_memory_cost")]
    pub memory_cost: u32,
    /// Argon2 time cost (iterations).
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    /// Argon2 parallelism factor.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Output hash length in bytes.
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
}

// Default value functions
const fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_path() -> String {
    "/account".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_session_ttl() -> u64 {
    3600 // 60 minutes
}

const fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_database_url() -> String {
    "memory".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_run_migrations() -> bool {
    true
}

const fn default_signup_deadline() -> u64 {
    1_000
}

const fn default_login_deadline() -> u64 {
    30_000
}

const fn default_profile_deadline() -> u64 {
    30_000
}

const fn default_secret_deadline() -> u64 {
    300_000
}

const fn default_memory_cost() -> u32 {
    19456 // OWASP recommended minimum
}

const fn default_time_cost() -> u32 {
    2
}

const fn default_parallelism() -> u32 {
    1
}

const fn default_hash_length() -> usize {
    32
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: default_base_path(),
            log_format: default_log_format(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
            token_strategy: TokenStrategy::default(),
        }
    }
}

impl SessionConfig {
    /// Session lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Sweeper interval, `None` when disabled.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Option<Duration> {
        if self.cleanup_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cleanup_interval_seconds))
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_seconds: default_connect_timeout(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl DatabaseConfig {
    /// Whether the in-memory backend is selected.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            signup_ms: default_signup_deadline(),
            login_ms: default_login_deadline(),
            profile_ms: default_profile_deadline(),
            secret_ms: default_secret_deadline(),
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
            hash_length: default_hash_length(),
        }
    }
}

impl AccountServiceConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Toml::file("config/local.toml"))
                .merge(Env::prefixed("ACCOUNT_SERVICE_").split("__")),
        )
    }

    /// Extract configuration from an assembled figment.
    ///
    /// # Errors
    ///
    /// Returns an error if the figment does not describe a valid configuration.
    pub fn from_figment(figment: Figment) -> Result<Self, Box<figment::Error>> {
        figment.extract().map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AccountServiceConfig::default();
        assert_eq!(config.service.port, 8000);
        assert_eq!(config.service.base_path, "/account");
        assert_eq!(config.session.ttl(), Duration::from_secs(3600));
        assert_eq!(config.session.token_strategy, TokenStrategy::Random);
        assert!(config.database.is_memory());
        assert_eq!(config.deadlines.signup_ms, 1_000);
        assert_eq!(config.deadlines.secret_ms, 300_000);
        assert_eq!(config.password.memory_cost, 19456);
    }

    #[test]
    fn test_toml_overrides() {
        let toml = r#"
            [session]
            ttl_seconds = 120
            cleanup_interval_seconds = 0
            token_strategy = "derived"

            [database]
            url = "postgres://localhost/accounts"
        "#;
        let config =
            AccountServiceConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();

        assert_eq!(config.session.ttl(), Duration::from_secs(120));
        assert_eq!(config.session.cleanup_interval(), None);
        assert_eq!(config.session.token_strategy, TokenStrategy::Derived);
        assert!(!config.database.is_memory());
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.service.port, 8000);
    }

    #[test]
    fn test_unknown_token_strategy_is_rejected() {
        let toml = "[session]\ntoken_strategy = \"guess\"\n";
        assert!(
            AccountServiceConfig::from_figment(Figment::new().merge(Toml::string(toml))).is_err()
        );
    }
}
