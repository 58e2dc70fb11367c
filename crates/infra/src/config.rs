//! Service configuration.
//!
//! Loaded with the `config` crate from an optional TOML file, then overridden
//! by environment variables such as `SENTINEL__TOKEN__TTL_SECONDS=900`.

use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use sentinel_auth::{Argon2PasswordHasher, HashCost, PasswordPolicy};

use crate::retry::RetryConfig;

const ENV_PREFIX: &str = "SENTINEL";

/// Longest accepted access-token lifetime (31 days).
pub const MAX_TOKEN_TTL_SECONDS: u64 = 31 * 24 * 60 * 60;

/// Longest accepted password age (10 years).
pub const MAX_PASSWORD_EXPIRY_DAYS: u32 = 3650;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub password: PasswordSettings,
    pub token: TokenSettings,
    pub store: StoreSettings,
    pub retry: RetrySettings,
    pub outbox: OutboxSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PasswordSettings {
    /// Age after which a password must be changed. `0` disables age-based expiry.
    pub expires_in_days: u32,
    /// Service-wide secret mixed into password hashes.
    pub pepper: String,
    /// Argon2id memory cost in KiB.
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        let cost = HashCost::default();
        Self {
            expires_in_days: 93,
            pepper: String::new(),
            hash_memory_kib: cost.memory_kib,
            hash_iterations: cost.iterations,
            hash_parallelism: cost.parallelism,
        }
    }
}

impl PasswordSettings {
    pub fn policy(&self) -> PasswordPolicy {
        PasswordPolicy::new(self.expires_in_days)
    }

    pub fn hasher(&self) -> Result<Argon2PasswordHasher, ConfigError> {
        let cost = HashCost {
            memory_kib: self.hash_memory_kib,
            iterations: self.hash_iterations,
            parallelism: self.hash_parallelism,
        };
        Argon2PasswordHasher::new(self.pepper.as_bytes(), cost)
            .map_err(|e| ConfigError::Invalid(format!("password hashing: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenSettings {
    pub ttl_seconds: u64,
    pub signing_secret: String,
    pub issuer: String,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            signing_secret: String::new(),
            issuer: "sentinel".to_string(),
        }
    }
}

impl TokenSettings {
    pub fn ttl(&self) -> Result<chrono::Duration, ConfigError> {
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "token.ttl_seconds must be between 1 and {MAX_TOKEN_TTL_SECONDS}"
            )));
        }
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| ConfigError::Invalid("token.ttl_seconds is out of range".into()))
    }
}

/// Consistency level requested from the persistence backend.
#[derive(Debug, Copy, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    One,
    #[default]
    LocalQuorum,
    Quorum,
    All,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    pub read_consistency: ConsistencyLevel,
    pub write_consistency: ConsistencyLevel,
    pub delete_consistency: ConsistencyLevel,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 500,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutboxSettings {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            batch_size: 100,
        }
    }
}

impl OutboxSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl IdentityConfig {
    /// Load from an optional TOML file plus `SENTINEL__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        Self::build(builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Load from TOML text only (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::build(config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    /// Defaults with the two mandatory secrets filled in.
    pub fn with_secrets(signing_secret: impl Into<String>, pepper: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.token.signing_secret = signing_secret.into();
        config.password.pepper = pepper.into();
        config
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: IdentityConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token.ttl()?;
        if self.password.expires_in_days > MAX_PASSWORD_EXPIRY_DAYS {
            return Err(ConfigError::Invalid(format!(
                "password.expires_in_days must not exceed {MAX_PASSWORD_EXPIRY_DAYS}"
            )));
        }
        if self.token.signing_secret.is_empty() {
            return Err(ConfigError::Invalid("token.signing_secret must be set".into()));
        }
        if self.token.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("token.issuer must not be empty".into()));
        }
        if self.password.pepper.is_empty() {
            return Err(ConfigError::Invalid("password.pepper must be set".into()));
        }
        self.password.hasher()?;
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::Invalid("outbox.batch_size must be greater than zero".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
