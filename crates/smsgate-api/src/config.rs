//! Configuration management for the smsgate ingestion service.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use smsgate_core::StorageConfig;

use crate::{crypto::VerifierConfig, identity::IdentityConfig};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The auth token and webhook URL have no usable default and must be set.
///
/// # Example
///
/// ```no_run
/// use smsgate_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Provider
    /// Provider auth token used as the signing secret.
    ///
    /// Environment variable: `TWILIO_AUTH_TOKEN`
    #[serde(default, alias = "TWILIO_AUTH_TOKEN")]
    pub twilio_auth_token: String,
    /// Public URL the provider is configured to call, used verbatim when
    /// recomputing signatures.
    ///
    /// Environment variable: `WEBHOOK_URL`
    #[serde(default, alias = "WEBHOOK_URL")]
    pub webhook_url: String,

    // Database
    /// SQLite database file, created if missing.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[serde(default = "default_database_path", alias = "DATABASE_PATH")]
    pub database_path: PathBuf,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// How long a write waits on a locked database, in milliseconds.
    ///
    /// Environment variable: `DATABASE_BUSY_TIMEOUT_MS`
    #[serde(default = "default_busy_timeout_ms", alias = "DATABASE_BUSY_TIMEOUT_MS")]
    pub database_busy_timeout_ms: u64,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Identity
    /// Argon2id memory cost in KiB.
    ///
    /// Environment variable: `IDENTITY_MEMORY_COST_KIB`
    #[serde(default = "default_memory_cost_kib", alias = "IDENTITY_MEMORY_COST_KIB")]
    pub identity_memory_cost_kib: u32,
    /// Argon2id iterations.
    ///
    /// Environment variable: `IDENTITY_TIME_COST`
    #[serde(default = "default_time_cost", alias = "IDENTITY_TIME_COST")]
    pub identity_time_cost: u32,
    /// Argon2id lanes.
    ///
    /// Environment variable: `IDENTITY_PARALLELISM`
    #[serde(default = "default_parallelism", alias = "IDENTITY_PARALLELISM")]
    pub identity_parallelism: u32,
    /// Identity digest length in bytes.
    ///
    /// Environment variable: `IDENTITY_OUTPUT_LEN`
    #[serde(default = "default_output_len", alias = "IDENTITY_OUTPUT_LEN")]
    pub identity_output_len: usize,
    /// Fixed application salt. Changing it changes every identity.
    ///
    /// Environment variable: `IDENTITY_SALT`
    #[serde(default = "default_identity_salt", alias = "IDENTITY_SALT")]
    pub identity_salt: String,
    /// Identity derivations allowed to run at once.
    ///
    /// Environment variable: `IDENTITY_MAX_CONCURRENT`
    #[serde(default = "default_identity_max_concurrent", alias = "IDENTITY_MAX_CONCURRENT")]
    pub identity_max_concurrent: usize,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to storage configuration.
    pub fn to_storage_config(&self) -> StorageConfig {
        StorageConfig {
            path: self.database_path.clone(),
            max_connections: self.database_max_connections,
            busy_timeout: Duration::from_millis(self.database_busy_timeout_ms),
        }
    }

    /// Convert to identity deriver configuration.
    pub fn to_identity_config(&self) -> IdentityConfig {
        IdentityConfig {
            memory_cost_kib: self.identity_memory_cost_kib,
            time_cost: self.identity_time_cost,
            parallelism: self.identity_parallelism,
            output_len: self.identity_output_len,
            salt: self.identity_salt.clone(),
            max_concurrent: self.identity_max_concurrent,
        }
    }

    /// Convert to signature verifier configuration.
    pub fn to_verifier_config(&self) -> VerifierConfig {
        VerifierConfig::new(&self.twilio_auth_token, &self.webhook_url)
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get the auth token masked for logging, keeping the last four
    /// characters.
    pub fn auth_token_masked(&self) -> String {
        let chars: Vec<char> = self.twilio_auth_token.chars().collect();
        if chars.len() <= 4 {
            return "***".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{tail}")
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.twilio_auth_token.is_empty() {
            anyhow::bail!("TWILIO_AUTH_TOKEN must be set");
        }

        if self.webhook_url.is_empty() {
            anyhow::bail!("WEBHOOK_URL must be set");
        }

        if !(self.webhook_url.starts_with("https://") || self.webhook_url.starts_with("http://")) {
            anyhow::bail!("WEBHOOK_URL must be an absolute http(s) URL");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.request_timeout == 0 {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        self.to_identity_config().params().context("invalid identity configuration")?;

        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("twilio_auth_token", &self.auth_token_masked())
            .field("webhook_url", &self.webhook_url)
            .field("database_path", &self.database_path)
            .field("database_max_connections", &self.database_max_connections)
            .field("database_busy_timeout_ms", &self.database_busy_timeout_ms)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("request_timeout", &self.request_timeout)
            .field("identity_memory_cost_kib", &self.identity_memory_cost_kib)
            .field("identity_time_cost", &self.identity_time_cost)
            .field("identity_parallelism", &self.identity_parallelism)
            .field("identity_output_len", &self.identity_output_len)
            .field("identity_max_concurrent", &self.identity_max_concurrent)
            .field("rust_log", &self.rust_log)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let identity = IdentityConfig::default();
        Self {
            twilio_auth_token: String::new(),
            webhook_url: String::new(),
            database_path: default_database_path(),
            database_max_connections: default_max_connections(),
            database_busy_timeout_ms: default_busy_timeout_ms(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            identity_memory_cost_kib: identity.memory_cost_kib,
            identity_time_cost: identity.time_cost,
            identity_parallelism: identity.parallelism,
            identity_output_len: identity.output_len,
            identity_salt: identity.salt,
            identity_max_concurrent: identity.max_concurrent,
            rust_log: default_log_level(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("smsgate.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_memory_cost_kib() -> u32 {
    IdentityConfig::default().memory_cost_kib
}

fn default_time_cost() -> u32 {
    IdentityConfig::default().time_cost
}

fn default_parallelism() -> u32 {
    IdentityConfig::default().parallelism
}

fn default_output_len() -> usize {
    IdentityConfig::default().output_len
}

fn default_identity_salt() -> String {
    IdentityConfig::default().salt
}

fn default_identity_max_concurrent() -> usize {
    IdentityConfig::default().max_concurrent
}

fn default_log_level() -> String {
    "info".to_string()
}
