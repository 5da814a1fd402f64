//! Configuration for the response cache.
//!
//! Values come from an optional TOML file and `MUNCH_CACHE_*` environment
//! variables (a `.env` file is honoured). Environment variables win over the
//! file. A missing Redis URL is valid: the cache then always calls upstream.
//!
//! ```toml
//! redis_url = "redis://localhost:6379"
//! namespace = "spoonacular"
//! connect_timeout_ms = 2000
//! wait_timeout_ms = 250
//! cooldown_ms = 5000
//! lock_ttl_secs = 30
//! memory_max_items = 10000
//!
//! [policy]
//! builtin = true
//! default_fresh_secs = 3600
//!
//! [[policy.rules]]
//! pattern = "/recipes/*/summary"
//! fresh_secs = 86400
//!
//! [[policy.rules]]
//! pattern = "/mealplanner"
//! kind = "prefix"
//! cache = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::connector::ConnectorConfig;
use crate::stores::{HashMapStoreConfig, memory::DEFAULT_MAX_ITEMS};
use crate::policy::{FreshnessPolicy, FreshnessWindow, MatchKind, PolicyRule};

pub const ENV_REDIS_URL: &str = "MUNCH_CACHE_REDIS_URL";
pub const ENV_NAMESPACE: &str = "MUNCH_CACHE_NAMESPACE";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "MUNCH_CACHE_CONNECT_TIMEOUT_MS";
pub const ENV_WAIT_TIMEOUT_MS: &str = "MUNCH_CACHE_WAIT_TIMEOUT_MS";
pub const ENV_COOLDOWN_MS: &str = "MUNCH_CACHE_COOLDOWN_MS";
pub const ENV_LOCK_TTL_SECS: &str = "MUNCH_CACHE_LOCK_TTL_SECS";
pub const ENV_MEMORY_MAX_ITEMS: &str = "MUNCH_CACHE_MEMORY_MAX_ITEMS";
pub const ENV_CONFIG_PATH: &str = "MUNCH_CACHE_CONFIG";

const DEFAULT_NAMESPACE: &str = "spoonacular";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing store URL (`redis://...` or `memory://`). `None` disables caching.
    pub redis_url: Option<String>,
    /// Prefix of every cache key.
    pub namespace: String,
    pub connect_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub lock_ttl_secs: u64,
    /// Entry cap of the `memory://` store.
    pub memory_max_items: usize,
    pub policy: PolicyConfig,
}

/// Freshness policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Start from the built-in recipe API table.
    pub builtin: bool,
    /// Fresh window for unmatched operations; `0` disables caching for them.
    pub default_fresh_secs: Option<u64>,
    /// Extra rules, added after the built-in ones.
    pub rules: Vec<RuleConfig>,
}

/// One `[[policy.rules]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub kind: MatchKind,
    #[serde(default)]
    pub fresh_secs: Option<u64>,
    /// Derived from `fresh_secs` when omitted.
    #[serde(default)]
    pub stale_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        let connector = ConnectorConfig::default();
        CacheConfig {
            redis_url: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            connect_timeout_ms: connector.connect_timeout.as_millis() as u64,
            wait_timeout_ms: connector.wait_timeout.as_millis() as u64,
            cooldown_ms: connector.cooldown.as_millis() as u64,
            lock_ttl_secs: crate::swr::DEFAULT_LOCK_TTL.as_secs(),
            memory_max_items: DEFAULT_MAX_ITEMS,
            policy: PolicyConfig::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            builtin: true,
            default_fresh_secs: None,
            rules: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case in production.
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "Ignoring unreadable .env file");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = match var(ENV_CONFIG_PATH) {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };

        if let Some(url) = var(ENV_REDIS_URL) {
            config.redis_url = Some(url);
        }
        if let Some(namespace) = var(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        if let Some(v) = var(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = var(ENV_WAIT_TIMEOUT_MS) {
            config.wait_timeout_ms = parse_number(ENV_WAIT_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = var(ENV_COOLDOWN_MS) {
            config.cooldown_ms = parse_number(ENV_COOLDOWN_MS, &v)?;
        }
        if let Some(v) = var(ENV_LOCK_TTL_SECS) {
            config.lock_ttl_secs = parse_number(ENV_LOCK_TTL_SECS, &v)?;
        }
        if let Some(v) = var(ENV_MEMORY_MAX_ITEMS) {
            config.memory_max_items = parse_number(ENV_MEMORY_MAX_ITEMS, &v)? as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace cannot be empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.wait_timeout_ms > self.connect_timeout_ms {
            return Err(ConfigError::Invalid(
                "wait_timeout_ms cannot be greater than connect_timeout_ms".to_string(),
            ));
        }
        if self.cooldown_ms == 0 {
            return Err(ConfigError::Invalid("cooldown_ms must be greater than 0".to_string()));
        }
        if self.lock_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "lock_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.memory_max_items == 0 {
            return Err(ConfigError::Invalid(
                "memory_max_items must be greater than 0".to_string(),
            ));
        }

        self.freshness_policy().map(|_| ())
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            memory_store: HashMapStoreConfig {
                max_items: Some(self.memory_max_items),
            },
        }
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Build the freshness policy described by `[policy]`.
    pub fn freshness_policy(&self) -> Result<FreshnessPolicy, ConfigError> {
        let policy_config = &self.policy;

        let mut policy = if policy_config.builtin {
            FreshnessPolicy::recipe_api()
        } else {
            FreshnessPolicy::new(FreshnessWindow::from_fresh(Duration::from_secs(3600)))
        };

        if let Some(fresh_secs) = policy_config.default_fresh_secs {
            policy = policy.with_default_window(FreshnessWindow::from_fresh(Duration::from_secs(fresh_secs)));
        }

        for rule in &policy_config.rules {
            policy = policy.with_rule(rule.to_rule()?);
        }

        Ok(policy)
    }
}

impl RuleConfig {
    fn to_rule(&self) -> Result<PolicyRule, ConfigError> {
        if self.pattern.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid(format!(
                "policy rule pattern '{}' has no segments",
                self.pattern
            )));
        }
        if !self.cache {
            return Ok(PolicyRule::new(&self.pattern, self.kind, None));
        }

        let fresh_secs = self.fresh_secs.ok_or_else(|| {
            ConfigError::Invalid(format!(
                "policy rule '{}' needs fresh_secs (or cache = false)",
                self.pattern
            ))
        })?;
        let fresh_for = Duration::from_secs(fresh_secs);

        let window = match self.stale_secs {
            Some(stale_secs) => FreshnessWindow::new(fresh_for, Duration::from_secs(stale_secs)),
            None => FreshnessWindow::from_fresh(fresh_for),
        }
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "policy rule '{}': stale_secs must be greater than fresh_secs",
                self.pattern
            ))
        })?;

        Ok(PolicyRule::new(&self.pattern, self.kind, Some(window)))
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{} must be a non-negative integer: {}", name, e)))
}
