//! Governor configuration.
//!
//! Loaded from `~/.usage-governor/config.toml` (every section optional), then
//! overridden by `USAGE_GOVERNOR_*` environment variables, then validated.
//! Validation failures are configuration errors and are meant to stop the
//! process at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GovernorError, Result};
use crate::quota::FeatureFlags;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "USAGE_GOVERNOR_";

/// File name of the usage ledger inside the data directory.
pub const LEDGER_FILE: &str = "usage.json";
/// File name of the response cache inside the data directory.
pub const CACHE_FILE: &str = "responses.json";
/// File name of the append-only usage log inside the data directory.
pub const USAGE_LOG_FILE: &str = "usage_log.jsonl";

/// Call ceilings. All four are enforced simultaneously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    /// Calls per day across all users.
    pub global_daily: u32,
    /// Calls per month across all users.
    pub global_monthly: u32,
    /// Calls per day for a single user.
    pub user_daily: u32,
    /// Calls per month for a single user.
    pub user_monthly: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            global_daily: 100,
            global_monthly: 2000,
            user_daily: 20,
            user_monthly: 400,
        }
    }
}

impl QuotaLimits {
    /// Reject zero limits.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("global_daily", self.global_daily),
            ("global_monthly", self.global_monthly),
            ("user_daily", self.user_daily),
            ("user_monthly", self.user_monthly),
        ] {
            if value == 0 {
                return Err(GovernorError::Config(format!(
                    "limits.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Optional LRU bound. `None` means time-based expiry only.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            max_entries: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub limits: QuotaLimits,
    pub cache: CacheConfig,
    /// Feature kill-switch table.
    pub features: FeatureFlags,
    /// Where the ledger, cache and usage log live. Defaults to [`GovernorConfig::dir`].
    pub data_dir: Option<PathBuf>,
}

impl GovernorConfig {
    /// Default configuration directory: `~/.usage-governor`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".usage-governor")
    }

    /// Default config file path: `~/.usage-governor/config.toml`.
    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config from `path` (or the default path), apply environment
    /// overrides, and validate.
    ///
    /// An explicit `path` that does not exist is an error; a missing default
    /// file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Self::path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GovernorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply `USAGE_GOVERNOR_*` overrides using `lookup` to read variables.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = var("GLOBAL_DAILY_LIMIT") {
            self.limits.global_daily = parse_env("GLOBAL_DAILY_LIMIT", &v)?;
        }
        if let Some(v) = var("GLOBAL_MONTHLY_LIMIT") {
            self.limits.global_monthly = parse_env("GLOBAL_MONTHLY_LIMIT", &v)?;
        }
        if let Some(v) = var("USER_DAILY_LIMIT") {
            self.limits.user_daily = parse_env("USER_DAILY_LIMIT", &v)?;
        }
        if let Some(v) = var("USER_MONTHLY_LIMIT") {
            self.limits.user_monthly = parse_env("USER_MONTHLY_LIMIT", &v)?;
        }
        if let Some(v) = var("CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("CACHE_MAX_ENTRIES") {
            self.cache.max_entries = Some(parse_env("CACHE_MAX_ENTRIES", &v)?);
        }
        if let Some(v) = var("DATA_DIR") {
            if !v.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(v));
            }
        }
        Ok(())
    }

    /// Fail fast on values the governor cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.cache.ttl_secs == 0 {
            return Err(GovernorError::Config(
                "cache.ttl_secs must be greater than zero".into(),
            ));
        }
        if self.cache.max_entries == Some(0) {
            return Err(GovernorError::Config(
                "cache.max_entries must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Self::dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join(LEDGER_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir().join(CACHE_FILE)
    }

    pub fn usage_log_path(&self) -> PathBuf {
        self.data_dir().join(USAGE_LOG_FILE)
    }
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        GovernorError::Config(format!(
            "{ENV_PREFIX}{suffix} has invalid value {value:?}"
        ))
    })
}
