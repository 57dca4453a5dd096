//! Configuration types.
//!
//! One validated [`Config`] is built at startup and shared (via `Arc`) with
//! every component. Missing or out-of-range settings fail startup.

use std::time::Duration;

use crate::error::ConfigError;

/// Default minutes between full-history scans.
pub const DEFAULT_SCAN_INTERVAL_MINUTES: u64 = 30;

/// Accepted scan interval range, in minutes.
pub const SCAN_INTERVAL_BOUNDS: (u64, u64) = (5, 1440);

/// Default maximum stored message length (characters).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 16_000;

/// Default number of recent messages fetched per conversation during a scan.
pub const DEFAULT_SCAN_MESSAGE_LIMIT: usize = 100;

/// Default pre-filter keywords. Matched case-insensitively as word prefixes.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "rent",
    "lease",
    "sale",
    "sell",
    "buy",
    "listing",
    "property",
    "properties",
    "real estate",
    "apartment",
    "flat",
    "house",
    "condo",
    "villa",
    "studio",
    "bedroom",
    "bhk",
    "plot",
    "tenant",
    "landlord",
];

/// Session connection policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between connect attempts.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Core configuration shared by every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform name recorded on every persisted record.
    pub platform_name: String,
    /// Contacts that receive signal notifications.
    pub allowed_numbers: Vec<String>,
    /// Groups that receive signal notifications.
    pub allowed_groups: Vec<String>,
    /// Time between scheduled scans.
    pub scan_interval: Duration,
    /// Stored message bodies are truncated to this many characters.
    pub max_message_length: usize,
    /// Recent messages fetched per conversation during a scan.
    pub scan_message_limit: usize,
    /// Pre-filter keywords.
    pub keywords: Vec<String>,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform_name: "whatsapp".to_string(),
            allowed_numbers: Vec::new(),
            allowed_groups: Vec::new(),
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_MINUTES * 60),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            scan_message_limit: DEFAULT_SCAN_MESSAGE_LIMIT,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let allowed_numbers = match lookup("REALTY_ALLOWED_NUMBERS") {
            Some(raw) => split_list(&raw),
            None => {
                return Err(ConfigError::MissingRequired {
                    key: "REALTY_ALLOWED_NUMBERS".into(),
                    hint: "Set a comma-separated list of contacts to notify".into(),
                });
            }
        };
        let allowed_groups = lookup("REALTY_ALLOWED_GROUPS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let scan_minutes = parse_or(
            &lookup,
            "REALTY_SCAN_INTERVAL_MIN",
            DEFAULT_SCAN_INTERVAL_MINUTES,
        )?;
        let (min, max) = SCAN_INTERVAL_BOUNDS;
        if !(min..=max).contains(&scan_minutes) {
            return Err(ConfigError::InvalidValue {
                key: "REALTY_SCAN_INTERVAL_MIN".into(),
                message: format!("must be a whole number of minutes in {min}..={max}"),
            });
        }
        let max_message_length = parse_or(
            &lookup,
            "REALTY_MAX_MESSAGE_LENGTH",
            DEFAULT_MAX_MESSAGE_LENGTH,
        )?;
        let scan_message_limit = parse_or(
            &lookup,
            "REALTY_SCAN_MESSAGE_LIMIT",
            DEFAULT_SCAN_MESSAGE_LIMIT,
        )?;

        let keywords = lookup("REALTY_KEYWORDS")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.keywords);

        let platform_name = lookup("REALTY_PLATFORM")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.platform_name);

        let config = Self {
            platform_name,
            allowed_numbers,
            allowed_groups,
            scan_interval: Duration::from_secs(scan_minutes * 60),
            max_message_length,
            scan_message_limit,
            keywords,
            session: SessionConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the components rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_numbers.is_empty() && self.allowed_groups.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "REALTY_ALLOWED_NUMBERS".into(),
                hint: "At least one contact or group must receive notifications".into(),
            });
        }

        let minutes = self.scan_interval.as_secs() / 60;
        let (min, max) = SCAN_INTERVAL_BOUNDS;
        if self.scan_interval.as_secs() % 60 != 0 || minutes < min || minutes > max {
            return Err(ConfigError::InvalidValue {
                key: "REALTY_SCAN_INTERVAL_MIN".into(),
                message: format!("must be a whole number of minutes in {min}..={max}"),
            });
        }

        if self.max_message_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REALTY_MAX_MESSAGE_LENGTH".into(),
                message: "must be greater than zero".into(),
            });
        }

        if self.scan_message_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REALTY_SCAN_MESSAGE_LIMIT".into(),
                message: "must be greater than zero".into(),
            });
        }

        if self.keywords.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "REALTY_KEYWORDS".into(),
                message: "at least one pre-filter keyword is required".into(),
            });
        }

        if self.session.connect_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session.connect_attempts".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(())
    }

    /// Notification audience: contacts first, then groups.
    pub fn audience(&self) -> Vec<String> {
        self.allowed_numbers
            .iter()
            .chain(self.allowed_groups.iter())
            .cloned()
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
