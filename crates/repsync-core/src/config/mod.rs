//! Engine and client configuration.
//!
//! Every loader takes a `lookup` closure so tests never touch the process
//! environment; `from_env` wraps it with `std::env::vars`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables shared by the reconciler, fan-out service, and insight cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Scheduled passes skip pairs synced more recently than this
    pub cooldown: Duration,
    /// How long a cached insight stays valid
    pub insight_freshness: Duration,
    /// Pushed tombstones older than this are physically purged
    pub tombstone_retention: Duration,
    /// Records applied per fan-out batch
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::hours(1),
            insight_freshness: Duration::hours(24),
            tombstone_retention: Duration::days(30),
            batch_size: 100,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Read overrides: `SYNC_COOLDOWN_SECS`, `INSIGHT_FRESHNESS_SECS`,
    /// `TOMBSTONE_RETENTION_DAYS`, `SYNC_BATCH_SIZE`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let cooldown_secs = bounded(&lookup, "SYNC_COOLDOWN_SECS", 3_600, 0..=86_400)?;
        let freshness_secs = bounded(&lookup, "INSIGHT_FRESHNESS_SECS", 86_400, 60..=604_800)?;
        let retention_days = bounded(&lookup, "TOMBSTONE_RETENTION_DAYS", 30, 1..=365)?;
        let batch_size = bounded(&lookup, "SYNC_BATCH_SIZE", 100, 1..=1_000)?;

        Ok(Self {
            cooldown: Duration::seconds(cooldown_secs),
            insight_freshness: Duration::seconds(freshness_secs),
            tombstone_retention: Duration::days(retention_days),
            batch_size: usize::try_from(batch_size)
                .map_err(|_| ConfigError::Invalid("SYNC_BATCH_SIZE is out of range".to_string()))?,
        })
    }
}

/// Settings for the on-device CLI client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// On-device store location
    pub db_path: PathBuf,
    /// Signed-in user
    pub user_id: Option<String>,
    /// Relational backing store URL (`libsql://`, `https://` or a file path)
    pub relational_url: Option<String>,
    pub relational_auth_token: Option<String>,
    pub sync: SyncSettings,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = match optional_trimmed(&lookup, "REPSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        Ok(Self {
            db_path,
            user_id: optional_trimmed(&lookup, "REPSYNC_USER_ID"),
            relational_url: optional_trimmed(&lookup, "RELATIONAL_DATABASE_URL"),
            relational_auth_token: optional_trimmed(&lookup, "RELATIONAL_AUTH_TOKEN"),
            sync: SyncSettings::from_lookup(&lookup)?,
        })
    }

    /// The user id, or an error naming the variable to set
    pub fn require_user(&self) -> Result<&str, ConfigError> {
        self.user_id
            .as_deref()
            .ok_or(ConfigError::MissingVar("REPSYNC_USER_ID"))
    }
}

/// `<platform data dir>/repsync/repsync.db`
pub fn default_db_path() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join("repsync").join("repsync.db"))
        .ok_or_else(|| {
            ConfigError::Invalid(
                "no platform data directory found; set REPSYNC_DB_PATH".to_string(),
            )
        })
}

/// Parse an integer variable with a default, rejecting values outside `range`
pub fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: i64,
    range: std::ops::RangeInclusive<i64>,
) -> Result<i64, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<i64>().map_err(|_| invalid())?,
        None => default,
    };
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    crate::util::normalize_text_option(lookup(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn settings_default_to_reference_windows() {
        let map = HashMap::new();
        let settings = SyncSettings::from_lookup(lookup(&map)).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.cooldown, Duration::hours(1));
        assert_eq!(settings.insight_freshness, Duration::hours(24));
        assert_eq!(settings.tombstone_retention, Duration::days(30));
        assert_eq!(settings.batch_size, 100);
    }

    #[test]
    fn settings_accept_overrides() {
        let map = HashMap::from([("SYNC_COOLDOWN_SECS", "0"), ("SYNC_BATCH_SIZE", " 25 ")]);
        let settings = SyncSettings::from_lookup(lookup(&map)).unwrap();
        assert_eq!(settings.cooldown, Duration::zero());
        assert_eq!(settings.batch_size, 25);
    }

    #[test]
    fn settings_reject_out_of_range_values() {
        let map = HashMap::from([("SYNC_BATCH_SIZE", "0")]);
        let err = SyncSettings::from_lookup(lookup(&map)).unwrap_err();
        assert!(err.to_string().contains("SYNC_BATCH_SIZE"));

        let map = HashMap::from([("TOMBSTONE_RETENTION_DAYS", "soon")]);
        assert!(SyncSettings::from_lookup(lookup(&map)).is_err());
    }

    #[test]
    fn client_config_reads_paths_and_user() {
        let map = HashMap::from([
            ("REPSYNC_DB_PATH", "/tmp/repsync-test.db"),
            ("REPSYNC_USER_ID", "user-1"),
        ]);
        let config = ClientConfig::from_lookup(lookup(&map)).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/repsync-test.db"));
        assert_eq!(config.require_user().unwrap(), "user-1");
        assert!(config.relational_url.is_none());
    }

    #[test]
    fn client_config_requires_user_for_sync() {
        let map = HashMap::new();
        let config = ClientConfig::from_lookup(lookup(&map)).unwrap();
        assert_eq!(config.db_path, default_db_path().unwrap());
        let err = config.require_user().unwrap_err();
        assert!(err.to_string().contains("REPSYNC_USER_ID"));
    }

    #[test]
    fn default_db_path_lives_in_the_platform_data_dir() {
        let path = default_db_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("repsync/repsync.db"));
        assert!(path.starts_with(dirs::data_dir().unwrap()));
    }
}
