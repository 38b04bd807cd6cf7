//! Runtime settings.
//!
//! Loaded with the `config` crate from an optional TOML file, then overlaid
//! with `SCENE_*` environment variables (`__` separates nested keys):
//!
//! | Key                               | Env                                 | Default          |
//! |-----------------------------------|-------------------------------------|------------------|
//! | `sync.max_gap`                    | `SCENE_SYNC__MAX_GAP`               | `256`            |
//! | `sync.backoff_base_ms`            | `SCENE_SYNC__BACKOFF_BASE_MS`       | `500`            |
//! | `sync.backoff_max_ms`             | `SCENE_SYNC__BACKOFF_MAX_MS`        | `30000`          |
//! | `sync.max_reconnect_attempts`     | `SCENE_SYNC__MAX_RECONNECT_ATTEMPTS`| `8`              |
//! | `server.listen`                   | `SCENE_SERVER__LISTEN`              | `127.0.0.1:7420` |
//! | `server.push_buffer`              | `SCENE_SERVER__PUSH_BUFFER`         | `1024`           |
//! | `server.max_range`                | `SCENE_SERVER__MAX_RANGE`           | `10000`          |

use crate::connection::Backoff;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Largest gap (in operations) recovered by a range fetch; anything
    /// wider triggers a full sync.
    pub max_gap: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_gap: 256,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_reconnect_attempts: 8,
        }
    }
}

impl SyncConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address.
    pub listen: String,
    /// Capacity of the push broadcast channel.  Subscribers that fall this
    /// far behind are told they lagged and resync.
    pub push_buffer: usize,
    /// Widest `missing_range` request the server answers.
    pub max_range: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7420".into(),
            push_buffer: 1024,
            max_range: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncConfig,
    pub server: ServerConfig,
}

impl Settings {
    /// Defaults, then `path` (if given, must exist), then `SCENE_*` env.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("SCENE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.backoff_base_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.sync.backoff_max_ms < self.sync.backoff_base_ms {
            return Err(ConfigError::Invalid {
                key: "sync.backoff_max_ms",
                reason: format!("must be at least backoff_base_ms ({})", self.sync.backoff_base_ms),
            });
        }
        if self.server.push_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "server.push_buffer",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.sync.max_gap, SyncConfig::default().max_gap);
        assert_eq!(settings.server.listen, "127.0.0.1:7420");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sync]\nmax_gap = 16\n\n[server]\nmax_range = 50").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.sync.max_gap, 16);
        assert_eq!(settings.sync.backoff_base_ms, 500);
        assert_eq!(settings.server.max_range, 50);
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sync]\nbackoff_base_ms = 1000\nbackoff_max_ms = 10").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "sync.backoff_max_ms", .. }));
    }

    #[test]
    fn backoff_is_built_from_millis() {
        let b = SyncConfig::default().backoff();
        assert_eq!(b.base, Duration::from_millis(500));
        assert_eq!(b.max, Duration::from_secs(30));
        assert_eq!(b.max_attempts, 8);
    }
}
