//! Configuration types for docbatch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for both pipelines
///
/// All fields have sensible defaults; a default `Config` retrieves into
/// `./downloads` with 4 concurrent fetches and a 3-attempt retry budget.
/// Validated up front by [`Config::validate`]; configuration errors are
/// fatal and abort before any work starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Destination root for retrieved files (default: "./downloads")
    #[serde(default = "default_destination_root")]
    pub destination_root: PathBuf,

    /// Maximum number of simultaneously in-flight fetches (default: 4)
    ///
    /// This is the worker-pool concurrency ceiling, used to respect the
    /// remote service's rate limit. Must be at least 1.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Retry behavior for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_root: default_destination_root(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration and prepare the destination root
    ///
    /// Creates the destination root if it does not exist and verifies it is
    /// writable. Returns a fatal [`Error::Config`] on any problem so a run
    /// never starts against an unusable configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(Error::Config {
                message: "max_concurrent_fetches must be at least 1".to_string(),
                key: Some("max_concurrent_fetches".to_string()),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "retry.backoff_multiplier must be at least 1.0".to_string(),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }

        std::fs::create_dir_all(&self.destination_root).map_err(|e| Error::Config {
            message: format!(
                "failed to create destination root '{}': {}",
                self.destination_root.display(),
                e
            ),
            key: Some("destination_root".to_string()),
        })?;

        // Probe writability: a read-only destination must fail before any
        // task is dispatched, not on the first completed fetch.
        let probe = self.destination_root.join(".docbatch-write-probe");
        std::fs::write(&probe, b"").map_err(|e| Error::Config {
            message: format!(
                "destination root '{}' is not writable: {}",
                self.destination_root.display(),
                e
            ),
            key: Some("destination_root".to_string()),
        })?;
        std::fs::remove_file(&probe).ok();

        Ok(())
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per task, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_destination_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_values() {
        let config = Config::default();
        assert_eq!(config.destination_root, PathBuf::from("./downloads"));
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert!((config.retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.retry.jitter);
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"initial_delay\":1"));
        assert!(json.contains("\"max_delay\":60"));

        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(back.retry.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrent_fetches: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "max_concurrent_fetches"));
    }

    #[test]
    fn validate_rejects_zero_retry_budget() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            destination_root: temp.path().to_path_buf(),
            retry: RetryConfig {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            destination_root: temp.path().to_path_buf(),
            retry: RetryConfig {
                backoff_multiplier: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_creates_destination_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("nested").join("downloads");
        let config = Config {
            destination_root: root.clone(),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(root.is_dir());
    }
}
