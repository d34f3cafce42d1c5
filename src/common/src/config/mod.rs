use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "lethe.toml";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "LETHE_";

/// Document store connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data source name for the document store (e.g. memory://)
    pub dsn: String,
    /// Upper bound for a single store operation
    #[serde(with = "humantime_serde")]
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            op_timeout: Duration::from_secs(5),
        }
    }
}

/// Blob storage settings for subject-owned binary assets
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Data source name for the object store (memory:// or file:///path)
    pub dsn: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

/// Retry policy for transient store failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per cascade step
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Ceiling on the computed backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retrying after the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).round() as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Erasure job execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum number of erasure jobs running concurrently across subjects
    pub max_concurrent: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

/// Export assembly settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Maximum per-entity-type queries in flight for one export
    pub max_concurrent_queries: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Document store configuration
    pub store: StoreConfig,
    /// Blob storage configuration
    pub blob: BlobConfig,
    /// Retry policy for transient store failures
    pub retry: RetryConfig,
    /// Erasure job execution configuration
    pub jobs: JobsConfig,
    /// Export assembly configuration
    pub export: ExportConfig,
}

impl Configuration {
    /// Load configuration from defaults, an optional TOML file, and
    /// `LETHE_`-prefixed environment variables (nested keys split on `__`)
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        figment = match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        };

        figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.store.dsn, "memory://");
        assert_eq!(config.store.op_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.jobs.max_concurrent, 4);
        assert_eq!(config.export.max_concurrent_queries, 8);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::string(
                r#"
                [store]
                dsn = "memory://primary"
                op_timeout = "250ms"

                [retry]
                max_attempts = 5
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.store.dsn, "memory://primary");
        assert_eq!(config.store.op_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.blob.dsn, "memory://");
    }

    #[test]
    fn test_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("lethe.toml", "[jobs]\nmax_concurrent = 2\n")?;
            jail.set_env("LETHE_JOBS__MAX_CONCURRENT", "16");

            let config = Configuration::load(None).expect("config should load");
            assert_eq!(config.jobs.max_concurrent, 16);
            Ok(())
        });
    }

    #[test]
    fn test_backoff_delays_grow_and_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        // Far past the cap
        assert_eq!(retry.delay_for(12), Duration::from_secs(5));
    }
}
