use crate::error::Error;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Errors raised while loading or validating configuration
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the photo service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Label detection configuration
    #[serde(default)]
    pub labels: LabelConfig,
    /// Retry policy shared by every store call
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// MySQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Server hostname
    pub host: String,
    /// Server port
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Login user
    pub user: String,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Database (schema) name
    pub name: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Apply embedded migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

/// S3 storage configuration, also used for the Rekognition client
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket holding image bytes
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Named credential profile
    pub profile: Option<String>,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Attempts made by the SDK itself for each request
    #[serde(default = "default_sdk_max_attempts")]
    pub sdk_max_attempts: u32,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Label detection request parameters
#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    /// Maximum number of labels requested per image
    #[serde(default = "default_max_labels")]
    pub max_labels: i32,
    /// Minimum confidence (0-100) for a label to be returned
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

/// Retry policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Scale applied to the exponential sequence, in seconds
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Lower bound on the wait between attempts, in seconds
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
    /// Upper bound on the wait between attempts, in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "photoapp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_region() -> String {
    "us-east-2".to_string()
}

fn default_sdk_max_attempts() -> u32 {
    3
}

fn default_multipart_threshold() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_part_size() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_max_labels() -> i32 {
    100
}

fn default_min_confidence() -> f32 {
    80.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_min_delay_secs() -> u64 {
    2
}

fn default_max_delay_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from config files and the environment.
    ///
    /// `explicit` names a file that must exist; it overrides the optional
    /// well-known locations and is itself overridden by `PHOTOAPP__*`
    /// environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("service.name", "photoapp")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/photoapp").required(false))
            .add_source(config::File::with_name("/etc/photoapp/photoapp").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        // PHOTOAPP__DATABASE__HOST -> database.host
        let config = builder
            .add_source(
                config::Environment::with_prefix("PHOTOAPP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.host.is_empty() {
            return Err(ConfigError::MissingRequired("database.host".to_string()));
        }
        if self.database.user.is_empty() {
            return Err(ConfigError::MissingRequired("database.user".to_string()));
        }
        if self.database.name.is_empty() {
            return Err(ConfigError::MissingRequired("database.name".to_string()));
        }
        if self.s3.bucket.is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.min_delay_secs > self.retry.max_delay_secs {
            return Err(ConfigError::InvalidValue {
                key: "retry.min_delay_secs".to_string(),
                message: format!(
                    "{} exceeds retry.max_delay_secs ({})",
                    self.retry.min_delay_secs, self.retry.max_delay_secs
                ),
            });
        }
        if !(0.0..=100.0).contains(&self.labels.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "labels.min_confidence".to_string(),
                message: "must be between 0 and 100".to_string(),
            });
        }

        Ok(())
    }

    /// Check that the configured database login is the identity the caller
    /// expects to run as.
    pub fn verify_database_user(&self, expected: &str) -> Result<(), Error> {
        if self.database.user == expected {
            Ok(())
        } else {
            Err(Error::Integrity(format!(
                "expected database user '{}' but configuration names '{}'",
                expected, self.database.user
            )))
        }
    }
}

impl DatabaseConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl RetryConfig {
    /// Get minimum retry delay as Duration
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay_secs)
    }

    /// Get maximum retry delay as Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            max_labels: default_max_labels(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            multiplier: default_multiplier(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}
