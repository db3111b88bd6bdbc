use crate::ingest::RehostFailurePolicy;
use crate::key_classifier::UnclassifiedPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Record store configuration
    pub database: DatabaseConfig,
    /// Listing fan-out configuration
    #[serde(default)]
    pub listing: ListingConfig,
    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Retry policy for transient store failures
    #[serde(default)]
    pub retry: RetryConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Emit logs as JSON lines
    #[serde(default = "default_true")]
    pub json_logs: bool,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the poster and thumbnail objects
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Timeout for one S3 attempt; `with_backoff` retries on top of it
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

/// Record store (PostgreSQL) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Pool checkout timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Listing fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    /// Maximum signing calls in flight for one listing
    #[serde(default = "default_sign_concurrency")]
    pub sign_concurrency: usize,
    /// Timeout for a single signing call in milliseconds
    #[serde(default = "default_sign_timeout_ms")]
    pub sign_timeout_ms: u64,
    /// Timeout for the whole listing operation in seconds
    #[serde(default = "default_listing_timeout_secs")]
    pub listing_timeout_secs: u64,
    /// What to do with keys outside both thumbnail prefixes
    #[serde(default)]
    pub unclassified: UnclassifiedPolicy,
}

/// Ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// How remote re-host failures are reported to the caller
    #[serde(default)]
    pub rehost_failure_policy: RehostFailurePolicy,
    /// Timeout for fetching a remote image in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Largest accepted upload or remote body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Retry configuration for transient failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    /// Backoff delay ceiling in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "cinemage-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bucket() -> String {
    "cinemage-bucket".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    7200 // 2 hours
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_sign_concurrency() -> usize {
    16
}

fn default_sign_timeout_ms() -> u64 {
    5000
}

fn default_listing_timeout_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024 // 25MB
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::File::with_name("/etc/cinemage/gateway").required(false))
            // GATEWAY__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl S3Config {
    /// Get per-attempt S3 operation timeout as Duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get pool checkout timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl ListingConfig {
    /// Get per-call signing timeout as Duration
    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout_ms)
    }

    /// Get whole-listing timeout as Duration
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }
}

impl IngestConfig {
    /// Get remote fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            json_logs: true,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            sign_concurrency: default_sign_concurrency(),
            sign_timeout_ms: default_sign_timeout_ms(),
            listing_timeout_secs: default_listing_timeout_secs(),
            unclassified: UnclassifiedPolicy::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rehost_failure_policy: RehostFailurePolicy::default(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
