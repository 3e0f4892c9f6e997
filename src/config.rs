use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TOKEN_NAMESPACE: &str = "photo:tok";
const DEFAULT_CURRENCY: &str = "ARS";
const DEFAULT_PAYMENT_API_BASE: &str = "https://api.mercadopago.com";

/// Access token security settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TokenSecurityConfig {
    /// Shortest token accepted by generation and validation
    #[serde(default = "default_token_min_length")]
    #[validate(range(min = 8, max = 256))]
    pub min_length: usize,

    /// Length used when minting new tokens
    #[serde(default = "default_token_length")]
    #[validate(range(min = 8, max = 256))]
    pub default_length: usize,

    /// Lifetime of freshly minted tokens, in days
    #[serde(default = "default_token_expiry_days")]
    #[validate(range(min = 1, max = 3650))]
    pub default_expiry_days: i64,

    /// Failed lookups tolerated before a token is blacklisted
    #[serde(default = "default_max_failed_attempts")]
    #[validate(range(min = 1))]
    pub max_failed_attempts: u32,

    /// Validation attempts allowed per token per window
    #[serde(default = "default_max_requests_per_window")]
    #[validate(range(min = 1))]
    pub max_requests_per_window: u32,

    /// Rate limit window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: u64,

    /// How long a blacklist entry lives (seconds)
    #[serde(default = "default_blacklist_ttl_secs")]
    #[validate(range(min = 1))]
    pub blacklist_ttl_secs: u64,

    /// Interval of the expired-blacklist sweep (seconds)
    #[serde(default = "default_cleanup_interval_secs")]
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,

    /// Threshold used by the expiring-soon report, in days
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: i64,

    /// Share abuse state through Redis instead of process memory
    #[serde(default)]
    pub use_redis: bool,

    /// Key namespace inside the security store
    #[serde(default = "default_token_namespace")]
    pub namespace: String,
}

impl Default for TokenSecurityConfig {
    fn default() -> Self {
        Self {
            min_length: default_token_min_length(),
            default_length: default_token_length(),
            default_expiry_days: default_token_expiry_days(),
            max_failed_attempts: default_max_failed_attempts(),
            max_requests_per_window: default_max_requests_per_window(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            blacklist_ttl_secs: default_blacklist_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            expiring_soon_days: default_expiring_soon_days(),
            use_redis: false,
            namespace: default_token_namespace(),
        }
    }
}

impl TokenSecurityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.blacklist_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Checkout behaviour settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Currency used when an event does not carry its own
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Accept `price` in major units or rounded cents besides exact cents
    #[serde(default = "default_true_bool")]
    pub accept_legacy_price_units: bool,

    /// Lifetime of a payment preference (hours)
    #[serde(default = "default_preference_expiry_hours")]
    #[validate(range(min = 1, max = 720))]
    pub preference_expiry_hours: i64,

    /// Pending orders without a preference older than this are cancelled (hours)
    #[serde(default = "default_pending_order_ttl_hours")]
    #[validate(range(min = 1))]
    pub pending_order_ttl_hours: i64,

    /// Interval of the abandoned-order sweep (seconds)
    #[serde(default = "default_pending_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub pending_sweep_interval_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            accept_legacy_price_units: true,
            preference_expiry_hours: default_preference_expiry_hours(),
            pending_order_ttl_hours: default_pending_order_ttl_hours(),
            pending_sweep_interval_secs: default_pending_sweep_interval_secs(),
        }
    }
}

/// Payment gateway client settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Base URL of the gateway REST API
    #[serde(default = "default_payment_api_base")]
    #[validate(url)]
    pub api_base: String,

    /// Bearer credential for the gateway
    #[serde(default)]
    pub access_token: String,

    /// Upper bound for a single gateway call (seconds)
    #[serde(default = "default_payment_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_payment_api_base(),
            access_token: String::new(),
            timeout_secs: default_payment_timeout_secs(),
        }
    }
}

impl PaymentGatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (used when `tokens.use_redis` is set)
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Public base URL of the family-facing site, used for redirect links
    #[validate(url)]
    pub app_base_url: String,

    #[serde(default)]
    #[validate]
    pub tokens: TokenSecurityConfig,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentGatewayConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the connection settings
    pub fn new(
        database_url: String,
        redis_url: String,
        host: String,
        port: u16,
        environment: String,
        app_base_url: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            app_base_url,
            tokens: TokenSecurityConfig::default(),
            checkout: CheckoutConfig::default(),
            payment: PaymentGatewayConfig::default(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if self.tokens.default_length < self.tokens.min_length {
            let mut err = ValidationError::new("token_length");
            err.message = Some("tokens.default_length must be >= tokens.min_length".into());
            errors.add("tokens", err);
        }

        if self.is_production() && self.payment.access_token.trim().is_empty() {
            let mut err = ValidationError::new("payment_access_token");
            err.message =
                Some("Set APP__PAYMENT__ACCESS_TOKEN outside development environments".into());
            errors.add("payment", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true_bool() -> bool {
    true
}
fn default_token_min_length() -> usize {
    20
}
fn default_token_length() -> usize {
    32
}
fn default_token_expiry_days() -> i64 {
    30
}
fn default_max_failed_attempts() -> u32 {
    5
}
fn default_max_requests_per_window() -> u32 {
    30
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_blacklist_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    30 * 60
}
fn default_expiring_soon_days() -> i64 {
    7
}
fn default_token_namespace() -> String {
    DEFAULT_TOKEN_NAMESPACE.to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_preference_expiry_hours() -> i64 {
    24
}
fn default_pending_order_ttl_hours() -> i64 {
    48
}
fn default_pending_sweep_interval_secs() -> u64 {
    60 * 60
}
fn default_payment_api_base() -> String {
    DEFAULT_PAYMENT_API_BASE.to_string()
}
fn default_payment_timeout_secs() -> u64 {
    10
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("photo_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://photo_checkout.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("app_base_url", "http://localhost:3000")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
