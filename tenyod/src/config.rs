//! Daemon configuration.
//!
//! Loads configuration from environment variables once at startup. Required
//! values fail loudly; everything else has a documented default.

use rust_decimal::Decimal;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tenyo_connectors::OkxClientConfig;
use tenyo_domain::OkxCredentials;
use tenyo_engine::{RiskParameters, StalenessFilter};

use crate::error::{DaemonError, DaemonResult};

/// Default OKX endpoint
const DEFAULT_OKX_URL: &str = "https://www.okx.com";

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Venue connection
    pub okx: OkxConfig,

    /// Protection cycle and poller settings
    pub protection: ProtectionConfig,

    /// PostgreSQL URL; `None` selects the in-memory store
    pub database_url: Option<String>,

    /// Log sinks and format
    pub logging: LoggingConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// OKX connection configuration.
#[derive(Debug, Clone)]
pub struct OkxConfig {
    /// REST base URL
    pub base_url: String,
    /// API credentials; only optional in the test environment
    pub credentials: Option<OkxCredentials>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Demo trading account
    pub simulated: bool,
}

/// Protection settings.
#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    /// Seconds between account polls
    pub poll_interval_secs: u64,
    /// Seconds between protection cycles
    pub check_interval_secs: u64,
    /// Snapshots older than this are ignored
    pub staleness_threshold_secs: u64,
    /// Fractional distance from entry to the stop-loss (0.01 = 1%)
    pub volatility_pct: Decimal,
    /// Take-profit distance as a multiple of the stop-loss distance
    pub profit_loss_ratio: Decimal,
    /// Smallest uncovered size worth sending; `None` disables the floor
    pub min_order_size: Option<Decimal>,
    /// When false, cycles analyse and log but place nothing
    pub enabled: bool,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Log sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Format shared by every sink
    pub format: LogFormat,
    /// Write to stdout
    pub console: bool,
    /// Rolling log file; `None` disables the file sink
    pub file: Option<LogFileConfig>,
}

/// Rolling log file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileConfig {
    /// Directory holding the current and rotated files
    pub directory: PathBuf,
    /// File name; rotated files get a date suffix
    pub file_name: String,
    /// How often a new file is started
    pub rotation: LogRotation,
    /// Rotated files kept before the oldest is deleted
    pub max_files: usize,
}

/// Log file rotation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// New file every hour
    Hourly,
    /// New file every day
    Daily,
    /// Single file, never rotated
    Never,
}

impl LogFileConfig {
    /// Rotated files kept by default
    pub const DEFAULT_MAX_FILES: usize = 7;

    /// Split `path` into directory and file name. A bare file name lands in
    /// the working directory.
    pub fn new(path: &str, rotation: LogRotation, max_files: usize) -> DaemonResult<Self> {
        let raw = path.trim();
        let path = Path::new(raw);
        let file_name = path
            .file_name()
            .filter(|_| !raw.ends_with(std::path::is_separator))
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "TENYO_LOG_FILE must name a file, got {:?}",
                    path.display().to_string()
                ))
            })?
            .to_string();
        if max_files == 0 {
            return Err(DaemonError::Config(
                "TENYO_LOG_MAX_FILES must be at least 1".to_string(),
            ));
        }

        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            directory,
            file_name,
            rotation,
            max_files,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            console: true,
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let okx = Self::load_okx_config(environment)?;
        let protection = Self::load_protection_config()?;
        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
        let logging = Self::load_logging_config()?;

        let config = Self {
            api,
            okx,
            protection,
            database_url,
            logging,
            environment,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            environment: Environment::Test,
            ..Self::default()
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> DaemonResult<()> {
        self.protection.staleness_filter()?;
        self.protection.risk_parameters()?;

        if let Some(min) = self.protection.min_order_size {
            if min <= Decimal::ZERO {
                return Err(DaemonError::Config(format!(
                    "TENYO_MIN_ORDER_SIZE must be positive, got {}",
                    min
                )));
            }
        }
        if !self.logging.console && self.logging.file.is_none() {
            return Err(DaemonError::Config(
                "TENYO_LOG_CONSOLE=false requires TENYO_LOG_FILE".to_string(),
            ));
        }
        if self.environment != Environment::Test && self.okx.credentials.is_none() {
            return Err(DaemonError::Config(
                "OKX credentials are required outside the test environment".to_string(),
            ));
        }
        Ok(())
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("TENYO_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid TENYO_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("TENYO_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = load_parsed_env("TENYO_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_okx_config(environment: Environment) -> DaemonResult<OkxConfig> {
        let key = env::var("OKX_API_KEY").ok();
        let secret = env::var("OKX_API_SECRET").ok();
        let passphrase = env::var("OKX_PASSPHRASE").ok();

        let credentials = match (key, secret, passphrase) {
            (Some(key), Some(secret), Some(passphrase)) => {
                Some(OkxCredentials::new(key, secret, passphrase)?)
            }
            (None, None, None) if environment == Environment::Test => None,
            _ => {
                return Err(DaemonError::Config(
                    "OKX_API_KEY, OKX_API_SECRET and OKX_PASSPHRASE must all be set".to_string(),
                ))
            }
        };

        Ok(OkxConfig {
            base_url: env::var("OKX_API_URL")
                .unwrap_or_else(|_| DEFAULT_OKX_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials,
            timeout_secs: load_parsed_env("OKX_TIMEOUT_SECS", 30u64)?,
            max_retries: load_parsed_env("OKX_MAX_RETRIES", 3u32)?,
            simulated: load_bool_env("OKX_SIMULATED", false)?,
        })
    }

    fn load_logging_config() -> DaemonResult<LoggingConfig> {
        let format = parse_log_format(&env::var("TENYO_LOG_FORMAT").unwrap_or_default())?;
        let file = match env::var("TENYO_LOG_FILE") {
            Ok(path) if !path.trim().is_empty() => Some(LogFileConfig::new(
                &path,
                parse_log_rotation(&env::var("TENYO_LOG_ROTATION").unwrap_or_default())?,
                load_parsed_env("TENYO_LOG_MAX_FILES", LogFileConfig::DEFAULT_MAX_FILES)?,
            )?),
            _ => None,
        };

        Ok(LoggingConfig {
            format,
            console: load_bool_env("TENYO_LOG_CONSOLE", true)?,
            file,
        })
    }

    fn load_protection_config() -> DaemonResult<ProtectionConfig> {
        let min_order_size = match env::var("TENYO_MIN_ORDER_SIZE") {
            Ok(val) if !val.trim().is_empty() => Some(parse_decimal("TENYO_MIN_ORDER_SIZE", &val)?),
            _ => None,
        };

        Ok(ProtectionConfig {
            poll_interval_secs: load_parsed_env("TENYO_POLL_INTERVAL_SECS", 60u64)?,
            check_interval_secs: load_parsed_env("TENYO_CHECK_INTERVAL_SECS", 300u64)?,
            staleness_threshold_secs: load_parsed_env("TENYO_STALENESS_THRESHOLD_SECS", 600u64)?,
            volatility_pct: load_decimal_env("TENYO_VOLATILITY_PCT", Decimal::new(1, 2))?,
            profit_loss_ratio: load_decimal_env("TENYO_PROFIT_LOSS_RATIO", Decimal::from(5))?,
            min_order_size,
            enabled: load_bool_env("TENYO_PROTECTION_ENABLED", true)?,
        })
    }
}

impl OkxConfig {
    /// Client settings for the REST connector.
    pub fn client_config(&self) -> OkxClientConfig {
        OkxClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            simulated: self.simulated,
        }
    }

    /// Masked API key for logs and the status endpoint.
    pub fn masked_key(&self) -> String {
        self.credentials
            .as_ref()
            .map(|c| c.masked_key())
            .unwrap_or_else(|| "unset".to_string())
    }
}

impl ProtectionConfig {
    /// Interval between account polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Interval between protection cycles.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Build the staleness filter, checking the threshold against both intervals.
    pub fn staleness_filter(&self) -> DaemonResult<StalenessFilter> {
        Ok(StalenessFilter::new(
            Duration::from_secs(self.staleness_threshold_secs),
            self.poll_interval(),
            self.check_interval(),
        )?)
    }

    /// Build the risk parameters used for target prices.
    pub fn risk_parameters(&self) -> DaemonResult<RiskParameters> {
        Ok(RiskParameters::new(self.volatility_pct, self.profit_loss_ratio)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            okx: OkxConfig {
                base_url: DEFAULT_OKX_URL.to_string(),
                credentials: None,
                timeout_secs: 30,
                max_retries: 3,
                simulated: false,
            },
            protection: ProtectionConfig {
                poll_interval_secs: 60,
                check_interval_secs: 300,
                staleness_threshold_secs: 600,
                volatility_pct: Decimal::new(1, 2), // 1%
                profit_loss_ratio: Decimal::from(5),
                min_order_size: None,
                enabled: true,
            },
            database_url: None,
            logging: LoggingConfig::default(),
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
    match env::var(key) {
        Ok(val) => parse_decimal(key, &val),
        Err(_) => Ok(default),
    }
}

fn load_parsed_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        Err(_) => Ok(default),
    }
}

fn load_bool_env(key: &str, default: bool) -> DaemonResult<bool> {
    match env::var(key) {
        Ok(val) => parse_bool(key, &val),
        Err(_) => Ok(default),
    }
}

fn parse_decimal(key: &str, val: &str) -> DaemonResult<Decimal> {
    Decimal::from_str(val.trim())
        .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val)))
}

fn parse_bool(key: &str, val: &str) -> DaemonResult<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DaemonError::Config(format!("Invalid {} value: {}", key, val))),
    }
}

fn parse_log_format(val: &str) -> DaemonResult<LogFormat> {
    match val.trim().to_lowercase().as_str() {
        "" | "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(DaemonError::Config(format!(
            "Invalid TENYO_LOG_FORMAT: {}. Expected: text, json",
            other
        ))),
    }
}

fn parse_log_rotation(val: &str) -> DaemonResult<LogRotation> {
    match val.trim().to_lowercase().as_str() {
        "" | "daily" => Ok(LogRotation::Daily),
        "hourly" => Ok(LogRotation::Hourly),
        "never" => Ok(LogRotation::Never),
        other => Err(DaemonError::Config(format!(
            "Invalid TENYO_LOG_ROTATION: {}. Expected: daily, hourly, never",
            other
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.okx.base_url, "https://www.okx.com");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_test_config_is_valid_without_credentials() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        config.validate().unwrap();
    }

    #[test]
    fn test_production_requires_credentials() {
        let config = Config {
            environment: Environment::Production,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_protection_defaults() {
        let config = Config::default();

        assert_eq!(config.protection.volatility_pct, dec!(0.01));
        assert_eq!(config.protection.profit_loss_ratio, dec!(5));
        assert_eq!(config.protection.min_order_size, None);
        assert!(config.protection.enabled);
        assert_eq!(config.protection.staleness_filter().unwrap().threshold_secs(), 600);
    }

    #[test]
    fn test_staleness_threshold_too_short_is_rejected() {
        let mut config = Config::test();
        config.protection.staleness_threshold_secs = 500;

        assert!(matches!(
            config.validate(),
            Err(DaemonError::Engine(tenyo_engine::EngineError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut config = Config::test();
        config.protection.check_interval_secs = 0;
        config.protection.poll_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(DaemonError::Engine(tenyo_engine::EngineError::InvalidConfig(_)))
        ));

        let mut config = Config::test();
        config.protection.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_min_order_size_is_rejected() {
        let mut config = Config::test();
        config.protection.min_order_size = Some(Decimal::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("").unwrap(), LogFormat::Text);
        assert_eq!(parse_log_format("JSON").unwrap(), LogFormat::Json);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_log_file_path_is_split() {
        let file = LogFileConfig::new("/var/log/tenyo/tenyod.log", LogRotation::Daily, 7).unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/tenyo"));
        assert_eq!(file.file_name, "tenyod.log");

        let bare = LogFileConfig::new("tenyod.log", LogRotation::Never, 1).unwrap();
        assert_eq!(bare.directory, PathBuf::from("."));
        assert_eq!(bare.file_name, "tenyod.log");
    }

    #[test]
    fn test_log_file_rejects_bad_settings() {
        assert!(LogFileConfig::new("logs/", LogRotation::Daily, 7).is_err());
        assert!(LogFileConfig::new("", LogRotation::Daily, 7).is_err());
        assert!(LogFileConfig::new("logs/tenyod.log", LogRotation::Daily, 0).is_err());
    }

    #[test]
    fn test_parse_log_rotation() {
        assert_eq!(parse_log_rotation("").unwrap(), LogRotation::Daily);
        assert_eq!(parse_log_rotation("Hourly").unwrap(), LogRotation::Hourly);
        assert_eq!(parse_log_rotation("never").unwrap(), LogRotation::Never);
        assert!(parse_log_rotation("weekly").is_err());
    }

    #[test]
    fn test_logging_needs_at_least_one_sink() {
        let mut config = Config::test();
        assert!(config.logging.console);
        assert!(config.logging.file.is_none());

        config.logging.console = false;
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        config.logging.file = Some(LogFileConfig::new("tenyod.log", LogRotation::Daily, 7).unwrap());
        config.validate().unwrap();
    }

    #[test]
    fn test_client_config_mapping() {
        let mut config = Config::default();
        config.okx.simulated = true;
        let client = config.okx.client_config();

        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(client.max_retries, 3);
        assert!(client.simulated);
        assert_eq!(config.okx.masked_key(), "unset");
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
