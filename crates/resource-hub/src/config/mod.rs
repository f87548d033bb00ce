use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::eligibility::{EligibilityError, IncomeThreshold};
use crate::store::TransitionMode;
use crate::sync::RetryPolicy;
use crate::tenant::{InvalidTenantKey, TenantKey, TenantResolver};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub backend: BackendConfig,
    pub tenancy: TenancyConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub eligibility: EligibilityConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let base_url = optional("HUB_BACKEND_URL")
            .map(|value| {
                Url::parse(&value).map_err(|source| ConfigError::InvalidUrl {
                    var: "HUB_BACKEND_URL",
                    source,
                })
            })
            .transpose()?;
        let backend = BackendConfig {
            base_url,
            api_key: optional("HUB_BACKEND_API_KEY"),
            connect_timeout: Duration::from_millis(number("HUB_CONNECT_TIMEOUT_MS", 5_000)?),
            request_timeout: Duration::from_millis(number("HUB_REQUEST_TIMEOUT_MS", 15_000)?),
        };

        let default_slug = env::var("HUB_DEFAULT_TENANT").unwrap_or_else(|_| "dndc".to_string());
        let tenancy = TenancyConfig {
            default_tenant: TenantKey::new(&default_slug).map_err(|source| {
                ConfigError::InvalidTenant {
                    value: default_slug.clone(),
                    source,
                }
            })?,
            placeholder_label: env::var("HUB_PLACEHOLDER_LABEL")
                .unwrap_or_else(|_| "www".to_string()),
        };

        let defaults = RetryPolicy::default();
        let sync = SyncConfig {
            retry: RetryPolicy {
                max_retries: number("HUB_SYNC_MAX_RETRIES", defaults.max_retries)?,
                initial_backoff_ms: number(
                    "HUB_SYNC_INITIAL_BACKOFF_MS",
                    defaults.initial_backoff_ms,
                )?,
                max_backoff_ms: number("HUB_SYNC_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
                backoff_multiplier: defaults.backoff_multiplier,
            },
        };

        let transitions = match optional("HUB_STATUS_TRANSITIONS") {
            Some(value) => TransitionMode::parse(&value)
                .ok_or(ConfigError::InvalidTransitionMode { value })?,
            None => TransitionMode::default(),
        };

        let threshold_percent: f64 = number("HUB_INCOME_THRESHOLD_PERCENT", 80.0)?;
        let eligibility = EligibilityConfig {
            income_threshold: IncomeThreshold::from_percent(threshold_percent)
                .map_err(|source| ConfigError::InvalidThreshold { source })?,
            ami_table: optional("HUB_AMI_TABLE").map(PathBuf::from),
            fpl_table: optional("HUB_FPL_TABLE").map(PathBuf::from),
            utility_tiers: optional("HUB_UTILITY_TIERS").map(PathBuf::from),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            backend,
            tenancy,
            sync,
            store: StoreConfig { transitions },
            eligibility,
        })
    }
}

fn optional(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn number<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(var) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Remote data service connection. Without a base URL the service runs on the in-memory backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: Option<Url>,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    pub default_tenant: TenantKey,
    pub placeholder_label: String,
}

impl TenancyConfig {
    pub fn resolver(&self) -> TenantResolver {
        TenantResolver::new(self.default_tenant.clone(), self.placeholder_label.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub transitions: TransitionMode,
}

/// Threshold and reference-table locations for the calculators.
#[derive(Debug, Clone)]
pub struct EligibilityConfig {
    pub income_threshold: IncomeThreshold,
    pub ami_table: Option<PathBuf>,
    pub fpl_table: Option<PathBuf>,
    pub utility_tiers: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        var: &'static str,
        value: String,
    },
    InvalidTenant {
        value: String,
        source: InvalidTenantKey,
    },
    InvalidTransitionMode {
        value: String,
    },
    InvalidThreshold {
        source: EligibilityError,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidUrl { var, .. } => write!(f, "{var} must be an absolute URL"),
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a number (got '{value}')")
            }
            ConfigError::InvalidTenant { value, .. } => {
                write!(f, "HUB_DEFAULT_TENANT '{value}' is not a valid tenant slug")
            }
            ConfigError::InvalidTransitionMode { value } => write!(
                f,
                "HUB_STATUS_TRANSITIONS must be 'permissive' or 'enforced' (got '{value}')"
            ),
            ConfigError::InvalidThreshold { source } => {
                write!(f, "HUB_INCOME_THRESHOLD_PERCENT is invalid: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidTransitionMode { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidUrl { source, .. } => Some(source),
            ConfigError::InvalidTenant { source, .. } => Some(source),
            ConfigError::InvalidThreshold { source } => Some(source),
        }
    }
}
