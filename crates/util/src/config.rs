use std::{env, fmt, net::SocketAddr, num::ParseIntError, time::Duration};

use super::server_bind_address;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns `true` when running against the live registry and real users.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

const DEV_SECRET_KEY_HEX: &str = "6465762d7365637265742d6b6579";
const DEV_REGISTRY_BASE_URL: &str = "http://127.0.0.1:8700/registry/";
const DEFAULT_DATABASE_URL: &str = "sqlite://registrar.db?mode=rwc";

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 15;

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// HMAC key used to verify signed identity assertions.
    pub secret_key: Vec<u8>,
    pub registry: RegistryPoolConfig,
    pub s3: Option<S3Credentials>,
    pub admin: AdminRoster,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let secret_hex = match optional_var("REGISTRAR_SECRET_KEY") {
            Some(value) => value,
            None if environment.is_production() => {
                return Err(ConfigError::MissingVar("REGISTRAR_SECRET_KEY"));
            }
            None => DEV_SECRET_KEY_HEX.to_string(),
        };
        let secret_key = hex::decode(secret_hex).map_err(ConfigError::InvalidSecretKey)?;

        let database_url =
            optional_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            secret_key,
            registry: RegistryPoolConfig::from_env(environment)?,
            s3: S3Credentials::from_env()?,
            admin: AdminRoster::from_env(),
        })
    }
}

/// Settings for the registry gateway session pool.
///
/// The pool is described entirely by these knobs: how many sessions are
/// held open, how often idle sessions are pinged, and how long callers
/// wait for a session or for a replacement login.
#[derive(Debug, Clone)]
pub struct RegistryPoolConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub pool_size: usize,
    pub keep_alive: Duration,
    pub timeout: Duration,
}

impl RegistryPoolConfig {
    fn from_env(environment: Environment) -> Result<Self, ConfigError> {
        let base_url = match optional_var("REGISTRY_BASE_URL") {
            Some(value) => value,
            None if environment.is_production() => {
                return Err(ConfigError::MissingVar("REGISTRY_BASE_URL"));
            }
            None => DEV_REGISTRY_BASE_URL.to_string(),
        };
        let client_id = optional_var("REGISTRY_CLIENT_ID").unwrap_or_else(|| "registrar-dev".to_string());
        let client_secret = match optional_var("REGISTRY_CLIENT_SECRET") {
            Some(value) => value,
            None if environment.is_production() => {
                return Err(ConfigError::MissingVar("REGISTRY_CLIENT_SECRET"));
            }
            None => "dev-secret".to_string(),
        };

        let pool_size = parse_var("REGISTRY_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        let keep_alive_secs = parse_var("REGISTRY_POOL_KEEP_ALIVE_SECS", DEFAULT_KEEP_ALIVE_SECS)?;
        let timeout_secs = parse_var("REGISTRY_POOL_TIMEOUT_SECS", DEFAULT_POOL_TIMEOUT_SECS)?;

        Ok(Self {
            base_url,
            client_id,
            client_secret,
            pool_size,
            keep_alive: Duration::from_secs(keep_alive_secs),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Credentials for the report delivery bucket.
///
/// The four variables travel as a group: either all are set or none is.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket_name: String,
}

impl S3Credentials {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        const VARS: [&str; 4] = [
            "AWS_S3_ACCESS_KEY_ID",
            "AWS_S3_SECRET_ACCESS_KEY",
            "AWS_S3_REGION",
            "AWS_S3_BUCKET_NAME",
        ];

        let values: Vec<Option<String>> = VARS.iter().map(|name| optional_var(name)).collect();
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }
        for (name, value) in VARS.iter().zip(&values) {
            if value.is_none() {
                return Err(ConfigError::PartialS3Credentials { missing: name });
            }
        }

        let mut values = values.into_iter().flatten();
        Ok(Some(Self {
            access_key_id: values.next().unwrap_or_default(),
            secret_access_key: values.next().unwrap_or_default(),
            region: values.next().unwrap_or_default(),
            bucket_name: values.next().unwrap_or_default(),
        }))
    }
}

/// Admin access level granted through the allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRole {
    FullAccess,
    Analyst,
}

impl AdminRole {
    /// Returns `true` when the role may perform mutating admin operations.
    pub fn can_manage(self) -> bool {
        matches!(self, Self::FullAccess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullAccess => "full_access",
            Self::Analyst => "analyst",
        }
    }
}

/// Allow-lists of identity-provider subjects granted admin access.
#[derive(Debug, Clone, Default)]
pub struct AdminRoster {
    full_access: Vec<String>,
    analysts: Vec<String>,
}

impl AdminRoster {
    pub fn new(full_access: Vec<String>, analysts: Vec<String>) -> Self {
        Self {
            full_access,
            analysts,
        }
    }

    fn from_env() -> Self {
        Self {
            full_access: parse_uuid_list(optional_var("ADMIN_FULL_ACCESS_UUIDS")),
            analysts: parse_uuid_list(optional_var("ADMIN_ANALYST_UUIDS")),
        }
    }

    /// Resolves the admin role for a subject, full access winning over analyst.
    pub fn role_for(&self, subject: &str) -> Option<AdminRole> {
        if self.full_access.iter().any(|entry| entry == subject) {
            Some(AdminRole::FullAccess)
        } else if self.analysts.iter().any(|entry| entry == subject) {
            Some(AdminRole::Analyst)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.full_access.is_empty() && self.analysts.is_empty()
    }
}

fn parse_uuid_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn optional_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    match optional_var(name) {
        Some(value) => value
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { var: name, source }),
        None => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidSecretKey(hex::FromHexError),
    InvalidNumber {
        var: &'static str,
        source: ParseIntError,
    },
    ZeroPoolSize,
    PartialS3Credentials {
        missing: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set in production"),
            Self::InvalidSecretKey(err) => {
                write!(f, "REGISTRAR_SECRET_KEY must be hex encoded: {err}")
            }
            Self::InvalidNumber { var, source } => {
                write!(f, "{var} must be a positive integer: {source}")
            }
            Self::ZeroPoolSize => write!(f, "REGISTRY_POOL_SIZE must be at least 1"),
            Self::PartialS3Credentials { missing } => {
                write!(f, "S3 credentials are incomplete: {missing} is not set")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BIND_ADDR;
    use std::sync::{LazyLock, Mutex};

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const ALL_VARS: [&str; 14] = [
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "REGISTRAR_SECRET_KEY",
        "REGISTRY_BASE_URL",
        "REGISTRY_CLIENT_ID",
        "REGISTRY_CLIENT_SECRET",
        "REGISTRY_POOL_SIZE",
        "REGISTRY_POOL_KEEP_ALIVE_SECS",
        "REGISTRY_POOL_TIMEOUT_SECS",
        "AWS_S3_ACCESS_KEY_ID",
        "AWS_S3_SECRET_ACCESS_KEY",
        "AWS_S3_REGION",
        "AWS_S3_BUCKET_NAME",
    ];

    fn clear_env() {
        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::remove_var("ADMIN_FULL_ACCESS_UUIDS");
        env::remove_var("ADMIN_ANALYST_UUIDS");
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.secret_key, b"dev-secret-key");
        assert_eq!(config.registry.pool_size, 4);
        assert_eq!(config.registry.keep_alive, Duration::from_secs(60));
        assert_eq!(config.registry.timeout, Duration::from_secs(15));
        assert!(config.s3.is_none());
        assert!(config.admin.is_empty());
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        env::remove_var("APP_ENV");
    }

    #[test]
    fn production_requires_secret_key() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(
            err,
            ConfigError::MissingVar("REGISTRAR_SECRET_KEY")
        ));

        clear_env();
    }

    #[test]
    fn parses_pool_knobs_from_env() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("REGISTRY_POOL_SIZE", "8");
        env::set_var("REGISTRY_POOL_KEEP_ALIVE_SECS", "30");
        env::set_var("REGISTRY_POOL_TIMEOUT_SECS", "5");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.registry.pool_size, 8);
        assert_eq!(config.registry.keep_alive, Duration::from_secs(30));
        assert_eq!(config.registry.timeout, Duration::from_secs(5));

        clear_env();
    }

    #[test]
    fn rejects_zero_pool_size() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("REGISTRY_POOL_SIZE", "0");

        let err = AppConfig::from_env().expect_err("zero pool should error");
        assert!(matches!(err, ConfigError::ZeroPoolSize));

        clear_env();
    }

    #[test]
    fn rejects_partial_s3_credentials() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("AWS_S3_ACCESS_KEY_ID", "key");
        env::set_var("AWS_S3_SECRET_ACCESS_KEY", "secret");
        env::set_var("AWS_S3_REGION", "us-gov-west-1");

        let err = AppConfig::from_env().expect_err("partial s3 should error");
        assert!(matches!(
            err,
            ConfigError::PartialS3Credentials {
                missing: "AWS_S3_BUCKET_NAME"
            }
        ));

        clear_env();
    }

    #[test]
    fn loads_complete_s3_credentials() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("AWS_S3_ACCESS_KEY_ID", "key");
        env::set_var("AWS_S3_SECRET_ACCESS_KEY", "secret");
        env::set_var("AWS_S3_REGION", "us-gov-west-1");
        env::set_var("AWS_S3_BUCKET_NAME", "registrar-reports");

        let config = AppConfig::from_env().expect("config should load");
        let s3 = config.s3.expect("s3 credentials present");
        assert_eq!(s3.bucket_name, "registrar-reports");

        clear_env();
    }

    #[test]
    fn roster_resolves_roles_with_full_access_winning() {
        let roster = AdminRoster::new(
            vec!["sub-full".to_string(), "sub-both".to_string()],
            vec!["sub-analyst".to_string(), "sub-both".to_string()],
        );

        assert_eq!(roster.role_for("sub-full"), Some(AdminRole::FullAccess));
        assert_eq!(roster.role_for("sub-analyst"), Some(AdminRole::Analyst));
        assert_eq!(roster.role_for("sub-both"), Some(AdminRole::FullAccess));
        assert_eq!(roster.role_for("sub-unknown"), None);
        assert!(AdminRole::FullAccess.can_manage());
        assert!(!AdminRole::Analyst.can_manage());
    }

    #[test]
    fn roster_parses_comma_separated_lists() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("ADMIN_FULL_ACCESS_UUIDS", "aaa-1, bbb-2 ,");
        env::set_var("ADMIN_ANALYST_UUIDS", "ccc-3");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.admin.role_for("aaa-1"), Some(AdminRole::FullAccess));
        assert_eq!(config.admin.role_for("bbb-2"), Some(AdminRole::FullAccess));
        assert_eq!(config.admin.role_for("ccc-3"), Some(AdminRole::Analyst));

        clear_env();
    }
}
