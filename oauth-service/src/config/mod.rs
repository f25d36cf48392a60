use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub oauth: ProtocolConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
}

/// Lifetimes and policy knobs of the protocol engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    pub authorization_expiration_seconds: i64,
    pub access_expiration_seconds: i64,
    pub require_pkce_for_public_clients: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub token_attempts: u32,
    pub token_window_seconds: u64,
}

/// Admin account created when the account bucket is empty at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_password: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            authorization_expiration_seconds: 250,
            access_expiration_seconds: 3600,
            require_pkce_for_public_clients: false,
        }
    }
}

impl Default for OAuthConfig {
    /// Development defaults with the in-memory store.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "oauth-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreConfig {
                backend: StoreBackend::Memory,
                mongodb_uri: "mongodb://localhost:27017".to_string(),
                mongodb_database: "oauth".to_string(),
            },
            oauth: ProtocolConfig::default(),
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            rate_limit: RateLimitConfig {
                login_attempts: 5,
                login_window_seconds: 300,
                token_attempts: 30,
                token_window_seconds: 60,
            },
            bootstrap: BootstrapConfig {
                admin_username: "admin".to_string(),
                admin_password: "admin1234".to_string(),
            },
        }
    }
}

impl OAuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = OAuthConfig::default();

        let config = OAuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("oauth-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
            store: StoreConfig {
                backend: parse_env("STORE_BACKEND", Some("mongo"), is_prod)?,
                mongodb_uri: get_env("MONGODB_URI", Some(&defaults.store.mongodb_uri), is_prod)?,
                mongodb_database: get_env(
                    "MONGODB_DATABASE",
                    Some(&defaults.store.mongodb_database),
                    is_prod,
                )?,
            },
            oauth: ProtocolConfig {
                authorization_expiration_seconds: parse_env(
                    "OAUTH_AUTHORIZATION_EXPIRATION_SECONDS",
                    Some("250"),
                    is_prod,
                )?,
                access_expiration_seconds: parse_env(
                    "OAUTH_ACCESS_EXPIRATION_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                require_pkce_for_public_clients: parse_env(
                    "OAUTH_REQUIRE_PKCE_FOR_PUBLIC_CLIENTS",
                    Some("false"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), is_prod)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("300"),
                    is_prod,
                )?,
                token_attempts: parse_env("RATE_LIMIT_TOKEN_ATTEMPTS", Some("30"), is_prod)?,
                token_window_seconds: parse_env(
                    "RATE_LIMIT_TOKEN_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            bootstrap: BootstrapConfig {
                admin_username: get_env("BOOTSTRAP_ADMIN_USERNAME", Some("admin"), is_prod)?,
                admin_password: get_env("BOOTSTRAP_ADMIN_PASSWORD", Some("admin1234"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.oauth.authorization_expiration_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_AUTHORIZATION_EXPIRATION_SECONDS must be positive"
            )));
        }

        if self.oauth.access_expiration_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_ACCESS_EXPIRATION_SECONDS must be positive"
            )));
        }

        if self.bootstrap.admin_password.len() < 8 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BOOTSTRAP_ADMIN_PASSWORD must be at least 8 characters"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.store.backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "The memory store backend is not allowed in production"
                )));
            }

            if self.bootstrap.admin_password == "admin1234" {
                tracing::error!("Bootstrap admin password is the development default");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
