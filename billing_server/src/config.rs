use std::env;

use billing_common::{helpers::env_flag, Secret};
use log::*;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

use crate::errors::ServerError;

const DEFAULT_BILLING_HOST: &str = "127.0.0.1";
const DEFAULT_BILLING_PORT: u16 = 8370;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/billing.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 25;
const DEFAULT_GATEWAY_TIMEOUT: u64 = 10;
const DEFAULT_GATEWAY_MAX_REDIRECTS: usize = 3;
const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 24;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub auth: AuthConfig,
    /// Per-call timeout, in seconds, for payment channels that do not set their own.
    pub gateway_timeout: u64,
    pub gateway_max_redirects: usize,
    /// Apply pending schema migrations at startup.
    pub run_migrations: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BILLING_HOST.to_string(),
            port: DEFAULT_BILLING_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            auth: AuthConfig::default(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            gateway_max_redirects: DEFAULT_GATEWAY_MAX_REDIRECTS,
            run_migrations: true,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("BILLING_HOST").ok().unwrap_or_else(|| DEFAULT_BILLING_HOST.into());
        let port = parse_env("BILLING_PORT", DEFAULT_BILLING_PORT);
        let database_url = env::var("BILLING_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ BILLING_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let db_max_connections = parse_env("BILLING_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS).max(1);
        let auth = AuthConfig::try_from_env().unwrap_or_else(|e| {
            warn!("🪛️ Could not load the authentication configuration. {e}. Reverting to the default configuration.");
            AuthConfig::default()
        });
        let gateway_timeout = parse_env("BILLING_GATEWAY_TIMEOUT", DEFAULT_GATEWAY_TIMEOUT).max(1);
        let gateway_max_redirects = parse_env("BILLING_GATEWAY_MAX_REDIRECTS", DEFAULT_GATEWAY_MAX_REDIRECTS);
        let run_migrations = env_flag("BILLING_RUN_MIGRATIONS", true);
        Self {
            host,
            port,
            database_url,
            db_max_connections,
            auth,
            gateway_timeout,
            gateway_max_redirects,
            run_migrations,
        }
    }
}

/// Reads `name` and parses it, falling back to `default` (with a warning) if the value is missing or invalid.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default, {default}.");
            default
        },
    }
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The HS256 key used to sign and verify access tokens.
    pub jwt_secret: Secret<String>,
    /// How long issued access tokens remain valid.
    pub token_lifetime_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        warn!(
            "🚨️🚨️🚨️ The JWT secret has not been set. I'm using a random value for this session. DO NOT operate on \
             production like this. Every token is invalidated when the server restarts. Set BILLING_JWT_SECRET \
             instead. 🚨️🚨️🚨️"
        );
        let secret = thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect::<String>();
        Self { jwt_secret: Secret::new(secret), token_lifetime_hours: DEFAULT_TOKEN_LIFETIME_HOURS }
    }
}

impl AuthConfig {
    pub fn new(secret: &str) -> Self {
        Self { jwt_secret: Secret::new(secret.to_string()), token_lifetime_hours: DEFAULT_TOKEN_LIFETIME_HOURS }
    }

    pub fn try_from_env() -> Result<Self, ServerError> {
        let secret = env::var("BILLING_JWT_SECRET")
            .map_err(|e| ServerError::ConfigurationError(format!("{e} [BILLING_JWT_SECRET]")))?;
        if secret.trim().len() < 16 {
            return Err(ServerError::ConfigurationError(
                "BILLING_JWT_SECRET must be at least 16 characters long".to_string(),
            ));
        }
        Ok(Self::new(secret.trim()))
    }
}
