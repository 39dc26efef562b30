//! Gateway configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use evgate_core::auth::service::TokenTtls;
use thiserror::Error;

/// Issuer written into every token unless `JWT_ISSUER` overrides it.
pub const DEFAULT_ISSUER: &str = "api-gateway";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which browser origins may call the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    /// `*`: any origin, without credentials.
    Any,
    /// A single origin, with credentials.
    Exact(HeaderValue),
}

/// Configuration for the gateway's HTTP surface and token lifecycle.
#[derive(Clone)]
pub struct GatewayConfig {
    /// HMAC secret for token signatures.
    pub jwt_secret: String,
    /// `iss` claim written and required on every token.
    pub jwt_issuer: String,
    /// Access, refresh and reset lifetimes.
    pub ttls: TokenTtls,
    pub allowed_origin: AllowedOrigin,
    /// Collaborator name to base URL.
    pub collaborators: BTreeMap<String, String>,
    /// Bound on waiting for a collaborator's response headers.
    pub upstream_timeout: Duration,
    /// Bound on a single token-store command.
    pub store_timeout: Duration,
    /// Bound on a single user-directory call.
    pub lookup_timeout: Duration,
    /// YAML file replacing the default route rules.
    pub routes_file: Option<PathBuf>,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("ttls", &self.ttls)
            .field("allowed_origin", &self.allowed_origin)
            .field("collaborators", &self.collaborators)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("store_timeout", &self.store_timeout)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("routes_file", &self.routes_file)
            .finish()
    }
}

impl GatewayConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                    | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `JWT_SECRET`                | required                 |
    /// | `JWT_ISSUER`                | `api-gateway`            |
    /// | `JWT_ACCESS_EXPIRATION`     | `15` (minutes)           |
    /// | `JWT_REFRESH_EXPIRATION`    | `168` (hours)            |
    /// | `PASSWORD_RESET_EXPIRATION` | `24` (hours)             |
    /// | `ALLOWED_ORIGIN`            | `*`                      |
    /// | `CORE_SERVICE_URL`          | `http://localhost:8080`  |
    /// | `NOTIFICATION_SERVICE_URL`  | `http://localhost:8082`  |
    /// | `COMMUNICATION_SERVICE_URL` | `http://localhost:8083`  |
    /// | `UPSTREAM_TIMEOUT_SECS`     | `5`                      |
    /// | `STORE_TIMEOUT_SECS`        | `3`                      |
    /// | `LOOKUP_TIMEOUT_SECS`       | `5`                      |
    /// | `ROUTES_FILE`               | unset                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let ttls = TokenTtls {
            access: minutes(number(&var, "JWT_ACCESS_EXPIRATION", 15)?),
            refresh: hours(number(&var, "JWT_REFRESH_EXPIRATION", 168)?),
            reset: hours(number(&var, "PASSWORD_RESET_EXPIRATION", 24)?),
        };

        let origin = var("ALLOWED_ORIGIN").unwrap_or_else(|| "*".into());
        let allowed_origin = parse_origin(&origin)?;

        let mut collaborators = BTreeMap::new();
        for (name, key, default) in [
            ("core", "CORE_SERVICE_URL", "http://localhost:8080"),
            ("notification", "NOTIFICATION_SERVICE_URL", "http://localhost:8082"),
            ("communication", "COMMUNICATION_SERVICE_URL", "http://localhost:8083"),
        ] {
            collaborators.insert(name.to_string(), var(key).unwrap_or_else(|| default.into()));
        }

        Ok(Self {
            jwt_secret,
            jwt_issuer: var("JWT_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.into()),
            ttls,
            allowed_origin,
            collaborators,
            upstream_timeout: Duration::from_secs(number(&var, "UPSTREAM_TIMEOUT_SECS", 5)?),
            store_timeout: Duration::from_secs(number(&var, "STORE_TIMEOUT_SECS", 3)?),
            lookup_timeout: Duration::from_secs(number(&var, "LOOKUP_TIMEOUT_SECS", 5)?),
            routes_file: var("ROUTES_FILE").map(PathBuf::from),
        })
    }
}

fn number<F>(var: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match u64::from_str(raw.trim()) {
        Ok(0) => Err(ConfigError::Invalid {
            var: key,
            value: raw,
            reason: "must be greater than zero".into(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            var: key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn parse_origin(origin: &str) -> Result<AllowedOrigin, ConfigError> {
    let origin = origin.trim();
    if origin == "*" {
        return Ok(AllowedOrigin::Any);
    }
    HeaderValue::from_str(origin)
        .map(AllowedOrigin::Exact)
        .map_err(|e| ConfigError::Invalid {
            var: "ALLOWED_ORIGIN",
            value: origin.to_string(),
            reason: e.to_string(),
        })
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3600))
}
