//! Application configuration loaded from environment variables.

use crate::auth::JwtConfig;

/// Development signing secret used when `JWT_SECRET_KEY` is not set.
pub const DEV_JWT_SECRET: &str = "local-development-secret-do-not-use-in-production";

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `JWT_SECRET_KEY` — HS256 signing secret shared with the identity provider
/// - `JWT_ISSUER` — expected `iss` claim (default: `"ECommerceApi"`)
/// - `JWT_AUDIENCE` — expected `aud` claim (default: `"ECommerceClient"`)
/// - `SEED_DEMO_DATA` — seed the demo catalog into PostgreSQL (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub jwt: JwtConfig,
    /// False when the development secret is in use.
    pub jwt_secret_configured: bool,
    pub seed_demo_data: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secret = lookup("JWT_SECRET_KEY").filter(|s| !s.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            jwt_secret_configured: secret.is_some(),
            jwt: JwtConfig {
                secret: secret.unwrap_or(defaults.jwt.secret),
                issuer: lookup("JWT_ISSUER").unwrap_or(defaults.jwt.issuer),
                audience: lookup("JWT_AUDIENCE").unwrap_or(defaults.jwt.audience),
            },
            seed_demo_data: lookup("SEED_DEMO_DATA")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                issuer: "ECommerceApi".to_string(),
                audience: "ECommerceClient".to_string(),
            },
            jwt_secret_configured: false,
            seed_demo_data: false,
        }
    }
}
