//! Configuration management
//!
//! Loads settings from environment variables, with a `.env` file picked up
//! in local development builds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub kafka: KafkaSettings,
    pub auth: AuthSettings,
    pub cookies: CookiePolicy,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        let auth = AuthSettings::from_env()?;
        let cookies = CookiePolicy::for_auth(&auth);

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            kafka: KafkaSettings::from_env()?,
            auth,
            cookies,
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid DATABASE_MIN_CONNECTIONS")?,
            acquire_timeout: env::var("DATABASE_ACQUIRE_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid DATABASE_ACQUIRE_TIMEOUT")?,
        })
    }
}

/// Redis cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        })
    }
}

/// Kafka event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub brokers: String,
    pub topic_prefix: String,
}

impl KafkaSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            topic_prefix: env::var("KAFKA_TOPIC_PREFIX").unwrap_or_else(|_| "auth".to_string()),
        })
    }
}

/// Authentication policy knobs
///
/// Defaults match the documented policy: 5 failures in 15 minutes locks an
/// account, OTP codes live 5 minutes, a pending-auth ticket lives 10 minutes
/// and allows at most 3 code sends and 5 verification attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    pub ticket_secret: String,
    pub access_secret: String,
    pub issuer: String,
    pub ticket_ttl_secs: i64,
    pub otp_ttl_secs: i64,
    pub otp_send_cap: i64,
    pub attempt_limit: i64,
    pub attempt_window_secs: i64,
    pub lockout_threshold: i64,
    pub lockout_window_secs: i64,
    pub device_trust_ttl_secs: i64,
    pub session_ttl_secs: i64,
    pub access_token_ttl_secs: i64,
    pub destroy_session_on_refresh_replay: bool,
}

impl AuthSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            ticket_secret: env::var("AUTH_TICKET_SECRET").context("AUTH_TICKET_SECRET must be set")?,
            access_secret: env::var("AUTH_ACCESS_SECRET").context("AUTH_ACCESS_SECRET must be set")?,
            issuer: env::var("AUTH_ISSUER").unwrap_or_else(|_| "auth-core".to_string()),
            ticket_ttl_secs: env_i64("AUTH_TICKET_TTL_SECS", 600)?,
            otp_ttl_secs: env_i64("AUTH_OTP_TTL_SECS", 300)?,
            otp_send_cap: env_i64("AUTH_OTP_SEND_CAP", 3)?,
            attempt_limit: env_i64("AUTH_ATTEMPT_LIMIT", 5)?,
            attempt_window_secs: env_i64("AUTH_ATTEMPT_WINDOW_SECS", 900)?,
            lockout_threshold: env_i64("AUTH_LOCKOUT_THRESHOLD", 5)?,
            lockout_window_secs: env_i64("AUTH_LOCKOUT_WINDOW_SECS", 900)?,
            device_trust_ttl_secs: env_i64("AUTH_DEVICE_TRUST_TTL_SECS", 7 * 24 * 3600)?,
            session_ttl_secs: env_i64("AUTH_SESSION_TTL_SECS", 30 * 24 * 3600)?,
            access_token_ttl_secs: env_i64("AUTH_ACCESS_TOKEN_TTL_SECS", 900)?,
            destroy_session_on_refresh_replay: env::var("AUTH_DESTROY_SESSION_ON_REPLAY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}

impl AuthSettings {
    /// Policy defaults with caller-supplied signing secrets. Used by tests
    /// and by embedders that configure secrets out of band.
    pub fn with_secrets(ticket_secret: &str, access_secret: &str) -> Self {
        Self {
            ticket_secret: ticket_secret.to_string(),
            access_secret: access_secret.to_string(),
            issuer: "auth-core".to_string(),
            ticket_ttl_secs: 600,
            otp_ttl_secs: 300,
            otp_send_cap: 3,
            attempt_limit: 5,
            attempt_window_secs: 900,
            lockout_threshold: 5,
            lockout_window_secs: 900,
            device_trust_ttl_secs: 7 * 24 * 3600,
            session_ttl_secs: 30 * 24 * 3600,
            access_token_ttl_secs: 900,
            destroy_session_on_refresh_replay: true,
        }
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes for one cookie the HTTP layer sets on behalf of this crate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieAttributes {
    pub name: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: i64,
    pub path: String,
}

/// Fixed cookie attributes for the pending-auth ticket and the session
/// refresh token. The ticket cookie is scoped tight (Strict, short lived);
/// the refresh cookie must survive top-level navigation so it is Lax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookiePolicy {
    pub ticket: CookieAttributes,
    pub refresh: CookieAttributes,
}

impl CookiePolicy {
    pub fn for_auth(auth: &AuthSettings) -> Self {
        Self {
            ticket: CookieAttributes {
                name: "pending_auth".to_string(),
                http_only: true,
                secure: true,
                same_site: SameSite::Strict,
                max_age_secs: auth.ticket_ttl_secs,
                path: "/auth".to_string(),
            },
            refresh: CookieAttributes {
                name: "refresh_token".to_string(),
                http_only: true,
                secure: true,
                same_site: SameSite::Lax,
                max_age_secs: auth.session_ttl_secs,
                path: "/".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth_settings() -> AuthSettings {
        AuthSettings::with_secrets("ticket-secret", "access-secret")
    }

    #[test]
    fn cookie_policy_pins_ticket_to_strict() {
        let policy = CookiePolicy::for_auth(&test_auth_settings());
        assert_eq!(policy.ticket.same_site, SameSite::Strict);
        assert!(policy.ticket.http_only);
        assert!(policy.ticket.secure);
        assert_eq!(policy.ticket.max_age_secs, 600);
    }

    #[test]
    fn cookie_policy_refresh_survives_navigation() {
        let policy = CookiePolicy::for_auth(&test_auth_settings());
        assert_eq!(policy.refresh.same_site, SameSite::Lax);
        assert!(policy.refresh.http_only);
        assert_eq!(policy.refresh.path, "/");
    }
}
