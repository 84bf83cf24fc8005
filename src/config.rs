use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

/// Runtime configuration, built once at startup and injected everywhere else.
///
/// There are deliberately no fallback credentials here: a missing or short
/// `VELO_TOKEN_SECRET` aborts startup instead of booting with a guessable key.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Shared secret keying the session-token HMAC. Minimum 32 bytes.
    pub token_secret: String,
    /// Extra CORS origins on top of the localhost dev defaults.
    pub cors_origins: Vec<String>,
    /// Emails promoted to admin on registration (bootstrap only).
    pub bootstrap_admin_emails: Vec<String>,
    pub enable_hsts: bool,
    pub rate_limit: RateLimitSettings,
    /// Snapshot directory for the in-memory store. `None` disables snapshots.
    pub data_dir: Option<PathBuf>,
    #[cfg(feature = "postgres-store")]
    pub database_url: String,
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Budget per key per window.
    pub points: u32,
    pub window: Duration,
    /// Cost of a mutating request (GET/HEAD always cost 1).
    pub write_cost: u32,
    /// When set, points are only consumed for responses with status >= 400.
    pub penalize_failures_only: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            points: 60,
            window: Duration::from_secs(60),
            write_cost: 2,
            penalize_failures_only: false,
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let token_secret =
            std::env::var("VELO_TOKEN_SECRET").context("VELO_TOKEN_SECRET must be set")?;
        if token_secret.len() < 32 {
            bail!("VELO_TOKEN_SECRET must be at least 32 characters");
        }

        let defaults = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            enabled: env_bool("VELO_RL_ENABLED", defaults.enabled),
            points: env_u32("VELO_RL_POINTS", defaults.points),
            window: Duration::from_secs(u64::from(env_u32("VELO_RL_WINDOW_SECS", 60))),
            write_cost: env_u32("VELO_RL_WRITE_COST", defaults.write_cost),
            penalize_failures_only: env_bool(
                "VELO_RL_PENALIZE_FAILURES_ONLY",
                defaults.penalize_failures_only,
            ),
        };

        Ok(Self {
            bind_addr: std::env::var("VELO_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            token_secret,
            cors_origins: env_list("VELO_CORS_ORIGINS"),
            bootstrap_admin_emails: env_list("VELO_BOOTSTRAP_ADMIN_EMAILS"),
            enable_hsts: env_bool("VELO_ENABLE_HSTS", false),
            rate_limit,
            data_dir: std::env::var("VELO_DATA_DIR").ok().map(PathBuf::from),
            #[cfg(feature = "postgres-store")]
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for postgres-store builds")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_velo_env() {
        for (k, _) in std::env::vars() {
            if k.starts_with("VELO_") {
                std::env::remove_var(k);
            }
        }
    }

    #[test]
    #[serial_test::serial]
    fn missing_secret_is_an_error() {
        clear_velo_env();
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn short_secret_is_rejected() {
        clear_velo_env();
        std::env::set_var("VELO_TOKEN_SECRET", "too-short");
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn parses_rate_limit_overrides() {
        clear_velo_env();
        std::env::set_var("VELO_TOKEN_SECRET", "0123456789abcdef0123456789abcdef");
        #[cfg(feature = "postgres-store")]
        std::env::set_var("DATABASE_URL", "postgres://localhost/velo_test");
        std::env::set_var("VELO_RL_POINTS", "5");
        std::env::set_var("VELO_RL_WINDOW_SECS", "60");
        std::env::set_var("VELO_RL_PENALIZE_FAILURES_ONLY", "true");
        let cfg = AppConfig::from_env().expect("config");
        assert_eq!(cfg.rate_limit.points, 5);
        assert_eq!(cfg.rate_limit.window, Duration::from_secs(60));
        assert!(cfg.rate_limit.penalize_failures_only);
    }
}
