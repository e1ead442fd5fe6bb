use serde::Deserialize;
use validator::Validate;

use crate::error::Result;

/// Tunables for the session store, sweeper and trusted-device registry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionConfig {
    /// Absolute lifetime of a session, in milliseconds. At most ten years.
    #[serde(default = "default_session_timeout_ms")]
    #[validate(range(min = 1, max = 315_360_000_000u64))]
    pub session_timeout_ms: u64,

    /// Maximum idle time between two validations, in milliseconds.
    #[serde(default = "default_inactivity_timeout_ms")]
    #[validate(range(min = 1, max = 315_360_000_000u64))]
    pub inactivity_timeout_ms: u64,

    #[serde(default = "default_max_concurrent_sessions")]
    #[validate(range(min = 1))]
    pub max_concurrent_sessions: usize,

    #[serde(default = "default_max_sessions_per_device")]
    #[validate(range(min = 1))]
    pub max_sessions_per_device: usize,

    #[serde(default = "default_cleanup_interval_secs")]
    #[validate(range(min = 1, max = 31_536_000))]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_max_trusted_devices")]
    #[validate(range(min = 1))]
    pub max_trusted_devices: usize,

    #[serde(default = "default_trusted_device_window_days")]
    #[validate(range(min = 1, max = 36500))]
    pub trusted_device_window_days: i64,
}

fn default_session_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_inactivity_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_concurrent_sessions() -> usize {
    3
}

fn default_max_sessions_per_device() -> usize {
    2
}

fn default_cleanup_interval_secs() -> u64 {
    10 * 60
}

fn default_max_trusted_devices() -> usize {
    5
}

fn default_trusted_device_window_days() -> i64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_sessions_per_device: default_max_sessions_per_device(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_trusted_devices: default_max_trusted_devices(),
            trusted_device_window_days: default_trusted_device_window_days(),
        }
    }
}

impl SessionConfig {
    /// Build a config from `SESSION_*` / `TRUSTED_DEVICES_*` environment
    /// variables, loading a `.env` file first if one exists. Unset or
    /// unparsable values fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            session_timeout_ms: env_parse("SESSION_TIMEOUT_SECS")
                .map(|secs: u64| secs.saturating_mul(1000))
                .unwrap_or(defaults.session_timeout_ms),
            inactivity_timeout_ms: env_parse("SESSION_INACTIVITY_TIMEOUT_SECS")
                .map(|secs: u64| secs.saturating_mul(1000))
                .unwrap_or(defaults.inactivity_timeout_ms),
            max_concurrent_sessions: env_parse("SESSION_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_sessions),
            max_sessions_per_device: env_parse("SESSION_MAX_PER_DEVICE")
                .unwrap_or(defaults.max_sessions_per_device),
            cleanup_interval_secs: env_parse("SESSION_CLEANUP_INTERVAL_SECS")
                .unwrap_or(defaults.cleanup_interval_secs),
            max_trusted_devices: env_parse("TRUSTED_DEVICES_MAX")
                .unwrap_or(defaults.max_trusted_devices),
            trusted_device_window_days: env_parse("TRUSTED_DEVICES_WINDOW_DAYS")
                .unwrap_or(defaults.trusted_device_window_days),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(clamp_millis(self.session_timeout_ms))
    }

    pub fn inactivity_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(clamp_millis(self.inactivity_timeout_ms))
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn trusted_device_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.trusted_device_window_days)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// chrono panics on durations beyond i64::MAX milliseconds / 1000.
fn clamp_millis(ms: u64) -> i64 {
    ms.min((i64::MAX / 1000) as u64) as i64
}
