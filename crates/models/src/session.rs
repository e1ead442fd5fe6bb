use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::DeviceFingerprint;

/// Coarse classification of how complete a device fingerprint looked when
/// the session was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustLevel::Low => write!(f, "low"),
            TrustLevel::Medium => write!(f, "medium"),
            TrustLevel::High => write!(f, "high"),
        }
    }
}

/// A live session held by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub user_id: String,
    pub device_fingerprint: DeviceFingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Absolute ceiling, never extended by activity.
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub trust_level: TrustLevel,
    pub location: Option<String>,
}

impl SessionData {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_idle_at(&self, now: DateTime<Utc>, inactivity_timeout: chrono::Duration) -> bool {
        now - self.last_activity > inactivity_timeout
    }
}

/// Input for creating a session. The caller has already authenticated
/// `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: String,
    pub device_fingerprint: DeviceFingerprint,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Best-effort geolocation resolved by the caller, if any.
    pub location: Option<String>,
}

impl NewSession {
    pub fn new(user_id: impl Into<String>, device_fingerprint: DeviceFingerprint) -> Self {
        Self {
            user_id: user_id.into(),
            device_fingerprint,
            ip_address: None,
            user_agent: None,
            location: None,
        }
    }
}

/// Aggregate counters over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_users: usize,
    pub average_sessions_per_user: f64,
}
