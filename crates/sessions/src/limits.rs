use chrono::{DateTime, Duration, Utc};
use warden_models::SessionData;

use crate::config::SessionConfig;
use crate::store::SessionIndex;

/// Concurrency ceilings applied before a new session is admitted.
#[derive(Debug, Clone, Copy)]
pub struct LimitPolicy {
    pub max_concurrent_sessions: usize,
    pub max_sessions_per_device: usize,
}

impl From<&SessionConfig> for LimitPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_concurrent_sessions: config.max_concurrent_sessions,
            max_sessions_per_device: config.max_sessions_per_device,
        }
    }
}

/// Why a session was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The user already held `max_concurrent_sessions`.
    UserLimit,
    /// The user already held `max_sessions_per_device` on this device.
    DeviceLimit,
    /// Past its absolute or inactivity deadline, not yet swept.
    Stale,
}

/// Make room for one more session of `user_id` on `device_id`.
///
/// Must run under the store's write lock, before the new session is
/// inserted, so the new session never counts toward its own eviction. Stale
/// sessions of the user go first since they no longer count as live. Then the
/// per-user and per-device checks run independently and both may evict.
pub(crate) fn enforce_limits(
    index: &mut SessionIndex,
    user_id: &str,
    device_id: &str,
    policy: LimitPolicy,
    now: DateTime<Utc>,
    inactivity_timeout: Duration,
) -> Vec<(SessionData, EvictionReason)> {
    let mut evicted = Vec::new();

    let stale: Vec<String> = index
        .user_sessions(user_id)
        .filter(|s| s.is_expired_at(now) || s.is_idle_at(now, inactivity_timeout))
        .map(|s| s.session_id.clone())
        .collect();
    for session_id in stale {
        if let Some(session) = index.remove(&session_id) {
            evicted.push((session, EvictionReason::Stale));
        }
    }

    while index.user_sessions(user_id).count() >= policy.max_concurrent_sessions {
        let Some(victim) = least_recently_active(index.user_sessions(user_id)) else {
            break;
        };
        let victim = victim.session_id.clone();
        match index.remove(&victim) {
            Some(session) => evicted.push((session, EvictionReason::UserLimit)),
            None => break,
        }
    }

    loop {
        let on_device = index
            .user_sessions(user_id)
            .filter(|s| s.device_fingerprint.id == device_id);
        if on_device.clone().count() < policy.max_sessions_per_device {
            break;
        }
        let victim = least_recently_active(on_device).map(|s| s.session_id.clone());
        match victim.and_then(|id| index.remove(&id)) {
            Some(session) => evicted.push((session, EvictionReason::DeviceLimit)),
            None => break,
        }
    }

    evicted
}

/// Smallest `last_activity`, ties broken by `session_id` so the choice is
/// deterministic.
pub fn least_recently_active<'a>(
    sessions: impl Iterator<Item = &'a SessionData>,
) -> Option<&'a SessionData> {
    sessions.min_by(|a, b| {
        a.last_activity
            .cmp(&b.last_activity)
            .then_with(|| a.session_id.cmp(&b.session_id))
    })
}
