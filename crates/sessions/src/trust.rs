//! Point-based trust scoring for new sessions.
//!
//! The score only looks at the shape of the fingerprint, never at history, so
//! the same fingerprint always yields the same level. The weights below are
//! heuristics kept for compatibility; a learned or history-aware model could
//! replace them without changing the call site.

use warden_models::{DeviceFingerprint, TrustLevel, SERVER_UNKNOWN};

pub const TIMESTAMP_POINTS: u32 = 30;
pub const USER_AGENT_POINTS: u32 = 20;
pub const DESKTOP_PLATFORM_POINTS: u32 = 20;
pub const COOKIE_POINTS: u32 = 15;
pub const SCREEN_POINTS: u32 = 15;

/// A user agent must be longer than this to earn points.
pub const MIN_USER_AGENT_LEN: usize = 50;

pub const HIGH_TRUST_SCORE: u32 = 80;
pub const MEDIUM_TRUST_SCORE: u32 = 50;

const DESKTOP_PLATFORMS: [&str; 3] = ["Windows", "macOS", "Linux"];

pub fn trust_score(fingerprint: &DeviceFingerprint) -> u32 {
    let mut score = 0;

    if fingerprint.timestamp.is_some() {
        score += TIMESTAMP_POINTS;
    }
    if fingerprint.user_agent.len() > MIN_USER_AGENT_LEN {
        score += USER_AGENT_POINTS;
    }
    if DESKTOP_PLATFORMS.contains(&fingerprint.platform.as_str()) {
        score += DESKTOP_PLATFORM_POINTS;
    }
    if fingerprint.cookie_enabled {
        score += COOKIE_POINTS;
    }
    if !fingerprint.screen_resolution.is_empty() && fingerprint.screen_resolution != SERVER_UNKNOWN {
        score += SCREEN_POINTS;
    }

    score
}

pub fn trust_level(fingerprint: &DeviceFingerprint) -> TrustLevel {
    match trust_score(fingerprint) {
        s if s >= HIGH_TRUST_SCORE => TrustLevel::High,
        s if s >= MEDIUM_TRUST_SCORE => TrustLevel::Medium,
        _ => TrustLevel::Low,
    }
}
