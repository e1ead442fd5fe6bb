use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::TrustLevel;

/// Placeholder for attributes that can only be observed on the client.
pub const SERVER_UNKNOWN: &str = "server-unknown";

/// The fixed header subset kept on a fingerprint, keyed by lowercase header
/// name. A `BTreeMap` keeps iteration order stable for hashing.
pub type FingerprintHeaders = BTreeMap<String, String>;

/// Snapshot of a device/browser environment.
///
/// `id` is a similarity key derived from the descriptive attributes and
/// headers. It is not a secret and must not be used to authenticate anyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub id: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub screen_resolution: String,
    #[serde(default)]
    pub color_depth: u32,
    #[serde(default)]
    pub cookie_enabled: bool,
    #[serde(default)]
    pub do_not_track: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub headers: FingerprintHeaders,
}

/// Result of comparing a fresh fingerprint against a stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintComparison {
    /// Fraction of checks that matched, in `[0, 1]`.
    pub similarity: f64,
    pub suspicious: bool,
    pub changed_fields: Vec<String>,
}

/// An entry in the trusted-device allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub fingerprint_id: String,
    pub device_name: String,
    pub last_seen: DateTime<Utc>,
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub location: Option<String>,
    pub is_trusted: bool,
}
