//! Device fingerprint construction and comparison.
//!
//! A fingerprint summarises what a client looks like so that a later request
//! can be checked against the snapshot stored on its session. The resulting
//! `id` is a similarity key only: anyone who can reproduce the inputs can
//! reproduce the id, so it never authenticates anything on its own.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use warden_models::{DeviceFingerprint, FingerprintComparison, FingerprintHeaders, SERVER_UNKNOWN};

/// Upper bound on the stored user agent. Longer values are cut, not rejected.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// The user agent copy kept in the header bundle is shorter still.
pub const HEADER_USER_AGENT_LEN: usize = 100;

/// Headers captured into `DeviceFingerprint::headers`, in hashing order.
pub const FINGERPRINT_HEADERS: [&str; 4] = ["accept-language", "accept-encoding", "accept", "user-agent"];

/// Header bundles at or above this ratio count as one match.
pub const HEADER_MATCH_THRESHOLD: f64 = 0.8;

/// Comparisons scoring below this are flagged as suspicious. Tunable.
pub const SUSPICIOUS_SIMILARITY: f64 = 0.7;

const COMPARISON_CHECKS: f64 = 4.0;

pub const UNKNOWN_PLATFORM: &str = "Unknown";

// Ordered: first match wins. Android user agents also mention Linux and
// iPhones mention "Mac OS X", so those classify as Linux and macOS here.
const PLATFORMS: [(&str, &[&str]); 5] = [
    ("Windows", &["windows", "win32", "win64"]),
    ("macOS", &["mac"]),
    ("Linux", &["linux"]),
    ("Android", &["android"]),
    ("iOS", &["iphone", "ipad", "ios"]),
];

/// Descriptive attributes of a client environment before hashing.
///
/// Every field is optional so a degraded or partial report still produces a
/// fingerprint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientEnvironment {
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub screen_resolution: Option<String>,
    pub color_depth: Option<u32>,
    pub cookie_enabled: Option<bool>,
    pub do_not_track: Option<String>,
}

/// Supplies the environment a fingerprint is built from.
pub trait EnvironmentProvider {
    fn environment(&self) -> ClientEnvironment;
}

/// A report sent by the client after page load carries the rich attributes.
impl EnvironmentProvider for ClientEnvironment {
    fn environment(&self) -> ClientEnvironment {
        self.clone()
    }
}

/// Environment derived from request headers alone. Attributes only the
/// client can observe are filled with the `server-unknown` sentinel.
pub struct RequestEnvironment<'a> {
    headers: &'a HeaderMap,
}

impl<'a> RequestEnvironment<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }
}

impl EnvironmentProvider for RequestEnvironment<'_> {
    fn environment(&self) -> ClientEnvironment {
        let user_agent = header_value(self.headers, "user-agent");
        let accept_language = header_value(self.headers, "accept-language");
        let do_not_track = Some(header_value(self.headers, "dnt")).filter(|v| !v.is_empty());

        ClientEnvironment {
            platform: Some(detect_platform(&user_agent).to_string()),
            language: Some(primary_language(&accept_language)),
            user_agent: Some(user_agent),
            timezone: Some(SERVER_UNKNOWN.to_string()),
            screen_resolution: Some(SERVER_UNKNOWN.to_string()),
            color_depth: Some(0),
            cookie_enabled: Some(self.headers.contains_key("cookie")),
            do_not_track,
        }
    }
}

/// Build a fingerprint from server-visible request metadata.
pub fn build_from_request(
    headers: &HeaderMap,
    ip_address: Option<&str>,
    now: DateTime<Utc>,
) -> DeviceFingerprint {
    let env = RequestEnvironment::new(headers).environment();
    let user_agent = truncate_chars(env.user_agent.as_deref().unwrap_or_default(), MAX_USER_AGENT_LEN);
    let platform = env.platform.unwrap_or_else(|| UNKNOWN_PLATFORM.to_string());
    let language = env.language.unwrap_or_default();
    let captured = capture_headers(headers);

    let mut parts: Vec<&str> = vec![user_agent.as_str(), platform.as_str(), language.as_str()];
    let header_parts: Vec<String> = captured.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    parts.extend(header_parts.iter().map(String::as_str));

    DeviceFingerprint {
        id: hash_parts(&parts),
        user_agent,
        platform,
        language,
        timezone: env.timezone.unwrap_or_default(),
        screen_resolution: env.screen_resolution.unwrap_or_default(),
        color_depth: env.color_depth.unwrap_or_default(),
        cookie_enabled: env.cookie_enabled.unwrap_or_default(),
        do_not_track: env.do_not_track,
        timestamp: Some(now),
        ip_address: ip_address.map(str::to_string),
        headers: captured,
    }
}

/// Build a fingerprint from whatever the provider reports. Never fails:
/// missing strings become `""` and missing numbers `0`.
pub fn build_from_client_environment(
    provider: &dyn EnvironmentProvider,
    now: DateTime<Utc>,
) -> DeviceFingerprint {
    let env = provider.environment();
    let user_agent = truncate_chars(env.user_agent.as_deref().unwrap_or_default(), MAX_USER_AGENT_LEN);

    // Browsers report raw values like "Win32" or "MacIntel"; fall back to the
    // user agent when the reported platform is unrecognised.
    let reported = env.platform.unwrap_or_default();
    let platform = match detect_platform(&reported) {
        UNKNOWN_PLATFORM => detect_platform(&user_agent),
        known => known,
    }
    .to_string();

    let language = env.language.unwrap_or_default();
    let timezone = env.timezone.unwrap_or_default();
    let screen_resolution = env.screen_resolution.unwrap_or_default();
    let color_depth = env.color_depth.unwrap_or_default();
    let color_depth_str = color_depth.to_string();

    let id = hash_parts(&[
        user_agent.as_str(),
        platform.as_str(),
        language.as_str(),
        timezone.as_str(),
        screen_resolution.as_str(),
        color_depth_str.as_str(),
    ]);

    DeviceFingerprint {
        id,
        user_agent,
        platform,
        language,
        timezone,
        screen_resolution,
        color_depth,
        cookie_enabled: env.cookie_enabled.unwrap_or_default(),
        do_not_track: env.do_not_track,
        timestamp: Some(now),
        ip_address: None,
        headers: FingerprintHeaders::new(),
    }
}

/// Compare a freshly built fingerprint against a stored one.
///
/// This is a heuristic anomaly signal for step-up authentication or alerting.
/// It is not a security boundary: every compared field is client-controlled.
/// The IP address and timestamp are deliberately not compared.
pub fn compare(current: &DeviceFingerprint, stored: &DeviceFingerprint) -> FingerprintComparison {
    let mut matches = 0u32;
    let mut changed_fields = Vec::new();

    let scalar_checks = [
        ("user_agent", &current.user_agent, &stored.user_agent),
        ("platform", &current.platform, &stored.platform),
        ("language", &current.language, &stored.language),
    ];
    for (field, a, b) in scalar_checks {
        if a == b {
            matches += 1;
        } else {
            changed_fields.push(field.to_string());
        }
    }

    if header_similarity(&current.headers, &stored.headers) >= HEADER_MATCH_THRESHOLD {
        matches += 1;
    } else {
        changed_fields.push("headers".to_string());
    }

    let similarity = f64::from(matches) / COMPARISON_CHECKS;

    FingerprintComparison {
        similarity,
        suspicious: similarity < SUSPICIOUS_SIMILARITY,
        changed_fields,
    }
}

/// Equal key/value pairs over the union of keys. Two empty bundles are
/// identical.
pub fn header_similarity(a: &FingerprintHeaders, b: &FingerprintHeaders) -> f64 {
    let union: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if union.is_empty() {
        return 1.0;
    }

    let equal = a.iter().filter(|(k, v)| b.get(*k) == Some(*v)).count();
    equal as f64 / union.len() as f64
}

/// Case-insensitive substring match against the ordered platform list.
pub fn detect_platform(source: &str) -> &'static str {
    let lower = source.to_lowercase();
    PLATFORMS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(name, _)| *name)
        .unwrap_or(UNKNOWN_PLATFORM)
}

/// Human-oriented breakdown of a user agent, used for session listings and
/// trusted-device names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub device_type: String,
    pub browser: String,
    pub os: String,
}

pub fn describe_device(user_agent: &str) -> DeviceDescription {
    let ua = user_agent.to_lowercase();

    let device_type = if ua.contains("tablet") || ua.contains("ipad") {
        "Tablet"
    } else if ua.contains("mobile") || ua.contains("android") {
        "Mobile"
    } else {
        "Desktop"
    };

    let browser = if ua.contains("edg/") || ua.contains("edge") {
        "Microsoft Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("safari") {
        "Safari"
    } else if ua.contains("msie") || ua.contains("trident") {
        "Internet Explorer"
    } else {
        "Unknown Browser"
    };

    let os = if ua.contains("windows") {
        "Windows"
    } else if ua.contains("iphone") || ua.contains("ipad") {
        "iOS"
    } else if ua.contains("mac os x") || ua.contains("macos") {
        "macOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("cros") {
        "Chrome OS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown OS"
    };

    DeviceDescription {
        device_type: device_type.to_string(),
        browser: browser.to_string(),
        os: os.to_string(),
    }
}

/// A short name such as "Chrome on Windows".
pub fn device_label(fingerprint: &DeviceFingerprint) -> String {
    let description = describe_device(&fingerprint.user_agent);
    format!("{} on {}", description.browser, description.os)
}

fn capture_headers(headers: &HeaderMap) -> FingerprintHeaders {
    FINGERPRINT_HEADERS
        .iter()
        .map(|name| {
            let mut value = header_value(headers, name);
            if *name == "user-agent" {
                value = truncate_chars(&value, HEADER_USER_AGENT_LEN);
            }
            (name.to_string(), value)
        })
        .collect()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// "en-US,en;q=0.9" -> "en-US"
fn primary_language(accept_language: &str) -> String {
    accept_language
        .split(',')
        .next()
        .and_then(|first| first.split(';').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\0");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    fn request_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_str(user_agent).unwrap());
        headers.insert("accept-language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, deflate, br"));
        headers.insert("accept", HeaderValue::from_static("text/html"));
        headers
    }

    #[test]
    fn test_build_from_request() {
        let now = Utc::now();
        let fp = build_from_request(&request_headers(CHROME_WINDOWS), Some("10.0.0.1"), now);

        assert_eq!(fp.platform, "Windows");
        assert_eq!(fp.language, "en-US");
        assert_eq!(fp.timezone, SERVER_UNKNOWN);
        assert_eq!(fp.screen_resolution, SERVER_UNKNOWN);
        assert_eq!(fp.color_depth, 0);
        assert_eq!(fp.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(fp.timestamp, Some(now));
        assert_eq!(fp.headers.len(), FINGERPRINT_HEADERS.len());
        assert_eq!(fp.headers["user-agent"].chars().count(), HEADER_USER_AGENT_LEN);
        assert_eq!(fp.id.len(), 64);
    }

    #[test]
    fn test_id_is_deterministic_and_ignores_ip_and_time() {
        let headers = request_headers(CHROME_WINDOWS);
        let a = build_from_request(&headers, Some("10.0.0.1"), Utc::now());
        let b = build_from_request(&headers, Some("192.168.1.7"), Utc::now() + chrono::Duration::hours(1));

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, build_from_request(&request_headers(FIREFOX_LINUX), None, Utc::now()).id);
    }

    #[test]
    fn test_empty_headers_do_not_panic() {
        let fp = build_from_request(&HeaderMap::new(), None, Utc::now());

        assert_eq!(fp.user_agent, "");
        assert_eq!(fp.platform, UNKNOWN_PLATFORM);
        assert_eq!(fp.language, "");
        assert!(!fp.cookie_enabled);
        assert!(fp.headers.values().all(String::is_empty));
        assert_eq!(fp.id, build_from_request(&HeaderMap::new(), None, Utc::now()).id);
    }

    #[test]
    fn test_hostile_user_agent_is_truncated() {
        let long = "A".repeat(10_000);
        let fp = build_from_request(&request_headers(&long), None, Utc::now());
        assert_eq!(fp.user_agent.len(), MAX_USER_AGENT_LEN);
    }

    #[test]
    fn test_detect_platform_order() {
        assert_eq!(detect_platform(CHROME_WINDOWS), "Windows");
        assert_eq!(detect_platform("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)"), "macOS");
        assert_eq!(detect_platform(FIREFOX_LINUX), "Linux");
        // Android user agents contain "Linux", which is checked first.
        assert_eq!(detect_platform("Mozilla/5.0 (Linux; Android 14; Pixel 8)"), "Linux");
        assert_eq!(detect_platform("Dalvik/2.1.0 (Android 14)"), "Android");
        assert_eq!(detect_platform("MyApp/1.0 iOS/17.2"), "iOS");
        assert_eq!(detect_platform("curl/8.4.0"), UNKNOWN_PLATFORM);
    }

    #[test]
    fn test_build_from_client_environment() {
        let env = ClientEnvironment {
            user_agent: Some(CHROME_WINDOWS.to_string()),
            platform: Some("Win32".to_string()),
            language: Some("en-US".to_string()),
            timezone: Some("Europe/Berlin".to_string()),
            screen_resolution: Some("1920x1080".to_string()),
            color_depth: Some(24),
            cookie_enabled: Some(true),
            do_not_track: None,
        };
        let fp = build_from_client_environment(&env, Utc::now());

        assert_eq!(fp.platform, "Windows");
        assert_eq!(fp.screen_resolution, "1920x1080");
        assert_eq!(fp.color_depth, 24);
        assert!(fp.cookie_enabled);
        assert!(fp.headers.is_empty());
        assert_eq!(fp.id, build_from_client_environment(&env, Utc::now()).id);

        let moved = ClientEnvironment {
            timezone: Some("Asia/Tokyo".to_string()),
            ..env
        };
        assert_ne!(fp.id, build_from_client_environment(&moved, Utc::now()).id);
    }

    #[test]
    fn test_degraded_client_environment() {
        let fp = build_from_client_environment(&ClientEnvironment::default(), Utc::now());

        assert_eq!(fp.user_agent, "");
        assert_eq!(fp.platform, UNKNOWN_PLATFORM);
        assert_eq!(fp.color_depth, 0);
        assert_eq!(fp.screen_resolution, "");
        assert_eq!(fp.id.len(), 64);
    }

    #[test]
    fn test_compare_ignores_ip_address() {
        let headers = request_headers(CHROME_WINDOWS);
        let stored = build_from_request(&headers, Some("10.0.0.1"), Utc::now());
        let current = build_from_request(&headers, Some("203.0.113.9"), Utc::now());

        let result = compare(&current, &stored);
        assert_eq!(result.similarity, 1.0);
        assert!(!result.suspicious);
        assert!(result.changed_fields.is_empty());
    }

    #[test]
    fn test_compare_platform_and_headers_changed() {
        let stored = build_from_request(&request_headers(CHROME_WINDOWS), None, Utc::now());
        let mut current = stored.clone();
        current.platform = "Linux".to_string();
        current.headers.insert("accept".to_string(), "application/json".to_string());
        current.headers.insert("accept-encoding".to_string(), "identity".to_string());

        let result = compare(&current, &stored);
        assert!(result.similarity <= 0.5);
        assert!(result.suspicious);
        assert_eq!(result.changed_fields, vec!["platform".to_string(), "headers".to_string()]);
    }

    #[test]
    fn test_compare_single_change_is_not_suspicious() {
        let stored = build_from_request(&request_headers(CHROME_WINDOWS), None, Utc::now());
        let mut current = stored.clone();
        current.language = "de-DE".to_string();

        let result = compare(&current, &stored);
        assert_eq!(result.similarity, 0.75);
        assert!(!result.suspicious);
    }

    #[test]
    fn test_header_similarity() {
        let mut a = FingerprintHeaders::new();
        a.insert("accept".into(), "text/html".into());
        a.insert("accept-language".into(), "en".into());
        let mut b = a.clone();
        b.insert("accept-encoding".into(), "gzip".into());

        assert!((header_similarity(&a, &b) - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(header_similarity(&a, &a), 1.0);
        assert_eq!(header_similarity(&FingerprintHeaders::new(), &FingerprintHeaders::new()), 1.0);
    }

    #[test]
    fn test_describe_device() {
        let description = describe_device(CHROME_WINDOWS);
        assert_eq!(description.device_type, "Desktop");
        assert_eq!(description.browser, "Chrome");
        assert_eq!(description.os, "Windows");

        let iphone = describe_device(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(iphone.device_type, "Mobile");
        assert_eq!(iphone.browser, "Safari");
        assert_eq!(iphone.os, "iOS");
    }

    #[test]
    fn test_device_label() {
        let fp = build_from_request(&request_headers(FIREFOX_LINUX), None, Utc::now());
        assert_eq!(device_label(&fp), "Firefox on Linux");
    }
}
