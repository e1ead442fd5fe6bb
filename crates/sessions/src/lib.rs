//! Session lifecycle and device trust.
//!
//! [`SessionManager`] owns the in-memory session store: creation with
//! per-user and per-device limits, validation against absolute and
//! inactivity deadlines, revocation, and a background expiry sweep.
//! [`TrustedDeviceRegistry`] keeps the per-user allowlist of confirmed
//! devices in caller-provided storage.

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limits;
pub mod store;
mod sweeper;
pub mod trust;
pub mod trusted_devices;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use fingerprint::{
    build_from_client_environment, build_from_request, compare, describe_device, device_label,
    header_similarity, ClientEnvironment, DeviceDescription, EnvironmentProvider,
    RequestEnvironment,
};
pub use limits::{EvictionReason, LimitPolicy};
pub use store::SessionManager;
pub use trust::{trust_level, trust_score};
pub use trusted_devices::{FileStore, MemoryStore, TrustedDeviceRegistry, TrustedDeviceStorage};

pub use warden_models::{
    DeviceFingerprint, FingerprintComparison, NewSession, SessionData, SessionStats, TrustLevel,
    TrustedDevice,
};

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
