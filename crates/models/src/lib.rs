pub mod device;
pub mod session;

// Re-export commonly used types
pub use device::{
    DeviceFingerprint, FingerprintComparison, FingerprintHeaders, TrustedDevice,
    SERVER_UNKNOWN,
};
pub use session::{NewSession, SessionData, SessionStats, TrustLevel};
