//! Allowlist of devices a user has confirmed, used to skip extra
//! verification on recognised devices.
//!
//! The list lives outside the session store, behind a small key-value
//! interface, so it can sit in a local file, Redis, or whatever the caller
//! considers durable. Entries are never trusted past the configured window,
//! whether or not anyone removed them.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use validator::Validate;
use warden_cache::{trusted_devices_key, Cache};
use warden_models::{DeviceFingerprint, TrustLevel, TrustedDevice};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::fingerprint::device_label;

/// String key-value persistence behind the registry. The registry stores one
/// JSON document per owner.
#[async_trait]
pub trait TrustedDeviceStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustedDeviceStorage for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside `dir`, named by the SHA-256 of the key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    // Distinct keys map to distinct files, always directly inside `dir`.
    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl TrustedDeviceStorage for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TrustedDeviceStorage for Cache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(Cache::get::<String>(self, key).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        Ok(Cache::set(self, key, &value, None).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Ok(Cache::delete(self, key).await?)
    }
}

/// Trusted devices of one owner, most recently added first.
pub struct TrustedDeviceRegistry {
    storage: Arc<dyn TrustedDeviceStorage>,
    key: String,
    max_devices: usize,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    // Serialises read-modify-write cycles against the backing store.
    write_lock: Mutex<()>,
}

impl TrustedDeviceRegistry {
    pub fn new(
        storage: Arc<dyn TrustedDeviceStorage>,
        owner: &str,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            storage,
            key: trusted_devices_key(owner),
            max_devices: config.max_trusted_devices,
            window: config.trusted_device_window(),
            clock,
            write_lock: Mutex::new(()),
        })
    }

    /// Add or replace an entry, keeping at most `max_trusted_devices`.
    pub async fn add_trusted_device(&self, device: TrustedDevice) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.load().await?;

        devices.retain(|d| d.fingerprint_id != device.fingerprint_id);
        tracing::debug!("Trusting device {} ({})", device.fingerprint_id, device.device_name);
        devices.insert(0, device);
        devices.truncate(self.max_devices);

        self.save(&devices).await
    }

    /// Trust the device described by `fingerprint` as of now.
    pub async fn trust_device(
        &self,
        fingerprint: &DeviceFingerprint,
        trust_level: TrustLevel,
        location: Option<String>,
    ) -> Result<TrustedDevice> {
        let device = TrustedDevice {
            fingerprint_id: fingerprint.id.clone(),
            device_name: device_label(fingerprint),
            last_seen: self.clock.now(),
            trust_level,
            location,
            is_trusted: true,
        };
        self.add_trusted_device(device.clone()).await?;
        Ok(device)
    }

    pub async fn is_device_trusted(&self, fingerprint_id: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .load()
            .await?
            .iter()
            .any(|d| d.fingerprint_id == fingerprint_id && self.is_current(d, now)))
    }

    /// Entries still inside the trust window.
    pub async fn list_trusted_devices(&self) -> Result<Vec<TrustedDevice>> {
        let now = self.clock.now();
        let mut devices = self.load().await?;
        devices.retain(|d| self.is_current(d, now));
        Ok(devices)
    }

    /// Refresh `last_seen` and move the entry to the front. Returns false if
    /// the device is not in the list.
    pub async fn mark_seen(&self, fingerprint_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.load().await?;

        let Some(pos) = devices.iter().position(|d| d.fingerprint_id == fingerprint_id) else {
            return Ok(false);
        };
        let mut device = devices.remove(pos);
        device.last_seen = self.clock.now();
        devices.insert(0, device);

        self.save(&devices).await?;
        Ok(true)
    }

    pub async fn remove_trusted_device(&self, fingerprint_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.load().await?;

        let before = devices.len();
        devices.retain(|d| d.fingerprint_id != fingerprint_id);
        if devices.len() == before {
            return Ok(false);
        }

        self.save(&devices).await?;
        tracing::debug!("Removed trusted device {}", fingerprint_id);
        Ok(true)
    }

    pub async fn clear_trusted_devices(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.delete(&self.key).await
    }

    fn is_current(&self, device: &TrustedDevice, now: chrono::DateTime<chrono::Utc>) -> bool {
        device.is_trusted && now - device.last_seen <= self.window
    }

    async fn load(&self) -> Result<Vec<TrustedDevice>> {
        let Some(raw) = self.storage.get(&self.key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(devices) => Ok(devices),
            Err(e) => {
                // Caller-durable data may be hand-edited or truncated; start over.
                tracing::warn!("Discarding unreadable trusted-device list {}: {}", self.key, e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, devices: &[TrustedDevice]) -> Result<()> {
        let raw = serde_json::to_string(devices)?;
        self.storage.set(&self.key, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use warden_cache::CacheConfig;

    fn device(id: &str, last_seen: chrono::DateTime<chrono::Utc>) -> TrustedDevice {
        TrustedDevice {
            fingerprint_id: id.to_string(),
            device_name: format!("Device {}", id),
            last_seen,
            trust_level: TrustLevel::High,
            location: None,
            is_trusted: true,
        }
    }

    fn registry(storage: Arc<dyn TrustedDeviceStorage>, clock: &ManualClock) -> TrustedDeviceRegistry {
        TrustedDeviceRegistry::new(storage, "u1", &SessionConfig::default(), Arc::new(clock.clone()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_cap_keeps_most_recent() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);

        for i in 1..=6 {
            registry.add_trusted_device(device(&format!("fp{}", i), clock.now())).await.unwrap();
        }

        let ids: Vec<String> = registry
            .list_trusted_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.fingerprint_id)
            .collect();
        assert_eq!(ids, vec!["fp6", "fp5", "fp4", "fp3", "fp2"]);
        assert!(!registry.is_device_trusted("fp1").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_replaces_existing_entry() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);

        registry.add_trusted_device(device("a", clock.now())).await.unwrap();
        registry.add_trusted_device(device("b", clock.now())).await.unwrap();
        let mut renamed = device("a", clock.now());
        renamed.device_name = "Laptop".to_string();
        registry.add_trusted_device(renamed).await.unwrap();

        let devices = registry.list_trusted_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].fingerprint_id, "a");
        assert_eq!(devices[0].device_name, "Laptop");
    }

    #[tokio::test]
    async fn test_trust_window() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);
        registry.add_trusted_device(device("a", clock.now())).await.unwrap();

        clock.advance(Duration::days(30));
        assert!(registry.is_device_trusted("a").await.unwrap());

        clock.advance(Duration::seconds(1));
        assert!(!registry.is_device_trusted("a").await.unwrap());
        assert!(registry.list_trusted_devices().await.unwrap().is_empty());

        // Seeing the device again restores trust.
        assert!(registry.mark_seen("a").await.unwrap());
        assert!(registry.is_device_trusted("a").await.unwrap());
        assert!(!registry.mark_seen("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_untrusted_flag() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);
        let mut revoked = device("a", clock.now());
        revoked.is_trusted = false;
        registry.add_trusted_device(revoked).await.unwrap();

        assert!(!registry.is_device_trusted("a").await.unwrap());
        assert!(!registry.is_device_trusted("never-seen").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_seen_moves_to_front() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);
        registry.add_trusted_device(device("a", clock.now())).await.unwrap();
        registry.add_trusted_device(device("b", clock.now())).await.unwrap();

        clock.advance(Duration::hours(1));
        registry.mark_seen("a").await.unwrap();

        let devices = registry.list_trusted_devices().await.unwrap();
        assert_eq!(devices[0].fingerprint_id, "a");
        assert_eq!(devices[0].last_seen, clock.now());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);
        registry.add_trusted_device(device("a", clock.now())).await.unwrap();
        registry.add_trusted_device(device("b", clock.now())).await.unwrap();

        assert!(registry.remove_trusted_device("a").await.unwrap());
        assert!(!registry.remove_trusted_device("a").await.unwrap());
        assert!(registry.is_device_trusted("b").await.unwrap());

        registry.clear_trusted_devices().await.unwrap();
        assert!(registry.list_trusted_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trust_device_from_fingerprint() {
        let clock = ManualClock::default();
        let registry = registry(Arc::new(MemoryStore::new()), &clock);

        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "user-agent",
            axum::http::HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
            ),
        );
        let fingerprint = crate::fingerprint::build_from_request(&headers, None, clock.now());

        let trusted = registry
            .trust_device(&fingerprint, TrustLevel::Medium, Some("Berlin".to_string()))
            .await
            .unwrap();

        assert_eq!(trusted.device_name, "Firefox on Linux");
        assert!(registry.is_device_trusted(&fingerprint.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_list_is_discarded() {
        let clock = ManualClock::default();
        let storage = Arc::new(MemoryStore::new());
        storage.set(&trusted_devices_key("u1"), "{not json".to_string()).await.unwrap();
        let registry = registry(storage, &clock);

        assert!(registry.list_trusted_devices().await.unwrap().is_empty());
        registry.add_trusted_device(device("a", clock.now())).await.unwrap();
        assert!(registry.is_device_trusted("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::default();

        let first = registry(Arc::new(FileStore::new(dir.path())), &clock);
        first.add_trusted_device(device("a", clock.now())).await.unwrap();
        drop(first);

        let second = registry(Arc::new(FileStore::new(dir.path())), &clock);
        assert!(second.is_device_trusted("a").await.unwrap());

        second.clear_trusted_devices().await.unwrap();
        second.clear_trusted_devices().await.unwrap();
        assert!(!second.is_device_trusted("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_keys_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.set("trusted_devices:../evil", "[]".to_string()).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].len(), 64 + ".json".len());
        assert!(!dir.path().parent().unwrap().join("evil.json").exists());
        assert_eq!(store.get("trusted_devices:../evil").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_owners_with_similar_names_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::default();
        let config = SessionConfig::default();

        let alice = TrustedDeviceRegistry::new(
            Arc::new(FileStore::new(dir.path())),
            "alice@x.com",
            &config,
            Arc::new(clock.clone()),
        )
        .unwrap();
        let lookalike = TrustedDeviceRegistry::new(
            Arc::new(FileStore::new(dir.path())),
            "alice_x_com",
            &config,
            Arc::new(clock.clone()),
        )
        .unwrap();

        alice.add_trusted_device(device("fp-alice", clock.now())).await.unwrap();

        assert!(alice.is_device_trusted("fp-alice").await.unwrap());
        assert!(!lookalike.is_device_trusted("fp-alice").await.unwrap());
        assert!(lookalike.list_trusted_devices().await.unwrap().is_empty());

        lookalike.clear_trusted_devices().await.unwrap();
        assert!(alice.is_device_trusted("fp-alice").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Only run with Redis available
    async fn test_redis_backed_registry() {
        let cache = Cache::new(CacheConfig::from_env()).await.expect("Failed to connect to Redis");
        let clock = ManualClock::default();
        let registry = registry(Arc::new(cache), &clock);

        registry.clear_trusted_devices().await.unwrap();
        registry.add_trusted_device(device("redis-fp", clock.now())).await.unwrap();
        assert!(registry.is_device_trusted("redis-fp").await.unwrap());
        registry.clear_trusted_devices().await.unwrap();
    }
}
