use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use validator::Validate;
use warden_models::{DeviceFingerprint, FingerprintComparison, NewSession, SessionData, SessionStats};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::fingerprint;
use crate::limits::{enforce_limits, EvictionReason, LimitPolicy};
use crate::sweeper::{self, ExpirySweeper};
use crate::trust;

/// Primary `session_id -> SessionData` map plus the `user_id -> {session_id}`
/// index. Every mutation goes through `insert`/`remove` so the two never
/// disagree and no empty user set is left behind.
#[derive(Debug, Default)]
pub(crate) struct SessionIndex {
    sessions: HashMap<String, SessionData>,
    by_user: HashMap<String, HashSet<String>>,
}

impl SessionIndex {
    pub(crate) fn insert(&mut self, session: SessionData) {
        self.by_user
            .entry(session.user_id.clone())
            .or_default()
            .insert(session.session_id.clone());
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub(crate) fn remove(&mut self, session_id: &str) -> Option<SessionData> {
        let session = self.sessions.remove(session_id)?;
        if let Some(ids) = self.by_user.get_mut(&session.user_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<&SessionData> {
        self.sessions.get(session_id)
    }

    pub(crate) fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionData> {
        self.sessions.get_mut(session_id)
    }

    pub(crate) fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub(crate) fn user_sessions<'a>(
        &'a self,
        user_id: &str,
    ) -> impl Iterator<Item = &'a SessionData> + Clone + 'a {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.sessions.get(id))
    }

    pub(crate) fn user_session_ids(&self, user_id: &str) -> Vec<String> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SessionData> {
        self.sessions.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.by_user.len()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (user_id, ids) in &self.by_user {
            assert!(!ids.is_empty(), "empty index entry for {}", user_id);
            for id in ids {
                let session = self.sessions.get(id).expect("indexed session missing");
                assert_eq!(&session.user_id, user_id);
            }
        }
        for (id, session) in &self.sessions {
            assert!(self.by_user.get(&session.user_id).is_some_and(|ids| ids.contains(id)));
        }
    }
}

/// Owns every live session and enforces the lifecycle rules around them.
///
/// One `RwLock` guards both maps. Validation takes the write lock so the
/// expiry check, the activity bump and any removal happen as one step; the
/// sweeper never sees a half-updated record.
pub struct SessionManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    store: Arc<RwLock<SessionIndex>>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            clock,
            store: Arc::new(RwLock::new(SessionIndex::default())),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Admit a new session, evicting older ones first if the user or device
    /// is at its limit.
    pub async fn create_session(&self, request: NewSession) -> Result<SessionData> {
        if request.user_id.trim().is_empty() {
            return Err(SessionError::InvalidInput("user_id must not be empty".to_string()));
        }
        if request.device_fingerprint.id.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "device fingerprint id must not be empty".to_string(),
            ));
        }

        let trust_level = trust::trust_level(&request.device_fingerprint);
        let ip_address = request
            .ip_address
            .or_else(|| request.device_fingerprint.ip_address.clone());
        let user_agent = request.user_agent.or_else(|| {
            Some(request.device_fingerprint.user_agent.clone()).filter(|ua| !ua.is_empty())
        });

        let mut store = self.store.write().await;
        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.config.session_timeout()).ok_or_else(|| {
            SessionError::Configuration("session timeout overflows the clock".to_string())
        })?;

        let evicted = enforce_limits(
            &mut store,
            &request.user_id,
            &request.device_fingerprint.id,
            LimitPolicy::from(&self.config),
            now,
            self.config.inactivity_timeout(),
        );

        let mut session_id = generate_session_id(&request.user_id, &request.device_fingerprint.id, now);
        while store.contains(&session_id) {
            session_id = generate_session_id(&request.user_id, &request.device_fingerprint.id, now);
        }

        let session = SessionData {
            session_id,
            user_id: request.user_id,
            device_fingerprint: request.device_fingerprint,
            created_at: now,
            last_activity: now,
            expires_at,
            ip_address,
            user_agent,
            is_active: true,
            trust_level,
            location: request.location,
        };
        store.insert(session.clone());
        drop(store);

        for (victim, reason) in &evicted {
            match reason {
                EvictionReason::Stale => tracing::debug!(
                    "Dropped stale session {} for user {}",
                    victim.session_id,
                    victim.user_id
                ),
                _ => tracing::info!(
                    "Evicted session {} for user {} ({:?})",
                    victim.session_id,
                    victim.user_id,
                    reason
                ),
            }
        }
        tracing::debug!(
            "Created session {} for user {} (trust={})",
            session.session_id,
            session.user_id,
            session.trust_level
        );

        Ok(session)
    }

    /// Check a session and record activity on it.
    ///
    /// Expired and idle sessions are removed on the spot, so once this returns
    /// `Expired`, `Inactive` or `NotFound` every later call returns `NotFound`.
    pub async fn validate_session(&self, session_id: &str) -> Result<SessionData> {
        let mut store = self.store.write().await;
        let now = self.clock.now();

        let outcome = match store.get_mut(session_id) {
            None => return Err(SessionError::NotFound),
            Some(session) if session.is_expired_at(now) => SessionError::Expired,
            Some(session) if session.is_idle_at(now, self.config.inactivity_timeout()) => {
                SessionError::Inactive
            }
            Some(session) => {
                session.last_activity = now;
                return Ok(session.clone());
            }
        };

        store.remove(session_id);
        tracing::debug!("Removed session {}: {}", session_id, outcome);
        Err(outcome)
    }

    /// Lightweight heartbeat: bump `last_activity` without expiry checks.
    /// Does nothing if the session is gone.
    pub async fn touch(&self, session_id: &str) {
        let mut store = self.store.write().await;
        let now = self.clock.now();
        if let Some(session) = store.get_mut(session_id) {
            session.last_activity = now;
        }
    }

    /// Read a session without recording activity.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionData> {
        self.store.read().await.get(session_id).cloned()
    }

    /// Delete a session. Returns the removed record, marked inactive.
    pub async fn remove_session(&self, session_id: &str) -> Option<SessionData> {
        let removed = self.store.write().await.remove(session_id);
        removed.map(|mut session| {
            session.is_active = false;
            tracing::debug!("Removed session {} for user {}", session_id, session.user_id);
            session
        })
    }

    /// Live sessions of a user, newest first.
    pub async fn get_user_sessions(&self, user_id: &str) -> Vec<SessionData> {
        let store = self.store.read().await;
        let now = self.clock.now();
        let inactivity = self.config.inactivity_timeout();

        let mut sessions: Vec<SessionData> = store
            .user_sessions(user_id)
            .filter(|s| !s.is_expired_at(now) && !s.is_idle_at(now, inactivity))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Remove every session of `user_id` except `keep_session_id`.
    ///
    /// This revokes everything else as of the moment the lock is taken. A
    /// `create_session` for the same user racing with this call may land
    /// before (and be revoked) or after (and survive); both are acceptable.
    pub async fn revoke_other_sessions(&self, user_id: &str, keep_session_id: &str) -> usize {
        let mut store = self.store.write().await;
        let mut revoked = 0;
        for session_id in store.user_session_ids(user_id) {
            if session_id != keep_session_id && store.remove(&session_id).is_some() {
                revoked += 1;
            }
        }
        drop(store);

        if revoked > 0 {
            tracing::info!("Revoked {} other sessions for user {}", revoked, user_id);
        }
        revoked
    }

    /// Log a user out everywhere.
    pub async fn revoke_all_sessions(&self, user_id: &str) -> usize {
        let mut store = self.store.write().await;
        let mut revoked = 0;
        for session_id in store.user_session_ids(user_id) {
            if store.remove(&session_id).is_some() {
                revoked += 1;
            }
        }
        drop(store);

        tracing::info!("Revoked all {} sessions for user {}", revoked, user_id);
        revoked
    }

    /// Compare a request's fingerprint with the one the session was created
    /// from. A suspicious result is a hint for step-up authentication, not a
    /// verdict.
    pub async fn verify_device(
        &self,
        session_id: &str,
        current: &DeviceFingerprint,
    ) -> Result<FingerprintComparison> {
        let stored = self
            .store
            .read()
            .await
            .get(session_id)
            .map(|s| s.device_fingerprint.clone())
            .ok_or(SessionError::NotFound)?;

        let comparison = fingerprint::compare(current, &stored);
        if comparison.suspicious {
            tracing::warn!(
                "Suspicious device change on session {}: similarity={:.2}, changed={:?}",
                session_id,
                comparison.similarity,
                comparison.changed_fields
            );
        }
        Ok(comparison)
    }

    pub async fn get_stats(&self) -> SessionStats {
        let store = self.store.read().await;
        let now = self.clock.now();
        let inactivity = self.config.inactivity_timeout();

        let total_sessions = store.len();
        let active_sessions = store
            .iter()
            .filter(|s| s.is_active && !s.is_expired_at(now) && !s.is_idle_at(now, inactivity))
            .count();
        let total_users = store.user_count();
        let average_sessions_per_user = if total_users == 0 {
            0.0
        } else {
            total_sessions as f64 / total_users as f64
        };

        SessionStats {
            total_sessions,
            active_sessions,
            total_users,
            average_sessions_per_user,
        }
    }

    /// Run one expiry sweep now. Returns how many sessions were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        sweeper::sweep(&self.store, self.clock.as_ref(), self.config.inactivity_timeout()).await
    }

    /// Start the periodic expiry sweep on the current tokio runtime. Calling
    /// it again while a sweeper is running does nothing.
    pub fn start_cleanup_task(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::warn!("Session cleanup task already running");
            return;
        }

        *slot = Some(ExpirySweeper::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.inactivity_timeout(),
            self.config.cleanup_interval(),
        ));
    }

    /// Stop the background sweeper and wait for it to finish.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn assert_consistent(&self) {
        self.store.read().await.assert_consistent();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            sweeper.cancel();
        }
    }
}

/// Unguessable id from the owner, device, creation time and 32 random bytes.
fn generate_session_id(user_id: &str, device_id: &str, created_at: DateTime<Utc>) -> String {
    let mut nonce = [0u8; 32];
    OsRng.fill_bytes(&mut nonce);

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(device_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(created_at.timestamp_micros().to_be_bytes());
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}
