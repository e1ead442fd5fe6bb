use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{Result, SessionError};
use crate::store::SessionIndex;

/// Sessions removed per write-lock acquisition, so request-path validation
/// never waits behind a whole sweep.
const SWEEP_BATCH: usize = 256;

/// How long a sweep waits for the write lock before giving up until the next
/// tick.
const LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Remove every session past its absolute or inactivity deadline.
///
/// Candidates are collected under the read lock and re-checked under the
/// write lock, since a request may have touched one in between.
pub(crate) async fn sweep(
    store: &RwLock<SessionIndex>,
    clock: &dyn Clock,
    inactivity_timeout: Duration,
) -> Result<usize> {
    let candidates: Vec<String> = {
        let index = store.read().await;
        let now = clock.now();
        index
            .iter()
            .filter(|s| s.is_expired_at(now) || s.is_idle_at(now, inactivity_timeout))
            .map(|s| s.session_id.clone())
            .collect()
    };

    let mut removed = 0;
    for batch in candidates.chunks(SWEEP_BATCH) {
        let mut index = tokio::time::timeout(LOCK_TIMEOUT, store.write())
            .await
            .map_err(|_| SessionError::Storage("timed out waiting for session store lock".to_string()))?;
        let now = clock.now();

        for session_id in batch {
            let stale = index
                .get(session_id)
                .is_some_and(|s| s.is_expired_at(now) || s.is_idle_at(now, inactivity_timeout));
            if stale && index.remove(session_id).is_some() {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

/// Handle to the background sweep loop.
pub(crate) struct ExpirySweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub(crate) fn spawn(
        store: Arc<RwLock<SessionIndex>>,
        clock: Arc<dyn Clock>,
        inactivity_timeout: Duration,
        interval: std::time::Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!("Session cleanup task started (every {}s)", interval.as_secs());

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match sweep(&store, clock.as_ref(), inactivity_timeout).await {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::info!("Session cleanup: removed {} expired sessions", removed)
                    }
                    Err(e) => tracing::error!("Session cleanup failed, retrying next tick: {}", e),
                }
            }

            tracing::info!("Session cleanup task stopped");
        });

        Self { cancel, handle }
    }

    /// Signal the loop to stop without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Session cleanup task ended abnormally: {}", e);
        }
    }
}
