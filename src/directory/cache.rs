//! Cached peer list
//!
//! The media path reads the peer list on every packet, so it must never wait
//! on the directory. Readers clone an `Arc` snapshot; a refresh builds a new
//! list and swaps it in whole.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{CircuitBreaker, PeerDirectory, PeerEndpoint};

/// Result of one refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The directory answered and the snapshot was replaced
    Updated,
    /// The directory call failed; the previous snapshot is kept
    Failed,
    /// The breaker is open; no call was made
    Skipped,
}

pub struct PeerCache {
    directory: Arc<dyn PeerDirectory>,
    room_id: String,
    local_id: String,
    peers: RwLock<Arc<[PeerEndpoint]>>,
    breaker: Mutex<CircuitBreaker>,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

impl PeerCache {
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        room_id: impl Into<String>,
        local_id: impl Into<String>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            directory,
            room_id: room_id.into(),
            local_id: local_id.into(),
            peers: RwLock::new(Arc::from(Vec::<PeerEndpoint>::new())),
            breaker: Mutex::new(breaker),
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// Query the directory, unless the breaker says not to
    pub async fn refresh(&self, now: Instant) -> RefreshOutcome {
        if !self.breaker.lock().allow(now) {
            tracing::debug!("Skipping peer refresh for room {}: breaker open", self.room_id);
            return RefreshOutcome::Skipped;
        }

        match self.directory.get_all_peers(&self.room_id).await {
            Ok(peers) => {
                self.breaker.lock().record_success();
                let peers: Vec<PeerEndpoint> = peers
                    .into_iter()
                    .filter(|p| p.user_id != self.local_id)
                    .collect();
                let count = peers.len();
                *self.peers.write() = Arc::from(peers);
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Peer list for room {} refreshed: {} peers", self.room_id, count);
                RefreshOutcome::Updated
            }
            Err(e) => {
                self.breaker.lock().record_failure(now);
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Peer refresh for room {} failed: {}", self.room_id, e);
                RefreshOutcome::Failed
            }
        }
    }

    /// Current peer list, local participant excluded
    pub fn snapshot(&self) -> Arc<[PeerEndpoint]> {
        self.peers.read().clone()
    }

    pub fn find(&self, user_id: &str) -> Option<PeerEndpoint> {
        self.snapshot().iter().find(|p| p.user_id == user_id).cloned()
    }

    pub fn directory(&self) -> &Arc<dyn PeerDirectory> {
        &self.directory
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }
}

/// Report `user_id` as alive every `interval` until `shutdown` flips.
/// Failures are logged only.
pub fn spawn_heartbeat_task(
    directory: Arc<dyn PeerDirectory>,
    user_id: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = directory.heartbeat(&user_id).await {
                        tracing::warn!("Heartbeat for {} failed: {}", user_id, e);
                    }
                }
            }
        }

        tracing::debug!("Heartbeat task for {} exiting", user_id);
    })
}
