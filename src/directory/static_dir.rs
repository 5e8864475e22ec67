//! In-memory directory
//!
//! Serves a fixed set of rooms, typically loaded from a node's TOML file.
//! Can be switched offline to exercise the breaker.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{PeerDirectory, PeerEndpoint};
use crate::error::DirectoryError;

pub struct StaticDirectory {
    rooms: RwLock<HashMap<String, Vec<PeerEndpoint>>>,
    online: AtomicBool,
    list_calls: AtomicU64,
    heartbeats: AtomicU64,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            list_calls: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
        }
    }

    pub fn with_room(room_id: &str, peers: Vec<PeerEndpoint>) -> Self {
        let directory = Self::new();
        directory.rooms.write().insert(room_id.to_string(), peers);
        directory
    }

    /// Add or replace a member of a room
    pub fn upsert(&self, room_id: &str, peer: PeerEndpoint) {
        let mut rooms = self.rooms.write();
        let members = rooms.entry(room_id.to_string()).or_default();
        match members.iter_mut().find(|p| p.user_id == peer.user_id) {
            Some(existing) => *existing = peer,
            None => members.push(peer),
        }
    }

    pub fn remove(&self, room_id: &str, user_id: &str) {
        if let Some(members) = self.rooms.write().get_mut(room_id) {
            members.retain(|p| p.user_id != user_id);
        }
    }

    /// Simulate an outage: every call fails while offline
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Calls made to `get_all_peers`, failed ones included
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), DirectoryError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("directory offline".to_string()))
        }
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerDirectory for StaticDirectory {
    async fn get_peer(&self, user_id: &str) -> Result<PeerEndpoint, DirectoryError> {
        self.check_online()?;
        self.rooms
            .read()
            .values()
            .flatten()
            .find(|p| p.user_id == user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::PeerNotFound(user_id.to_string()))
    }

    async fn get_all_peers(&self, room_id: &str) -> Result<Vec<PeerEndpoint>, DirectoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.rooms.read().get(room_id).cloned().unwrap_or_default())
    }

    async fn heartbeat(&self, user_id: &str) -> Result<(), DirectoryError> {
        self.check_online()?;
        let now = chrono::Utc::now();
        let mut found = false;
        for peer in self.rooms.write().values_mut().flatten() {
            if peer.user_id == user_id {
                peer.last_heartbeat_at = Some(now);
                found = true;
            }
        }
        if !found {
            return Err(DirectoryError::PeerNotFound(user_id.to_string()));
        }
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
