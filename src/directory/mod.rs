//! Peer directory
//!
//! The directory service is external: it maps user ids to network endpoints
//! and lists the members of a room. Sessions consult it through
//! [`PeerDirectory`] and never call it on the media path; the
//! [`PeerCache`] keeps a snapshot refreshed in the background, shielded by a
//! [`CircuitBreaker`].

pub mod breaker;
pub mod cache;
pub mod static_dir;

pub use breaker::CircuitBreaker;
pub use cache::{spawn_heartbeat_task, PeerCache, RefreshOutcome};
pub use static_dir::StaticDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::error::DirectoryError;
use crate::protocol::MediaKind;

/// Where a participant receives each media class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub user_id: String,
    pub ip: IpAddr,
    pub video_port: u16,
    pub audio_port: u16,
    pub chat_port: u16,
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl PeerEndpoint {
    pub fn new(user_id: impl Into<String>, ip: IpAddr, video_port: u16, audio_port: u16, chat_port: u16) -> Self {
        Self {
            user_id: user_id.into(),
            ip,
            video_port,
            audio_port,
            chat_port,
            last_heartbeat_at: None,
        }
    }

    pub fn port(&self, kind: MediaKind) -> u16 {
        match kind {
            MediaKind::Video => self.video_port,
            MediaKind::Audio => self.audio_port,
            MediaKind::Chat => self.chat_port,
        }
    }

    /// Socket address for one media class
    pub fn addr(&self, kind: MediaKind) -> SocketAddr {
        SocketAddr::new(self.ip, self.port(kind))
    }
}

/// Lookup service for participant endpoints
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn get_peer(&self, user_id: &str) -> Result<PeerEndpoint, DirectoryError>;

    /// All participants currently in the room, the caller included
    async fn get_all_peers(&self, room_id: &str) -> Result<Vec<PeerEndpoint>, DirectoryError>;

    /// Report the caller as alive
    async fn heartbeat(&self, user_id: &str) -> Result<(), DirectoryError>;
}
