//! Hub-and-spoke relay decisions
//!
//! The hub sends its own media to every peer and re-broadcasts whatever it
//! receives to everyone except the origin. A spoke sends only to the hub and
//! never forwards. This module only decides; the session does the sending.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::directory::{PeerCache, PeerEndpoint};
use crate::protocol::{wire_sender_id, MediaKind};

/// Role of the local participant, fixed for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// Meeting host or exam proctor
    Hub,
    Spoke,
}

impl SessionRole {
    pub fn for_participant(local_id: &str, hub_id: &str) -> Self {
        if local_id == hub_id {
            SessionRole::Hub
        } else {
            SessionRole::Spoke
        }
    }
}

/// What to do with one inbound unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDecision {
    pub deliver_local: bool,
    pub forward_to: Vec<SocketAddr>,
}

pub struct Relay {
    role: SessionRole,
    local_id: String,
    hub_id: String,
    hub_endpoint: Option<PeerEndpoint>,
    peers: Arc<PeerCache>,
}

impl Relay {
    pub fn new(role: SessionRole, local_id: impl Into<String>, hub_id: impl Into<String>, peers: Arc<PeerCache>) -> Self {
        Self {
            role,
            local_id: local_id.into(),
            hub_id: hub_id.into(),
            hub_endpoint: None,
            peers,
        }
    }

    /// Use an explicitly supplied hub endpoint instead of the cached one
    pub fn with_hub_endpoint(mut self, hub: Option<PeerEndpoint>) -> Self {
        self.hub_endpoint = hub;
        self
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn peers(&self) -> &Arc<PeerCache> {
        &self.peers
    }

    /// The hub as seen by a spoke: the supplied endpoint, else the cache entry
    pub fn hub_endpoint(&self) -> Option<PeerEndpoint> {
        self.hub_endpoint
            .clone()
            .or_else(|| self.peers.find(&self.hub_id))
    }

    /// Where locally captured or authored media goes
    pub fn capture_targets(&self, kind: MediaKind) -> Vec<SocketAddr> {
        match self.role {
            SessionRole::Hub => self.peers.snapshot().iter().map(|p| p.addr(kind)).collect(),
            SessionRole::Spoke => match self.hub_endpoint() {
                Some(hub) => vec![hub.addr(kind)],
                None => {
                    tracing::debug!("No endpoint for hub {}, dropping outgoing {}", self.hub_id, kind);
                    Vec::new()
                }
            },
        }
    }

    /// Decide delivery and forwarding for a unit received from `origin_id`.
    ///
    /// Chat carries ids in their 16-byte wire form, so chat origins are
    /// compared in that form.
    pub fn inbound(&self, kind: MediaKind, origin_id: &str) -> RelayDecision {
        match self.role {
            SessionRole::Spoke => RelayDecision {
                deliver_local: true,
                forward_to: Vec::new(),
            },
            SessionRole::Hub => {
                let same = |id: &str, other: &str| match kind {
                    MediaKind::Chat => wire_sender_id(id) == wire_sender_id(other),
                    _ => id == other,
                };
                let forward_to = self
                    .peers
                    .snapshot()
                    .iter()
                    .filter(|p| !same(p.user_id.as_str(), origin_id) && !same(p.user_id.as_str(), self.local_id.as_str()))
                    .map(|p| p.addr(kind))
                    .collect();
                RelayDecision {
                    deliver_local: true,
                    forward_to,
                }
            }
        }
    }
}
