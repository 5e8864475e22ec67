//! Session identity and lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of room a session belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Course meeting: every toggle is permitted
    #[default]
    Meeting,
    /// Proctored exam: the camera cannot be turned off
    Exam,
}

/// Who the local participant is and which room it joins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub local_id: String,
    pub room_id: String,
    /// Host of a meeting or proctor of an exam
    pub hub_id: String,
    #[serde(default)]
    pub kind: RoomKind,
}

impl SessionConfig {
    pub fn new(local_id: impl Into<String>, room_id: impl Into<String>, hub_id: impl Into<String>, kind: RoomKind) -> Self {
        Self {
            local_id: local_id.into(),
            room_id: room_id.into(),
            hub_id: hub_id.into(),
            kind,
        }
    }
}

/// Lifecycle: `Created -> Starting -> Active -> Stopping -> Stopped`.
/// A failed start goes from `Starting` straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Starting,
    Active,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
