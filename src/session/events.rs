//! What a session reports to its consumer

use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::state::SessionState;
use crate::network::{ReceiverStats, SenderStats};
use crate::relay::SessionRole;

/// Delivered on the channel given to `StreamSession::start`.
///
/// Events are produced on network and capture tasks; the consumer decides
/// where to handle them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A remote participant's camera frame
    VideoFrame {
        sender_id: String,
        timestamp_ms: i64,
        image: Arc<RgbImage>,
    },
    /// The local camera frame that was just sent
    LocalPreview { timestamp_ms: i64, image: Arc<RgbImage> },
    ChatText { sender_id: String, text: String },
    FileReceived {
        sender_id: String,
        file_name: String,
        data: Bytes,
    },
    /// The hub left the room directory. Sent once; there is no failover.
    HubDeparted { hub_id: String },
}

/// Point-in-time statistics of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub state: SessionState,
    pub role: SessionRole,
    pub peers: usize,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    pub frames_completed: u64,
    pub frames_evicted: u64,
    pub files_completed: u64,
    pub files_evicted: u64,
    pub audio_buffers_captured: u64,
    pub audio_buffers_suppressed: u64,
    pub playback_senders: usize,
    pub events_dropped: u64,
}
