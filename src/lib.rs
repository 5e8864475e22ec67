//! # Room Relay
//!
//! Low-latency distribution of video, audio, chat text and files between the
//! participants of a room, over best-effort UDP, through a single relay hub.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SPOKE (student / participant) ────────────────────────────┐
//! │  ┌─────────┐   ┌────────────┐                                                          │
//! │  │ Camera  │──►│ JPEG codec │──► fragment ──┐                                          │
//! │  └─────────┘   └────────────┘               │      ┌──────────────────────────────┐    │
//! │  ┌─────────┐                                ├─────►│ MediaSender (video/audio/chat)│───┼──┐
//! │  │  Mic    │──► PCM buffer ──► audio unit ──┘      └──────────────────────────────┘    │  │
//! │  └─────────┘                                                                           │  │
//! │  Receive loops ──► reassembly ──► SessionEvent / per-sender playback                   │  │
//! └────────────────────────────────────────────────────────────────────────────────────────┘  │
//!                                                                                              │ UDP
//! ┌──────────────────────────────── HUB (host / proctor) ──────────────────────────────────┐  │
//! │  Receive loop (one per socket) ◄──────────────────────────────────────────────────────┼──┘
//! │        │                                                                               │
//! │        ├──► deliver locally (SessionEvent, playback)                                   │
//! │        └──► Relay: forward the datagram as-is to every peer except origin and self ───┼──► other spokes
//! │                                                                                        │
//! │  PeerCache ◄── refresh every 2 s ── PeerDirectory (external) guarded by CircuitBreaker │
//! └────────────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry point is [`session::StreamSession`].

pub mod audio;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod network;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod video;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Microphone sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Microphone channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Duration of one captured audio buffer
    pub const DEFAULT_AUDIO_BUFFER_MS: u32 = 200;

    /// Buffers queued per remote sender before dropping
    pub const DEFAULT_PLAYBACK_QUEUE_CAPACITY: usize = 50;

    /// Camera frames per second
    pub const DEFAULT_CAPTURE_FPS: u32 = 15;

    pub const DEFAULT_VIDEO_WIDTH: u32 = 640;
    pub const DEFAULT_VIDEO_HEIGHT: u32 = 480;
    pub const DEFAULT_JPEG_QUALITY: u8 = 70;

    /// Maximum UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Receive buffer per socket
    pub const RECV_BUFFER_SIZE: usize = 65_536;

    /// Payload bytes per video fragment
    pub const DEFAULT_VIDEO_FRAGMENT_PAYLOAD: usize = 60_000;

    /// Raw bytes per FILE_CHUNK, leaving a safety margin below the datagram limit
    pub const DEFAULT_FILE_CHUNK_SIZE: usize = 60_000;

    pub const DEFAULT_MAX_FRAGMENTS_PER_FRAME: u32 = 1024;

    /// Longest sender id accepted in video/audio headers
    pub const MAX_SENDER_ID_BYTES: usize = 256;

    /// Video header without the sender id: len + timestamp + seq + total
    pub const VIDEO_HEADER_FIXED: usize = 4 + 8 + 4 + 4;

    /// Audio header without the sender id: len + timestamp
    pub const AUDIO_HEADER_FIXED: usize = 4 + 8;

    /// Fixed width of the sender id in chat messages
    pub const CHAT_SENDER_ID_WIDTH: usize = 16;

    /// Chat header: sender id + type + payload length
    pub const CHAT_HEADER_SIZE: usize = CHAT_SENDER_ID_WIDTH + 4 + 4;

    /// FILE_CHUNK prefix: chunk index + total chunks
    pub const FILE_CHUNK_HEADER_SIZE: usize = 4 + 4;

    /// Peer cache refresh interval
    pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 2_000;

    /// Consecutive directory failures that open the circuit
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    /// Time the circuit stays open after the last failure
    pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 10_000;

    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

    /// Age after which an incomplete frame or file is evicted
    pub const DEFAULT_REASSEMBLY_TIMEOUT_MS: u64 = 3_000;

    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

    /// Bounded wait on each background loop during stop
    pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 1_500;

    pub const DEFAULT_EVENT_CAPACITY: usize = 256;
}

/// Milliseconds since the Unix epoch, used as frame timestamps
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
