//! Error types for the room relay

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors. A decode either fully succeeds or returns one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid sender id length: {0}")]
    InvalidSenderIdLength(i32),

    #[error("Sender id is not valid UTF-8")]
    InvalidSenderId,

    #[error("Invalid fragment index {seq} of {total}")]
    InvalidFragmentIndex { seq: i32, total: i32 },

    #[error("Unknown chat message type: {0}")]
    UnknownMessageType(i32),

    #[error("Payload length mismatch: header says {declared}, packet carries {actual}")]
    PayloadLengthMismatch { declared: i32, actual: usize },

    #[error("Malformed file metadata: {0}")]
    InvalidFileMetadata(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Device closed")]
    Closed,
}

/// Camera and image codec errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Camera not available: {0}")]
    CameraUnavailable(String),

    #[error("Frame grab failed: {0}")]
    GrabFailed(String),

    #[error("JPEG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("JPEG decoding failed: {0}")]
    DecodingFailed(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Peer directory errors
#[derive(Error, Debug, Clone)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session cannot start from state {0}")]
    InvalidState(String),

    #[error("Local endpoint for {0} is not known to the directory")]
    LocalEndpointUnknown(String),

    #[error("Session is not active")]
    NotActive,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
