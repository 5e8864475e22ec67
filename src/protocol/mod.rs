//! Wire protocol
//!
//! Three packet families travel on three sockets: video fragments, audio
//! units and chat/control messages. All multi-byte integers are big-endian.
//!
//! ```text
//! Video fragment: [i32 idLen][id][i64 timestampMs][i32 seq][i32 total][payload...]
//! Audio unit:     [i32 idLen][id][i64 timestampMs][payload...]
//! Chat/control:   [16B id, space padded][i32 type][i32 payloadLen][payload]
//!                 FILE_CHUNK payload = [i32 index][i32 total][bytes...]
//! ```
//!
//! The codec is pure: no sockets, no relay logic. Every decode either fully
//! succeeds or returns a [`ProtocolError`].

pub mod audio;
pub mod chat;
pub mod reassembly;
pub mod video;

pub use audio::{decode_audio_unit, encode_audio_unit, AudioUnit};
pub use chat::{
    decode_chat_message, encode_chat_message, split_file, ChatMessage, ChatMessageType,
    wire_sender_id, FileChunk, FileMetadata,
};
pub use reassembly::{AssembledFrame, FileAssembler, FrameReassembler, ReceivedFile};
pub use video::{decode_video_fragment, encode_video_fragment, fragment_frame, VideoFragment};

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_SENDER_ID_BYTES;
use crate::error::ProtocolError;

/// Media class; each class has its own socket and port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Chat,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that an id can be carried in a length-prefixed header
pub fn validate_sender_id(sender_id: &str) -> Result<(), ProtocolError> {
    if sender_id.is_empty() || sender_id.len() > MAX_SENDER_ID_BYTES {
        return Err(ProtocolError::InvalidSenderIdLength(sender_id.len() as i32));
    }
    Ok(())
}

pub(crate) fn ensure(buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

/// Read `[i32 len][utf-8 bytes]`
pub(crate) fn read_sender_id(buf: &mut Bytes) -> Result<String, ProtocolError> {
    ensure(buf, 4)?;
    let len = buf.get_i32();
    if len <= 0 || len as usize > MAX_SENDER_ID_BYTES {
        return Err(ProtocolError::InvalidSenderIdLength(len));
    }
    ensure(buf, len as usize)?;
    let raw = buf.split_to(len as usize);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidSenderId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sender_id() {
        assert!(validate_sender_id("alice").is_ok());
        assert!(validate_sender_id("").is_err());
        assert!(validate_sender_id(&"x".repeat(MAX_SENDER_ID_BYTES + 1)).is_err());
    }

    #[test]
    fn test_read_sender_id_rejects_negative_length() {
        let mut buf = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, b'a']);
        assert_eq!(
            read_sender_id(&mut buf),
            Err(ProtocolError::InvalidSenderIdLength(-1))
        );
    }
}
