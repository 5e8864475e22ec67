//! Chat and file-transfer control messages
//!
//! The sender id is a fixed 16-byte field (space padded, truncated when
//! longer) so the header parses without a length prefix. A file travels as
//! one FILE_START, N ordered FILE_CHUNK and one FILE_END message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ensure;
use crate::constants::{CHAT_HEADER_SIZE, CHAT_SENDER_ID_WIDTH, FILE_CHUNK_HEADER_SIZE};
use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMessageType {
    Text = 0,
    FileStart = 1,
    FileChunk = 2,
    FileEnd = 3,
}

impl TryFrom<i32> for ChatMessageType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChatMessageType::Text),
            1 => Ok(ChatMessageType::FileStart),
            2 => Ok(ChatMessageType::FileChunk),
            3 => Ok(ChatMessageType::FileEnd),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// A decoded chat/control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender id as carried on the wire (at most 16 bytes, padding removed)
    pub sender_id: String,
    pub message_type: ChatMessageType,
    pub payload: Bytes,
}

/// Truncate an id to the 16-byte wire field without splitting a character.
///
/// Origin checks on chat traffic compare ids in this form.
pub fn wire_sender_id(sender_id: &str) -> &str {
    if sender_id.len() <= CHAT_SENDER_ID_WIDTH {
        return sender_id;
    }
    let mut end = CHAT_SENDER_ID_WIDTH;
    while !sender_id.is_char_boundary(end) {
        end -= 1;
    }
    &sender_id[..end]
}

fn pad_sender_id(sender_id: &str) -> [u8; CHAT_SENDER_ID_WIDTH] {
    let mut field = [b' '; CHAT_SENDER_ID_WIDTH];
    let id = wire_sender_id(sender_id).as_bytes();
    field[..id.len()].copy_from_slice(id);
    field
}

pub fn encode_chat_message(message_type: ChatMessageType, sender_id: &str, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHAT_HEADER_SIZE + payload.len());
    buf.put_slice(&pad_sender_id(sender_id));
    buf.put_i32(message_type as i32);
    buf.put_i32(payload.len() as i32);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn decode_chat_message(mut packet: Bytes) -> Result<ChatMessage, ProtocolError> {
    ensure(&packet, CHAT_HEADER_SIZE)?;
    let raw_id = packet.split_to(CHAT_SENDER_ID_WIDTH);
    let sender_id = std::str::from_utf8(&raw_id)
        .map_err(|_| ProtocolError::InvalidSenderId)?
        .trim_end_matches(' ')
        .to_string();
    if sender_id.is_empty() {
        return Err(ProtocolError::InvalidSenderId);
    }

    let message_type = ChatMessageType::try_from(packet.get_i32())?;
    let declared = packet.get_i32();
    if declared < 0 || declared as usize > packet.remaining() {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared,
            actual: packet.remaining(),
        });
    }
    let payload = packet.split_to(declared as usize);

    Ok(ChatMessage {
        sender_id,
        message_type,
        payload,
    })
}

/// FILE_START payload: `"<fileName>|<fileSizeBytes>|<totalChunks>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

impl FileMetadata {
    pub fn to_payload(&self) -> String {
        format!("{}|{}|{}", self.file_name, self.file_size, self.total_chunks)
    }

    /// Parse from the right so file names may contain `|`
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::InvalidFileMetadata("not UTF-8".into()))?;
        let mut parts = text.rsplitn(3, '|');
        let total = parts.next();
        let size = parts.next();
        let name = parts.next();
        match (name, size, total) {
            (Some(name), Some(size), Some(total)) if !name.is_empty() => Ok(Self {
                file_name: name.to_string(),
                file_size: size
                    .parse()
                    .map_err(|_| ProtocolError::InvalidFileMetadata(format!("size {:?}", size)))?,
                total_chunks: total
                    .parse()
                    .map_err(|_| ProtocolError::InvalidFileMetadata(format!("chunks {:?}", total)))?,
            }),
            _ => Err(ProtocolError::InvalidFileMetadata(text.to_string())),
        }
    }
}

/// FILE_CHUNK payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub index: u32,
    pub total: u32,
    pub data: Bytes,
}

impl FileChunk {
    pub fn encode(index: u32, total: u32, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FILE_CHUNK_HEADER_SIZE + data.len());
        buf.put_i32(index as i32);
        buf.put_i32(total as i32);
        buf.put_slice(data);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, FILE_CHUNK_HEADER_SIZE)?;
        let index = payload.get_i32();
        let total = payload.get_i32();
        if total <= 0 || index < 0 || index >= total {
            return Err(ProtocolError::InvalidFragmentIndex { seq: index, total });
        }
        Ok(Self {
            index: index as u32,
            total: total as u32,
            data: payload,
        })
    }
}

/// Encode a whole file transfer as the ordered list of messages to send
pub fn split_file(sender_id: &str, file_name: &str, data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let total = data.len().div_ceil(chunk_size) as u32;
    let metadata = FileMetadata {
        file_name: file_name.to_string(),
        file_size: data.len() as u64,
        total_chunks: total,
    };

    let mut messages = Vec::with_capacity(total as usize + 2);
    messages.push(encode_chat_message(
        ChatMessageType::FileStart,
        sender_id,
        metadata.to_payload().as_bytes(),
    ));
    for (index, chunk) in data.chunks(chunk_size).enumerate() {
        messages.push(encode_chat_message(
            ChatMessageType::FileChunk,
            sender_id,
            &FileChunk::encode(index as u32, total, chunk),
        ));
    }
    messages.push(encode_chat_message(
        ChatMessageType::FileEnd,
        sender_id,
        file_name.as_bytes(),
    ));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_roundtrip() {
        let packet = encode_chat_message(ChatMessageType::Text, "alice", "hello room".as_bytes());
        assert_eq!(&packet[..16], b"alice           ");

        let message = decode_chat_message(packet).unwrap();
        assert_eq!(message.sender_id, "alice");
        assert_eq!(message.message_type, ChatMessageType::Text);
        assert_eq!(&message.payload[..], b"hello room");
    }

    #[test]
    fn test_long_sender_id_truncated() {
        let id = "a-very-long-student-identifier";
        let message = decode_chat_message(encode_chat_message(ChatMessageType::Text, id, b"")).unwrap();
        assert_eq!(message.sender_id, "a-very-long-stud");
        assert_eq!(message.sender_id, wire_sender_id(id));
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 15 ASCII bytes followed by a 2-byte character
        let id = "abcdefghijklmnoé";
        assert_eq!(wire_sender_id(id), "abcdefghijklmno");
        let message = decode_chat_message(encode_chat_message(ChatMessageType::Text, id, b"")).unwrap();
        assert_eq!(message.sender_id, "abcdefghijklmno");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut raw = BytesMut::new();
        raw.put_slice(b"bob             ");
        raw.put_i32(7);
        raw.put_i32(0);
        assert_eq!(
            decode_chat_message(raw.freeze()),
            Err(ProtocolError::UnknownMessageType(7))
        );
    }

    #[test]
    fn test_payload_length_beyond_packet_rejected() {
        let packet = encode_chat_message(ChatMessageType::Text, "bob", b"hello");
        let cut = packet.slice(..packet.len() - 2);
        assert!(matches!(
            decode_chat_message(cut),
            Err(ProtocolError::PayloadLengthMismatch { declared: 5, actual: 3 })
        ));
    }

    #[test]
    fn test_file_metadata_parse() {
        let meta = FileMetadata::parse(b"report.pdf|204800|4").unwrap();
        assert_eq!(meta.file_name, "report.pdf");
        assert_eq!(meta.file_size, 204_800);
        assert_eq!(meta.total_chunks, 4);

        let meta = FileMetadata::parse(b"a|b.txt|10|1").unwrap();
        assert_eq!(meta.file_name, "a|b.txt");

        assert!(FileMetadata::parse(b"report.pdf|big|4").is_err());
        assert!(FileMetadata::parse(b"report.pdf").is_err());
    }

    #[test]
    fn test_split_file_layout() {
        let data = vec![7u8; 204_800];
        let messages = split_file("lecturer", "report.pdf", &data, 51_200);
        assert_eq!(messages.len(), 6);

        let start = decode_chat_message(messages[0].clone()).unwrap();
        assert_eq!(start.message_type, ChatMessageType::FileStart);
        assert_eq!(&start.payload[..], b"report.pdf|204800|4");

        for (i, packet) in messages[1..5].iter().enumerate() {
            let message = decode_chat_message(packet.clone()).unwrap();
            assert_eq!(message.message_type, ChatMessageType::FileChunk);
            let chunk = FileChunk::decode(message.payload).unwrap();
            assert_eq!(chunk.index, i as u32);
            assert_eq!(chunk.total, 4);
            assert_eq!(chunk.data.len(), 51_200);
        }

        let end = decode_chat_message(messages[5].clone()).unwrap();
        assert_eq!(end.message_type, ChatMessageType::FileEnd);
        assert_eq!(&end.payload[..], b"report.pdf");
    }
}
